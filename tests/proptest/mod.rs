// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for keycloak-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use keycloak_operator::action::{ClusterAction, DesiredClusterState};
use keycloak_operator::config::{Images, image_tag};
use keycloak_operator::crd::{Keycloak, KeycloakSpec, LabelSelectorSpec, MigrationStrategy};
use keycloak_operator::keycloak::types::Role;
use keycloak_operator::migrate::{DefaultMigrator, Migrator};
use keycloak_operator::reconcile::roles::diff;
use keycloak_operator::resources::backup::migration_backup_name;
use keycloak_operator::resources::statefulset::{generate_statefulset, replicas};
use keycloak_operator::state::ClusterState;
use keycloak_operator::store::{Managed, ManagedResource};

/// Strategy for role names drawn from a small pool, so sets overlap.
fn role_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]), 0..6)
        .prop_map(|names| names.into_iter().map(str::to_string).collect())
}

/// Strategy for the roles a holder has and the ones it could get.
///
/// Like the admin API, available never overlaps assigned.
fn mappings() -> impl Strategy<Value = (Vec<Role>, Vec<Role>)> {
    (role_names(), role_names()).prop_map(|(defined, assigned)| {
        let assigned: BTreeSet<String> = assigned.into_iter().collect();
        let defined: BTreeSet<String> = defined.into_iter().collect();
        (
            defined
                .difference(&assigned)
                .map(|n| Role::named(n))
                .collect(),
            assigned.iter().map(|n| Role::named(n)).collect(),
        )
    })
}

/// Strategy for image tags, including ones with characters invalid in names.
fn tags() -> impl Strategy<Value = String> {
    "[0-9a-zA-Z][0-9a-zA-Z._-]{0,15}"
}

fn server(instances: i32, strategy: MigrationStrategy) -> Keycloak {
    let mut spec = KeycloakSpec {
        instances,
        ..Default::default()
    };
    spec.migration.strategy = strategy;
    let mut kc = Keycloak::new("example", spec);
    kc.metadata.namespace = Some("sso".to_string());
    kc.metadata.uid = Some("uid-1".to_string());
    kc
}

fn names(roles: &[Role]) -> BTreeSet<String> {
    roles.iter().map(|r| r.name.clone()).collect()
}

proptest! {
    /// Property: Applying a diff leaves exactly the desired roles that exist.
    #[test]
    fn test_diff_converges(desired in role_names(), (available, assigned) in mappings()) {
        let result = diff(&desired, &available, &assigned);
        let desired: BTreeSet<String> = desired.into_iter().collect();

        let mut held = names(&assigned);
        for role in &result.remove {
            held.remove(&role.name);
        }
        held.extend(names(&result.add));

        let grantable: BTreeSet<String> = names(&available)
            .union(&names(&assigned))
            .cloned()
            .collect();
        let expected: BTreeSet<String> = desired.intersection(&grantable).cloned().collect();
        prop_assert_eq!(held, expected);
    }

    /// Property: A diff never grants what is held or revokes what is wanted.
    #[test]
    fn test_diff_is_minimal(desired in role_names(), (available, assigned) in mappings()) {
        let result = diff(&desired, &available, &assigned);
        let held = names(&assigned);
        for role in &result.add {
            prop_assert!(!held.contains(&role.name));
            prop_assert!(desired.contains(&role.name));
        }
        for role in &result.remove {
            prop_assert!(!desired.contains(&role.name));
        }
        prop_assert_eq!(names(&result.add).len(), result.add.len());
    }

    /// Property: Diffing twice against the result is empty.
    #[test]
    fn test_diff_idempotent(desired in role_names(), (available, assigned) in mappings()) {
        let first = diff(&desired, &available, &assigned);
        let mut now_held = names(&assigned);
        for role in &first.remove {
            now_held.remove(&role.name);
        }
        now_held.extend(names(&first.add));
        let now_available: Vec<Role> = names(&available)
            .union(&names(&assigned))
            .filter(|n| !now_held.contains(*n))
            .map(|n| Role::named(n))
            .collect();
        let now_assigned: Vec<Role> = now_held.iter().map(|n| Role::named(n)).collect();

        prop_assert!(diff(&desired, &now_available, &now_assigned).is_empty());
    }

    /// Property: The server runs one replica exactly while its image changes.
    #[test]
    fn test_migration_throttles_only_on_image_change(
        instances in 1..=10i32,
        running in tags(),
        target in tags(),
    ) {
        let kc = server(instances, MigrationStrategy::Recreate);
        let images = Images {
            keycloak: format!("quay.io/keycloak/keycloak:{}", target),
            ..Images::default()
        };
        let running_image = format!("quay.io/keycloak/keycloak:{}", running);
        let state = ClusterState {
            statefulset: Some(generate_statefulset(&kc, &running_image)),
            ..Default::default()
        };
        let desired = DesiredClusterState::from(vec![ClusterAction::UpdateResource(
            generate_statefulset(&kc, &images.keycloak).into_managed(),
        )]);

        let migrated = DefaultMigrator::new(images).migrate(&kc, &state, desired).unwrap();
        let Some(ClusterAction::UpdateResource(ManagedResource::StatefulSet(sts))) =
            migrated.actions().first()
        else {
            panic!("server update missing");
        };
        let expected = if running == target { instances } else { 1 };
        prop_assert_eq!(replicas(sts), Some(expected));
    }

    /// Property: The rolling strategy never touches the replica count.
    #[test]
    fn test_rolling_migration_keeps_replicas(instances in 1..=10i32, tag in tags()) {
        let kc = server(instances, MigrationStrategy::Rolling);
        let state = ClusterState {
            statefulset: Some(generate_statefulset(&kc, &format!("keycloak:{}-old", tag))),
            ..Default::default()
        };
        let desired = DesiredClusterState::from(vec![ClusterAction::UpdateResource(
            generate_statefulset(&kc, &format!("keycloak:{}", tag)).into_managed(),
        )]);
        let images = Images {
            keycloak: format!("keycloak:{}", tag),
            ..Images::default()
        };

        let migrated = DefaultMigrator::new(images).migrate(&kc, &state, desired).unwrap();
        prop_assert_eq!(migrated.len(), 1);
        let Some(ClusterAction::UpdateResource(ManagedResource::StatefulSet(sts))) =
            migrated.actions().first()
        else {
            panic!("server update missing");
        };
        prop_assert_eq!(replicas(sts), Some(instances));
    }

    /// Property: Migration backup names are valid object names.
    #[test]
    fn test_migration_backup_name_is_dns_safe(tag in tags()) {
        let kc = server(1, MigrationStrategy::Recreate);
        let name = migration_backup_name(&kc, &format!("registry:5000/keycloak:{}", tag));
        prop_assert!(name.starts_with("example-migration-"));
        prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert_eq!(
            name.clone(),
            migration_backup_name(&kc, &format!("registry:5000/keycloak:{}", tag))
        );
    }

    /// Property: The tag is whatever follows the last colon of the image name.
    #[test]
    fn test_image_tag(tag in tags()) {
        let image = format!("registry.example.com:5000/sso/keycloak:{}", tag);
        prop_assert_eq!(image_tag(&image), tag.as_str());
        prop_assert_eq!(image_tag("registry.example.com:5000/sso/keycloak"), "latest");
    }

    /// Property: A selector matches any label set containing its labels.
    #[test]
    fn test_selector_matches_supersets(
        selected in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 1..4),
        extra in prop::collection::btree_map("[A-Z]{1,6}", "[a-z0-9]{1,6}", 0..4),
    ) {
        let selector = LabelSelectorSpec {
            match_labels: selected.clone(),
            ..Default::default()
        };
        let mut labels: BTreeMap<String, String> = extra;
        labels.extend(selected);
        prop_assert!(selector.matches(&labels));
        prop_assert!(!LabelSelectorSpec::default().matches(&labels));
    }
}
