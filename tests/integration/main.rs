// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for keycloak-operator
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig,
//! with the operator's CRDs installed. Tests are marked with #[ignore] and
//! must be run explicitly:
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_server_creates_topology -- --ignored
//! ```
//!
//! Each test creates its own namespace and runs a scoped operator that only
//! watches it, so tests can run in parallel. The namespace is deleted when
//! the test ends, even on panic.

#[path = "../common/mod.rs"]
mod common;

mod cluster;


pub use cluster::*;
pub use namespace::*;
pub use operator::*;
pub use wait::*;
