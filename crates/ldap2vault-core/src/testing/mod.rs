//! Test utilities for the LDAP bridge.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`InMemoryDirectory`] - An in-memory secret store that records its calls
//! - [`BridgeTestHarness`] - A running bridge listener on an ephemeral port
//! - [`TestHarnessBuilder`] - Builder pattern for custom harness settings
//!
//! # Example
//!
//! ```rust,ignore
//! use ldap2vault_core::testing::{BridgeTestHarness, InMemoryDirectory};
//!
//! #[tokio::test]
//! async fn test_application_bind() {
//!     let directory = InMemoryDirectory::new().with_app("billing", "s3cret");
//!     let harness = BridgeTestHarness::start(directory).await;
//!
//!     // Point an LDAP client at harness.url() and bind as cn=billing.
//! }
//! ```

pub mod harness;
pub mod memory_store;

pub use harness::{BridgeTestHarness, TestHarnessBuilder};
pub use memory_store::{InMemoryConnector, InMemoryDirectory, InMemorySecretStore, StoreCall};
