//! ldap2vault Core Library
//!
//! This library provides an LDAPv3 front end whose binds are verified
//! against a HashiCorp Vault secret store. Directory clients believe they are
//! talking to an LDAP server; every bind becomes a Vault login or a Vault
//! record lookup, and every other operation gets a fixed answer.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`directory`] - Distinguished name parsing
//! - [`secret_store`] - Secret store trait and the Vault implementation
//! - [`bridge`] - Per-connection session state and two-phase bind logic
//! - [`backend`] - Directory operations the protocol server calls
//! - [`network`] - LDAP codec, connection handler and TCP listener
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ldap2vault_core::{BridgeConfig, BridgeListener, BridgeMetrics};
//!
//! let config = BridgeConfig::from_file("ldap2vault.yaml")?;
//! let backend = ldap2vault_core::build_backend(&config)?;
//! let metrics = Arc::new(BridgeMetrics::new());
//! let listener = BridgeListener::new(config.listen.clone(), Arc::new(backend), metrics);
//! listener.run().await?;
//! ```

#![forbid(unsafe_code)]

pub mod backend;
pub mod bridge;
pub mod config;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod network;
pub mod secret_store;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

// Re-export commonly used types
pub use backend::{BridgeDirectory, DirectoryBackend};
pub use bridge::{AuthenticationBridge, BindOutcome, BindStatus, SessionContext, SessionState};
pub use config::BridgeConfig;
pub use error::{AuthError, BridgeError, ConfigError, DnError, Result};
pub use metrics::BridgeMetrics;
pub use network::BridgeListener;
pub use secret_store::{SecretStore, SecretStoreConnector, SessionToken};

/// Build the Vault-backed directory backend described by `config`.
///
/// # Errors
///
/// Returns an error if a Vault client cannot be created from the settings.
pub fn build_backend(config: &BridgeConfig) -> std::result::Result<BridgeDirectory, AuthError> {
    let connector = secret_store::create_connector(config)?;
    let bridge = AuthenticationBridge::new(
        connector,
        config.authentication.authenticate_apps,
        config.users.lookup,
    );
    Ok(BridgeDirectory::new(bridge))
}

/// Build the backend and attach `metrics` to it.
///
/// # Errors
///
/// Returns an error if a Vault client cannot be created from the settings.
pub fn build_backend_with_metrics(
    config: &BridgeConfig,
    metrics: Arc<BridgeMetrics>,
) -> std::result::Result<BridgeDirectory, AuthError> {
    Ok(build_backend(config)?.with_metrics(metrics))
}
