//! Secret store adapter.
//!
//! The bridge never talks HTTP itself. It sees the secret store through two
//! operations on the [`SecretStore`] trait:
//!
//! - `authenticate_application` logs an application in and yields a token.
//! - `authenticate_user` compares a stored credential record with the
//!   password a user supplied.
//!
//! One [`SecretStore`] handle exists per client connection. It is created by
//! a [`SecretStoreConnector`] when the connection opens and upgraded with the
//! application's token after a successful application bind. Handles are
//! never shared, so a token obtained on one connection cannot leak into
//! another.

pub mod vault;

pub use vault::{VaultConnector, VaultSecretStore};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::config::BridgeConfig;
use crate::error::AuthError;

/// Opaque token returned by an application login.
///
/// The value is wiped from memory when dropped and never printed.
#[derive(Clone)]
pub struct SessionToken(Zeroizing<String>);

impl SessionToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// Borrow the raw token for an outgoing request.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Per-connection handle to the secret store.
#[async_trait]
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Log an application in and return its session token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when the store refuses the
    /// credentials and [`AuthError::Backend`] when the call fails.
    async fn authenticate_application(
        &self,
        identity: &str,
        credential: &str,
    ) -> Result<SessionToken, AuthError>;

    /// Check an end user's password against the stored record for `key`.
    ///
    /// `key` is a flat identity or a hierarchical path depending on the
    /// configured lookup mode. Returns `Ok(false)` when the record is
    /// missing or does not match.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Backend`] only for transport or server failures.
    async fn authenticate_user(&self, key: &str, credential: &str) -> Result<bool, AuthError>;

    /// Use `token` for every later call on this handle.
    fn set_token(&mut self, token: &SessionToken);
}

/// Factory for per-connection [`SecretStore`] handles.
pub trait SecretStoreConnector: Send + Sync + fmt::Debug {
    /// Create a fresh handle for a new client connection.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Client`] if the handle cannot be built.
    fn connect(&self) -> Result<Box<dyn SecretStore>, AuthError>;
}

/// Create the secret store connector described by the configuration.
///
/// Builds one handle up front so that an unusable configuration is reported
/// at startup instead of on the first client connection.
///
/// # Errors
///
/// Returns an error if a client for the configured store cannot be created.
pub fn create_connector(config: &BridgeConfig) -> Result<Arc<dyn SecretStoreConnector>, AuthError> {
    let connector = VaultConnector::new(
        config.vault.clone(),
        config.authentication.clone(),
        config.users.clone(),
    );
    connector.connect()?;
    Ok(Arc::new(connector))
}
