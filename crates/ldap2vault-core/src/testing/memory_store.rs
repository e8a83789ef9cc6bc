//! In-memory secret store for tests.
//!
//! An [`InMemoryDirectory`] holds application credentials and user password
//! records, records every call made against it, and hands out one
//! [`InMemorySecretStore`] handle per connection just like the Vault
//! connector does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::AuthError;
use crate::secret_store::{SecretStore, SecretStoreConnector, SessionToken};

/// A recorded secret store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `authenticate_application` was called.
    ApplicationLogin {
        /// Identity parsed from the bind DN.
        identity: String,
    },
    /// `authenticate_user` was called.
    UserLookup {
        /// Record key (flat identity or hierarchical path).
        key: String,
        /// Token installed on the handle at the time of the call.
        token: Option<String>,
    },
}

#[derive(Debug, Default)]
struct DirectoryState {
    apps: Mutex<HashMap<String, String>>,
    users: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<StoreCall>>,
    installed_tokens: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    issued: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared in-memory credential directory.
///
/// Cloning is cheap and every clone sees the same data and call log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<DirectoryState>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application credential (builder style).
    #[must_use]
    pub fn with_app(self, identity: &str, secret: &str) -> Self {
        self.add_app(identity, secret);
        self
    }

    /// Register a user password record (builder style).
    #[must_use]
    pub fn with_user(self, key: &str, password: &str) -> Self {
        self.add_user(key, password);
        self
    }

    /// Register an application credential.
    pub fn add_app(&self, identity: &str, secret: &str) {
        lock(&self.state.apps).insert(identity.to_string(), secret.to_string());
    }

    /// Register a user password record.
    pub fn add_user(&self, key: &str, password: &str) {
        lock(&self.state.users).insert(key.to_string(), password.to_string());
    }

    /// Make every call fail with [`AuthError::Backend`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// A new per-connection handle.
    #[must_use]
    pub fn store(&self) -> Box<dyn SecretStore> {
        Box::new(InMemorySecretStore {
            state: Arc::clone(&self.state),
            token: None,
        })
    }

    /// A connector producing handles backed by this directory.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn SecretStoreConnector> {
        Arc::new(InMemoryConnector::new(self.clone()))
    }

    /// All recorded calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.state.calls).clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.state.calls).len()
    }

    /// Recorded user lookups as `(key, token)` pairs.
    #[must_use]
    pub fn user_lookups(&self) -> Vec<(String, Option<String>)> {
        lock(&self.state.calls)
            .iter()
            .filter_map(|call| match call {
                StoreCall::UserLookup { key, token } => Some((key.clone(), token.clone())),
                StoreCall::ApplicationLogin { .. } => None,
            })
            .collect()
    }

    /// Tokens installed on any handle through `set_token`, oldest first.
    #[must_use]
    pub fn installed_tokens(&self) -> Vec<String> {
        lock(&self.state.installed_tokens).clone()
    }

    fn check_available(&self) -> Result<(), AuthError> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            Err(AuthError::Backend("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Connector over an [`InMemoryDirectory`].
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    directory: InMemoryDirectory,
}

impl InMemoryConnector {
    /// Wrap a directory.
    #[must_use]
    pub fn new(directory: InMemoryDirectory) -> Self {
        Self { directory }
    }
}

impl SecretStoreConnector for InMemoryConnector {
    fn connect(&self) -> Result<Box<dyn SecretStore>, AuthError> {
        self.directory.check_available()?;
        Ok(self.directory.store())
    }
}

/// Per-connection handle over an [`InMemoryDirectory`].
#[derive(Debug)]
pub struct InMemorySecretStore {
    state: Arc<DirectoryState>,
    token: Option<String>,
}

impl InMemorySecretStore {
    fn directory(&self) -> InMemoryDirectory {
        InMemoryDirectory {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn authenticate_application(
        &self,
        identity: &str,
        credential: &str,
    ) -> Result<SessionToken, AuthError> {
        lock(&self.state.calls).push(StoreCall::ApplicationLogin {
            identity: identity.to_string(),
        });
        self.directory().check_available()?;

        let matches = lock(&self.state.apps)
            .get(identity)
            .is_some_and(|secret| secret == credential);
        if !matches {
            return Err(AuthError::Rejected("invalid role or secret ID".to_string()));
        }

        let n = self.state.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionToken::new(format!("token-{n}")))
    }

    async fn authenticate_user(&self, key: &str, credential: &str) -> Result<bool, AuthError> {
        lock(&self.state.calls).push(StoreCall::UserLookup {
            key: key.to_string(),
            token: self.token.clone(),
        });
        self.directory().check_available()?;

        Ok(lock(&self.state.users)
            .get(key)
            .is_some_and(|password| password == credential))
    }

    fn set_token(&mut self, token: &SessionToken) {
        lock(&self.state.installed_tokens).push(token.expose().to_string());
        self.token = Some(token.expose().to_string());
    }
}
