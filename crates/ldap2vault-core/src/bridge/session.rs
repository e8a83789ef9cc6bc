//! Per-connection session state.
//!
//! A [`SessionContext`] is created when a client connects and dropped when it
//! disconnects. It owns the connection's secret store handle and tracks how
//! far the client has authenticated.
//!
//! # State Lifecycle
//!
//! 1. **AwaitingApplication**: nothing authenticated yet. Only used when
//!    application authentication is required.
//! 2. **ApplicationAuthenticated**: an application bind succeeded (or
//!    application authentication is disabled). Binds are now user binds.
//! 3. **UserAuthenticated**: at least one user bind succeeded.
//!
//! State only moves forward. A failed user bind leaves the session in
//! `ApplicationAuthenticated`, and the application token stays in place.

use std::fmt;
use std::net::SocketAddr;

use crate::secret_store::{SecretStore, SessionToken};

/// How far a connection has authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Next bind is an application bind.
    AwaitingApplication,
    /// Next bind is a user bind.
    ApplicationAuthenticated,
    /// A user bind has succeeded on this connection.
    UserAuthenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingApplication => write!(f, "awaiting_application"),
            Self::ApplicationAuthenticated => write!(f, "application_authenticated"),
            Self::UserAuthenticated => write!(f, "user_authenticated"),
        }
    }
}

/// Session for one client connection.
///
/// Not `Clone`: the secret store handle belongs to exactly one connection.
#[derive(Debug)]
pub struct SessionContext {
    state: SessionState,
    store: Box<dyn SecretStore>,
    client_address: SocketAddr,
    connection_id: String,
}

impl SessionContext {
    /// Create a session for a freshly accepted connection.
    ///
    /// When `require_app_auth` is false the session starts out as if the
    /// application had already authenticated.
    #[must_use]
    pub fn new(
        store: Box<dyn SecretStore>,
        client_address: SocketAddr,
        connection_id: String,
        require_app_auth: bool,
    ) -> Self {
        let state = if require_app_auth {
            SessionState::AwaitingApplication
        } else {
            SessionState::ApplicationAuthenticated
        };
        Self {
            state,
            store,
            client_address,
            connection_id,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the next bind is treated as a user bind.
    #[must_use]
    pub fn is_app_authenticated(&self) -> bool {
        self.state >= SessionState::ApplicationAuthenticated
    }

    /// Record a successful application bind and install its token on the
    /// connection's store handle.
    pub fn mark_app_authenticated(&mut self, token: &SessionToken) {
        self.store.set_token(token);
        if self.state < SessionState::ApplicationAuthenticated {
            self.state = SessionState::ApplicationAuthenticated;
        }
    }

    /// Record a successful user bind.
    pub fn mark_user_authenticated(&mut self) {
        self.state = SessionState::UserAuthenticated;
    }

    /// The connection's secret store handle.
    #[must_use]
    pub fn store(&self) -> &dyn SecretStore {
        self.store.as_ref()
    }

    /// Client's remote address.
    #[must_use]
    pub fn client_address(&self) -> SocketAddr {
        self.client_address
    }

    /// Connection identifier.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] from {}",
            self.connection_id, self.state, self.client_address
        )
    }
}
