//! Two-phase bind verification.
//!
//! The first successful bind on a connection authenticates the calling
//! application with a secret-store login. Every later bind authenticates an
//! end user by comparing the supplied password with a stored record, using
//! the connection's (now token-bearing) store handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::UserLookupMode;
use crate::directory::{parse_identity, parse_path};
use crate::error::AuthError;
use crate::network::message::BindRequest;
use crate::secret_store::SecretStoreConnector;

use super::outcome::{BindOutcome, BindPhase, BindStatus};
use super::session::SessionContext;

/// Message returned when a user record does not match.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "invalid credentials";

/// Message returned when a bind arrives without a usable session.
pub const NO_SESSION_MESSAGE: &str = "no session context for this connection";

/// Orchestrates DN parsing, session state and secret store calls for binds.
#[derive(Debug, Clone)]
pub struct AuthenticationBridge {
    connector: Arc<dyn SecretStoreConnector>,
    require_app_auth: bool,
    lookup: UserLookupMode,
}

impl AuthenticationBridge {
    /// Create a bridge.
    #[must_use]
    pub fn new(
        connector: Arc<dyn SecretStoreConnector>,
        require_app_auth: bool,
        lookup: UserLookupMode,
    ) -> Self {
        Self {
            connector,
            require_app_auth,
            lookup,
        }
    }

    /// Open a session for a new connection with its own store handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector cannot build a store handle.
    pub fn connect(
        &self,
        client_address: SocketAddr,
        connection_id: String,
    ) -> Result<SessionContext, AuthError> {
        let store = self.connector.connect()?;
        Ok(SessionContext::new(
            store,
            client_address,
            connection_id,
            self.require_app_auth,
        ))
    }

    /// Verify a bind request.
    ///
    /// The password is always removed from `request`, whatever the outcome.
    /// Failures are reported in the returned [`BindOutcome`] and leave the
    /// session usable for another bind.
    pub async fn bind(
        &self,
        session: Option<&mut SessionContext>,
        request: &mut BindRequest,
    ) -> BindOutcome {
        let password = request.take_password().unwrap_or_default();

        debug!(request = ?request, "bind request");

        let Some(session) = session else {
            warn!(dn = %request.dn, "bind without session context");
            return BindOutcome::failure(
                BindStatus::InappropriateAuthentication,
                NO_SESSION_MESSAGE,
                None,
            );
        };

        let phase = if session.is_app_authenticated() {
            BindPhase::User
        } else {
            BindPhase::Application
        };

        let parsed = match (phase, self.lookup) {
            (BindPhase::User, UserLookupMode::Hierarchical) => parse_path(&request.dn),
            _ => parse_identity(&request.dn),
        };
        let key = match parsed {
            Ok(key) => key,
            Err(e) => {
                info!(
                    connection_id = %session.connection_id(),
                    dn = %request.dn,
                    error = %e,
                    "rejecting bind with malformed DN"
                );
                return BindOutcome::failure(
                    BindStatus::InvalidDnSyntax,
                    e.to_string(),
                    Some(phase),
                );
            }
        };

        match phase {
            BindPhase::Application => {
                let login = session.store().authenticate_application(&key, &password).await;
                match login {
                    Ok(token) => {
                        session.mark_app_authenticated(&token);
                        info!(
                            connection_id = %session.connection_id(),
                            application = %key,
                            "application authenticated"
                        );
                        BindOutcome::success(phase)
                    }
                    Err(e) => {
                        info!(
                            connection_id = %session.connection_id(),
                            application = %key,
                            error = %e,
                            "application authentication failed"
                        );
                        BindOutcome::failure(
                            BindStatus::InvalidCredentials,
                            e.to_string(),
                            Some(phase),
                        )
                    }
                }
            }
            BindPhase::User => {
                let verified = session.store().authenticate_user(&key, &password).await;
                match verified {
                    Ok(true) => {
                        session.mark_user_authenticated();
                        info!(
                            connection_id = %session.connection_id(),
                            user = %key,
                            "user authenticated"
                        );
                        BindOutcome::success(phase)
                    }
                    Ok(false) => {
                        info!(
                            connection_id = %session.connection_id(),
                            user = %key,
                            "user credentials rejected"
                        );
                        BindOutcome::failure(
                            BindStatus::InvalidCredentials,
                            INVALID_CREDENTIALS_MESSAGE,
                            Some(phase),
                        )
                    }
                    Err(e) => {
                        warn!(
                            connection_id = %session.connection_id(),
                            user = %key,
                            error = %e,
                            "user lookup failed"
                        );
                        BindOutcome::failure(
                            BindStatus::InvalidCredentials,
                            e.to_string(),
                            Some(phase),
                        )
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SessionState;
    use crate::testing::{InMemoryDirectory, StoreCall};

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new()
            .with_app("billing", "app-secret")
            .with_user("alice", "alice-pw")
            .with_user("com/example/eng/alice", "tree-pw")
    }

    fn bridge(directory: &InMemoryDirectory, require_app_auth: bool) -> AuthenticationBridge {
        AuthenticationBridge::new(directory.connector(), require_app_auth, UserLookupMode::Flat)
    }

    #[tokio::test]
    async fn test_application_then_user_bind() {
        let directory = directory();
        let bridge = bridge(&directory, true);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut app = BindRequest::simple("cn=billing,dc=example,dc=com", "app-secret");
        let outcome = bridge.bind(Some(&mut session), &mut app).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.phase, Some(BindPhase::Application));
        assert_eq!(session.state(), SessionState::ApplicationAuthenticated);

        let mut user = BindRequest::simple("uid=alice,ou=people,dc=example,dc=com", "alice-pw");
        let outcome = bridge.bind(Some(&mut session), &mut user).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.phase, Some(BindPhase::User));
        assert_eq!(session.state(), SessionState::UserAuthenticated);

        assert_eq!(
            directory.calls(),
            vec![
                StoreCall::ApplicationLogin {
                    identity: "billing".to_string()
                },
                StoreCall::UserLookup {
                    key: "alice".to_string(),
                    token: Some("token-1".to_string())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_application_bind_keeps_state() {
        let directory = directory();
        let bridge = bridge(&directory, true);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut app = BindRequest::simple("cn=billing", "wrong");
        let outcome = bridge.bind(Some(&mut session), &mut app).await;
        assert_eq!(outcome.status, BindStatus::InvalidCredentials);
        assert_eq!(outcome.message.as_deref(), Some("invalid role or secret ID"));
        assert_eq!(session.state(), SessionState::AwaitingApplication);

        // The next bind is still an application bind.
        let mut app = BindRequest::simple("cn=billing", "app-secret");
        assert!(bridge.bind(Some(&mut session), &mut app).await.is_success());
        assert!(directory.installed_tokens().len() == 1);
    }

    #[tokio::test]
    async fn test_wrong_user_password() {
        let directory = directory();
        let bridge = bridge(&directory, false);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut user = BindRequest::simple("cn=alice", "nope");
        let outcome = bridge.bind(Some(&mut session), &mut user).await;
        assert_eq!(outcome.status, BindStatus::InvalidCredentials);
        assert_eq!(outcome.message.as_deref(), Some(INVALID_CREDENTIALS_MESSAGE));
        assert_eq!(session.state(), SessionState::ApplicationAuthenticated);

        let mut unknown = BindRequest::simple("cn=mallory", "alice-pw");
        let outcome = bridge.bind(Some(&mut session), &mut unknown).await;
        assert_eq!(outcome.status, BindStatus::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_app_auth_disabled_goes_straight_to_users() {
        let directory = directory();
        let bridge = bridge(&directory, false);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut user = BindRequest::simple("cn=alice,dc=example", "alice-pw");
        assert!(bridge.bind(Some(&mut session), &mut user).await.is_success());
        assert_eq!(directory.user_lookups(), vec![("alice".to_string(), None)]);
        assert!(directory.installed_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_hierarchical_lookup_uses_reversed_path() {
        let directory = directory();
        let bridge =
            AuthenticationBridge::new(directory.connector(), false, UserLookupMode::Hierarchical);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut user = BindRequest::simple("cn=alice,ou=eng,dc=example,dc=com", "tree-pw");
        assert!(bridge.bind(Some(&mut session), &mut user).await.is_success());
        assert_eq!(
            directory.user_lookups(),
            vec![("com/example/eng/alice".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_malformed_dn_skips_store() {
        let directory = directory();
        let bridge = bridge(&directory, true);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        let mut request = BindRequest::simple("billing", "app-secret");
        let outcome = bridge.bind(Some(&mut session), &mut request).await;
        assert_eq!(outcome.status, BindStatus::InvalidDnSyntax);
        assert!(outcome.message.unwrap().contains("billing"));
        assert_eq!(directory.call_count(), 0);
        assert_eq!(session.state(), SessionState::AwaitingApplication);

        let mut empty = BindRequest::simple("", "x");
        let outcome = bridge.bind(Some(&mut session), &mut empty).await;
        assert_eq!(outcome.status, BindStatus::InvalidDnSyntax);
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let directory = directory();
        let bridge = bridge(&directory, true);

        let mut request = BindRequest::simple("cn=billing", "app-secret");
        let outcome = bridge.bind(None, &mut request).await;
        assert_eq!(outcome.status, BindStatus::InappropriateAuthentication);
        assert_eq!(outcome.phase, None);
        assert_eq!(directory.call_count(), 0);
        assert!(!request.has_password());
    }

    #[tokio::test]
    async fn test_password_removed_on_every_path() {
        let directory = directory();
        let bridge = bridge(&directory, true);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();

        for (dn, password) in [
            ("not-a-dn", "x"),
            ("cn=billing", "wrong"),
            ("cn=billing", "app-secret"),
            ("cn=alice", "alice-pw"),
        ] {
            let mut request = BindRequest::simple(dn, password);
            bridge.bind(Some(&mut session), &mut request).await;
            assert!(!request.has_password(), "password left in request for {dn}");
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_invalid_credentials() {
        let directory = directory();
        let bridge = bridge(&directory, false);
        let mut session = bridge.connect(addr(), "conn-1".to_string()).unwrap();
        directory.set_unavailable(true);

        let mut user = BindRequest::simple("cn=alice", "alice-pw");
        let outcome = bridge.bind(Some(&mut session), &mut user).await;
        assert_eq!(outcome.status, BindStatus::InvalidCredentials);
        assert!(outcome.message.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_tokens_are_not_shared_between_connections() {
        let directory = directory();
        let bridge = bridge(&directory, true);
        let mut first = bridge.connect(addr(), "conn-1".to_string()).unwrap();
        let mut second = bridge.connect(addr(), "conn-2".to_string()).unwrap();

        let mut app = BindRequest::simple("cn=billing", "app-secret");
        assert!(bridge.bind(Some(&mut first), &mut app).await.is_success());
        assert!(!second.is_app_authenticated());

        let mut user = BindRequest::simple("cn=alice", "alice-pw");
        assert!(bridge.bind(Some(&mut first), &mut user).await.is_success());

        // The second connection still has to authenticate its application.
        let mut user = BindRequest::simple("cn=alice", "alice-pw");
        let outcome = bridge.bind(Some(&mut second), &mut user).await;
        assert_eq!(outcome.phase, Some(BindPhase::Application));
        assert!(!outcome.is_success());

        let mut app = BindRequest::simple("cn=billing", "app-secret");
        assert!(bridge.bind(Some(&mut second), &mut app).await.is_success());
        let mut user = BindRequest::simple("cn=alice", "alice-pw");
        assert!(bridge.bind(Some(&mut second), &mut user).await.is_success());

        assert_eq!(
            directory.user_lookups(),
            vec![
                ("alice".to_string(), Some("token-1".to_string())),
                ("alice".to_string(), Some("token-2".to_string())),
            ]
        );
    }

    #[test]
    fn test_connect_fails_when_store_unavailable() {
        let directory = directory();
        directory.set_unavailable(true);
        let bridge = bridge(&directory, true);
        assert!(bridge.connect(addr(), "conn-1".to_string()).is_err());
    }
}
