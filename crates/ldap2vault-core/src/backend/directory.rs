//! The bridge's directory backend.
//!
//! Binds go through the [`AuthenticationBridge`]. Every other operation is a
//! stub with a fixed answer.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bridge::{AuthenticationBridge, SessionContext};
use crate::directory::parse_identity;
use crate::error::AuthError;
use crate::metrics::BridgeMetrics;
use crate::network::message::{
    AddRequest, BindMethod, BindRequest, DeleteRequest, ExtendedRequest, ExtendedResponse,
    LdapResult, ModifyDnRequest, ModifyRequest, PartialAttribute, PasswordModifyRequest,
    ResultCode, SearchRequest, SearchResultEntry,
};

use super::{DirectoryBackend, SearchResults};

/// DN of the entry every search returns.
pub const STUB_ENTRY_DN: &str = "cn=admin,dc=example,dc=com";

/// Password handed out by the password modify stub.
pub const GENERATED_PASSWORD: &str = "genpass";

/// Authorization identity returned by the who-am-i stub.
pub const WHOAMI_AUTHZ_ID: &str = "dn:cn=someone,o=somewhere";

/// Diagnostic for extended operations the bridge does not know.
pub const UNSUPPORTED_EXTENDED_MESSAGE: &str = "unsupported extended request";

/// Directory backend fronting the authentication bridge.
#[derive(Debug, Clone)]
pub struct BridgeDirectory {
    bridge: AuthenticationBridge,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl BridgeDirectory {
    /// Create a backend without metrics.
    #[must_use]
    pub fn new(bridge: AuthenticationBridge) -> Self {
        Self {
            bridge,
            metrics: None,
        }
    }

    /// Record bind outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_bind(&self, phase: &str, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_bind(phase, outcome);
        }
    }

    fn stub_entry() -> SearchResultEntry {
        SearchResultEntry {
            dn: STUB_ENTRY_DN.to_string(),
            attributes: vec![
                PartialAttribute::new("objectClass", &["person"]),
                PartialAttribute::new("cn", &["admin"]),
                PartialAttribute::new("uid", &["123"]),
            ],
        }
    }
}

#[async_trait]
impl DirectoryBackend for BridgeDirectory {
    type Session = SessionContext;

    fn connect(
        &self,
        client_address: SocketAddr,
        connection_id: String,
    ) -> Result<SessionContext, AuthError> {
        self.bridge.connect(client_address, connection_id)
    }

    async fn bind(
        &self,
        session: Option<&mut SessionContext>,
        request: &mut BindRequest,
    ) -> LdapResult {
        if let BindMethod::Sasl { ref mechanism } = request.method {
            info!(dn = %request.dn, mechanism = %mechanism, "rejecting SASL bind");
            self.record_bind("none", "auth_method_not_supported");
            return LdapResult::new(
                ResultCode::AuthMethodNotSupported,
                format!("SASL mechanism {mechanism} is not supported"),
            );
        }

        let outcome = self.bridge.bind(session, request).await;
        self.record_bind(
            outcome.phase.map_or("none", |p| p.as_str()),
            outcome.status.as_str(),
        );
        outcome.to_ldap_result()
    }

    async fn search(
        &self,
        session: Option<&SessionContext>,
        request: &SearchRequest,
    ) -> SearchResults {
        debug!(
            base_dn = %request.base_dn,
            scope = ?request.scope,
            filter = %request.filter,
            "search request"
        );

        if session.is_none() {
            return SearchResults {
                entries: Vec::new(),
                done: LdapResult::new(ResultCode::NoSuchObject, ""),
            };
        }

        if let Err(e) = parse_identity(&request.base_dn) {
            return SearchResults {
                entries: Vec::new(),
                done: LdapResult::new(ResultCode::NoSuchObject, e.to_string()),
            };
        }

        SearchResults {
            entries: vec![Self::stub_entry()],
            done: LdapResult::success(),
        }
    }

    async fn add(&self, _session: Option<&SessionContext>, request: &AddRequest) -> LdapResult {
        info!(
            entry = %request.entry,
            attributes = request.attributes.len(),
            "add request"
        );
        LdapResult::success()
    }

    async fn delete(
        &self,
        _session: Option<&SessionContext>,
        request: &DeleteRequest,
    ) -> LdapResult {
        info!(entry = %request.entry, "delete request");
        LdapResult::success()
    }

    async fn modify(
        &self,
        _session: Option<&SessionContext>,
        request: &ModifyRequest,
    ) -> LdapResult {
        info!(
            object = %request.object,
            changes = request.changes.len(),
            "modify request"
        );
        LdapResult::success()
    }

    async fn modify_dn(
        &self,
        _session: Option<&SessionContext>,
        request: &ModifyDnRequest,
    ) -> LdapResult {
        info!(
            entry = %request.entry,
            new_rdn = %request.new_rdn,
            delete_old_rdn = request.delete_old_rdn,
            new_superior = ?request.new_superior,
            "modify DN request"
        );
        LdapResult::success()
    }

    async fn extended(
        &self,
        _session: Option<&SessionContext>,
        request: &ExtendedRequest,
    ) -> ExtendedResponse {
        info!(oid = %request.name, "unsupported extended request");
        ExtendedResponse::from_result(LdapResult::new(
            ResultCode::ProtocolError,
            UNSUPPORTED_EXTENDED_MESSAGE,
        ))
    }

    async fn password_modify(
        &self,
        _session: Option<&SessionContext>,
        request: &PasswordModifyRequest,
    ) -> ExtendedResponse {
        info!(user = ?request.user_identity, "password modify request");
        ExtendedResponse::password_modify(GENERATED_PASSWORD).unwrap_or_else(|e| {
            ExtendedResponse::from_result(LdapResult::new(ResultCode::Other, e.to_string()))
        })
    }

    async fn whoami(&self, _session: Option<&SessionContext>) -> ExtendedResponse {
        debug!("who am i request");
        ExtendedResponse::whoami(WHOAMI_AUTHZ_ID)
    }

    fn disconnect(&self, session: SessionContext) {
        debug!(session = %session, "closing session");
        drop(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserLookupMode;
    use crate::network::message::SearchScope;
    use crate::testing::InMemoryDirectory;

    fn backend(directory: &InMemoryDirectory) -> BridgeDirectory {
        BridgeDirectory::new(AuthenticationBridge::new(
            directory.connector(),
            true,
            UserLookupMode::Flat,
        ))
    }

    fn session(backend: &BridgeDirectory) -> SessionContext {
        backend
            .connect("127.0.0.1:41000".parse().unwrap(), "conn-1".to_string())
            .unwrap()
    }

    fn search_request(base_dn: &str) -> SearchRequest {
        SearchRequest {
            base_dn: base_dn.to_string(),
            scope: SearchScope::WholeSubtree,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: "(objectClass=*)".to_string(),
            attributes: vec![],
        }
    }

    #[tokio::test]
    async fn test_bind_maps_outcome_and_records_metrics() {
        let directory = InMemoryDirectory::new().with_app("billing", "secret");
        let metrics = Arc::new(BridgeMetrics::new());
        let backend = backend(&directory).with_metrics(Arc::clone(&metrics));
        let mut session = session(&backend);

        let mut request = BindRequest::simple("cn=billing", "bad");
        let result = backend.bind(Some(&mut session), &mut request).await;
        assert_eq!(result.code, ResultCode::InvalidCredentials);

        let mut request = BindRequest::simple("cn=billing", "secret");
        let result = backend.bind(Some(&mut session), &mut request).await;
        assert_eq!(result.code, ResultCode::Success);

        assert_eq!(
            metrics
                .binds_total
                .with_label_values(&["application", "invalid_credentials"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .binds_total
                .with_label_values(&["application", "success"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_sasl_bind_not_supported() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);
        let mut session = session(&backend);

        let mut request = BindRequest::simple("", "");
        request.method = BindMethod::Sasl {
            mechanism: "EXTERNAL".to_string(),
        };
        let result = backend.bind(Some(&mut session), &mut request).await;
        assert_eq!(result.code, ResultCode::AuthMethodNotSupported);
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_without_session() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);

        let mut request = BindRequest::simple("cn=billing", "secret");
        let result = backend.bind(None, &mut request).await;
        assert_eq!(result.code, ResultCode::InappropriateAuthentication);
    }

    #[tokio::test]
    async fn test_search_returns_stub_entry() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);
        let session = session(&backend);

        let results = backend
            .search(Some(&session), &search_request("dc=example,dc=com"))
            .await;
        assert_eq!(results.done, LdapResult::success());
        assert_eq!(results.entries.len(), 1);

        let entry = &results.entries[0];
        assert_eq!(entry.dn, STUB_ENTRY_DN);
        assert_eq!(
            entry.attributes,
            vec![
                PartialAttribute::new("objectClass", &["person"]),
                PartialAttribute::new("cn", &["admin"]),
                PartialAttribute::new("uid", &["123"]),
            ]
        );
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_with_malformed_base() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);
        let session = session(&backend);

        let results = backend.search(Some(&session), &search_request("example")).await;
        assert!(results.entries.is_empty());
        assert_eq!(results.done.code, ResultCode::NoSuchObject);
        assert!(results.done.message.contains("example"));
    }

    #[tokio::test]
    async fn test_search_without_session() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);

        let results = backend.search(None, &search_request("dc=example")).await;
        assert!(results.entries.is_empty());
        assert_eq!(results.done, LdapResult::new(ResultCode::NoSuchObject, ""));
    }

    #[tokio::test]
    async fn test_write_operations_are_acknowledged() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);
        let session = session(&backend);

        let add = AddRequest {
            entry: "cn=new,dc=example".to_string(),
            attributes: vec![PartialAttribute::new("cn", &["new"])],
        };
        assert_eq!(backend.add(Some(&session), &add).await, LdapResult::success());

        let delete = DeleteRequest {
            entry: "cn=old,dc=example".to_string(),
        };
        assert_eq!(
            backend.delete(Some(&session), &delete).await,
            LdapResult::success()
        );

        let modify = ModifyRequest {
            object: "cn=x".to_string(),
            changes: vec![],
        };
        assert_eq!(backend.modify(None, &modify).await, LdapResult::success());

        let rename = ModifyDnRequest {
            entry: "cn=x,dc=example".to_string(),
            new_rdn: "cn=y".to_string(),
            delete_old_rdn: true,
            new_superior: None,
        };
        assert_eq!(
            backend.modify_dn(Some(&session), &rename).await,
            LdapResult::success()
        );
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extended_stubs() {
        let directory = InMemoryDirectory::new();
        let backend = backend(&directory);
        let session = session(&backend);

        let unknown = ExtendedRequest {
            name: "1.3.6.1.4.1.1466.20037".to_string(),
            value: None,
        };
        let response = backend.extended(Some(&session), &unknown).await;
        assert_eq!(response.result.code, ResultCode::ProtocolError);
        assert_eq!(response.result.message, UNSUPPORTED_EXTENDED_MESSAGE);

        let response = backend
            .password_modify(Some(&session), &PasswordModifyRequest::default())
            .await;
        assert_eq!(response.result.code, ResultCode::Success);
        assert!(response.value.unwrap().ends_with(GENERATED_PASSWORD.as_bytes()));

        let response = backend.whoami(Some(&session)).await;
        assert_eq!(response.result.code, ResultCode::Success);
        assert_eq!(response.value.unwrap(), WHOAMI_AUTHZ_ID.as_bytes());
    }
}
