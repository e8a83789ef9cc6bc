//! Directory operations the protocol server delegates to.
//!
//! [`DirectoryBackend`] is the full capability surface a connection handler
//! needs. [`BridgeDirectory`] answers binds through the authentication
//! bridge and every other operation with a fixed reply.

pub mod directory;

pub use directory::BridgeDirectory;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::network::message::{
    AddRequest, BindRequest, DeleteRequest, ExtendedRequest, ExtendedResponse, LdapResult,
    ModifyDnRequest, ModifyRequest, PasswordModifyRequest, SearchRequest, SearchResultEntry,
};

/// Entries and final result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    pub entries: Vec<SearchResultEntry>,
    pub done: LdapResult,
}

/// Trait for directory backends.
///
/// Operations receive `None` for the session when the connection has none,
/// and must answer with an LDAP result rather than fail.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Per-connection state created by [`connect`](Self::connect).
    type Session: Send + Sync;

    /// Create the session for a new connection.
    ///
    /// # Errors
    ///
    /// An error means the connection cannot be served and is closed.
    fn connect(
        &self,
        client_address: SocketAddr,
        connection_id: String,
    ) -> Result<Self::Session, AuthError>;

    /// Handle a bind. The password is consumed from `request`.
    async fn bind(&self, session: Option<&mut Self::Session>, request: &mut BindRequest)
        -> LdapResult;

    async fn search(&self, session: Option<&Self::Session>, request: &SearchRequest)
        -> SearchResults;

    async fn add(&self, session: Option<&Self::Session>, request: &AddRequest) -> LdapResult;

    async fn delete(&self, session: Option<&Self::Session>, request: &DeleteRequest) -> LdapResult;

    async fn modify(&self, session: Option<&Self::Session>, request: &ModifyRequest) -> LdapResult;

    async fn modify_dn(
        &self,
        session: Option<&Self::Session>,
        request: &ModifyDnRequest,
    ) -> LdapResult;

    /// Extended operations other than password modify and who-am-i.
    async fn extended(
        &self,
        session: Option<&Self::Session>,
        request: &ExtendedRequest,
    ) -> ExtendedResponse;

    async fn password_modify(
        &self,
        session: Option<&Self::Session>,
        request: &PasswordModifyRequest,
    ) -> ExtendedResponse;

    async fn whoami(&self, session: Option<&Self::Session>) -> ExtendedResponse;

    /// Release the session of a closed connection.
    fn disconnect(&self, session: Self::Session);
}
