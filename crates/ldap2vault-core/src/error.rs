//! Domain error types for the LDAP to Vault bridge.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//!
//! Only [`ConfigError`] is ever fatal, and only at startup. Everything that
//! can go wrong while serving a request is turned into an LDAP result code
//! or, at worst, closes that one connection.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// The secret store address is not an http(s) URL.
    #[error("invalid vault address: {0} (expected 'http://' or 'https://' URL)")]
    InvalidVaultAddress(String),

    /// Only KV engine versions 1 and 2 exist.
    #[error("unsupported kv_version {0} (expected 1 or 2)")]
    UnsupportedKvVersion(u8),

    /// A required setting was left empty.
    #[error("{0} must not be empty")]
    EmptyValue(&'static str),
}

/// Errors produced while turning a distinguished name into an identity.
///
/// The display text is sent back to the client as the diagnostic message of
/// an `invalidDNSyntax` result, so it never contains anything but the DN
/// fragment the client sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnError {
    /// The DN has no components at all.
    #[error("invalid dn: empty distinguished name")]
    InvalidDn,

    /// A component is not a single `attribute=value` pair.
    #[error("invalid attribute: '{0}' is not an attribute=value pair")]
    InvalidAttribute(String),
}

/// Errors returned by the secret store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The secret store refused the supplied credentials.
    #[error("{0}")]
    Rejected(String),

    /// The request could not be completed (transport, permission, server error).
    #[error("secret store request failed: {0}")]
    Backend(String),

    /// A client handle for the secret store could not be created.
    #[error("failed to create secret store client: {0}")]
    Client(String),
}

/// Errors that end the handling of a single client connection.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Failed to decode an LDAP message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Failed to encode an LDAP message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// The client sent an operation the bridge does not answer.
    #[error("unsupported LDAP operation: application tag {tag}")]
    UnsupportedOperation { tag: u64 },

    /// Secret store error that prevented a session from being created.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Shutdown signal received.
    #[error("bridge shutting down")]
    Shutdown,
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for DN parsing.
pub type DnResult<T> = std::result::Result<T, DnError>;
