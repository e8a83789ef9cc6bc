//! Authentication bridge.
//!
//! Turns LDAP binds into secret store calls and tracks per-connection
//! authentication state.

pub mod authenticator;
pub mod outcome;
pub mod session;

pub use authenticator::AuthenticationBridge;
pub use outcome::{BindOutcome, BindPhase, BindStatus};
pub use session::{SessionContext, SessionState};
