//! Network layer for the LDAP bridge.
//!
//! This module provides:
//! - LDAP message model and BER translation
//! - Frame codec for LDAP over TCP
//! - Connection handler for processing requests
//! - TCP listener for accepting client connections

pub mod codec;
pub mod connection;
pub mod listener;
pub mod message;

pub use codec::LdapCodec;
pub use connection::ConnectionHandler;
pub use listener::BridgeListener;
pub use message::{LdapMessage, LdapOp, ResponseFrame};
