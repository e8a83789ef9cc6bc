//! Directory naming helpers.
//!
//! Turns the distinguished names clients send in Bind and Search requests
//! into the identities and record paths the secret store understands.

pub mod dn;

pub use dn::{parse_identity, parse_path};
