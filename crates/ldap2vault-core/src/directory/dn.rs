//! Distinguished name parsing.
//!
//! A DN is a comma separated list of `attribute=value` components, most
//! specific first: `cn=alice,ou=eng,dc=example,dc=com`.
//!
//! Two projections are supported:
//!
//! - [`parse_identity`] keeps only the value of the leading component
//!   (`alice`). Used as role ID, username or flat record key.
//! - [`parse_path`] keeps every value and reverses the order so the result
//!   reads root-most first (`com/example/eng/alice`), mirroring a
//!   hierarchical secret-store namespace.
//!
//! Escaped separators (`\,`) and multi-valued RDNs (`+`) are not interpreted.

use crate::error::{DnError, DnResult};

/// Extract the identity token from a DN.
///
/// # Errors
///
/// Returns [`DnError::InvalidDn`] for an empty DN and
/// [`DnError::InvalidAttribute`] if the first component is not exactly one
/// `attribute=value` pair.
///
/// # Example
///
/// ```
/// use ldap2vault_core::directory::parse_identity;
///
/// assert_eq!(parse_identity("cn=alice,dc=example,dc=com").unwrap(), "alice");
/// assert!(parse_identity("alice").is_err());
/// ```
pub fn parse_identity(dn: &str) -> DnResult<String> {
    let first = components(dn)?.next().ok_or(DnError::InvalidDn)?;
    attribute_value(first).map(str::to_string)
}

/// Build a `/`-joined secret path from every component of a DN, root-most first.
///
/// # Errors
///
/// Returns [`DnError::InvalidDn`] for an empty DN and
/// [`DnError::InvalidAttribute`] for the first component that is not exactly
/// one `attribute=value` pair.
///
/// # Example
///
/// ```
/// use ldap2vault_core::directory::parse_path;
///
/// let path = parse_path("cn=alice,ou=eng,dc=example,dc=com").unwrap();
/// assert_eq!(path, "com/example/eng/alice");
/// ```
pub fn parse_path(dn: &str) -> DnResult<String> {
    let values = components(dn)?
        .map(attribute_value)
        .collect::<DnResult<Vec<_>>>()?;

    let mut path = String::with_capacity(dn.len());
    for (i, value) in values.iter().rev().enumerate() {
        if i > 0 {
            path.push('/');
        }
        path.push_str(value);
    }
    Ok(path)
}

fn components(dn: &str) -> DnResult<impl Iterator<Item = &str>> {
    if dn.trim().is_empty() {
        return Err(DnError::InvalidDn);
    }
    Ok(dn.split(',').map(str::trim))
}

fn attribute_value(component: &str) -> DnResult<&str> {
    let mut parts = component.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_attribute), Some(value), None) => Ok(value.trim()),
        _ => Err(DnError::InvalidAttribute(component.to_string())),
    }
}
