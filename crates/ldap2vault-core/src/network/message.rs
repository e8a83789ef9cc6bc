//! LDAPv3 messages (RFC 4511) and their BER representation.
//!
//! Requests are decoded from a parsed [`StructureTag`] into [`LdapMessage`].
//! Responses are built as [`ResponseFrame`] values and turned back into a
//! [`StructureTag`] for the codec to write.
//!
//! Only the parts of each request that the bridge looks at are kept. Search
//! filters are rendered to their string form for logging and never
//! evaluated.

use std::fmt;

use bytes::BytesMut;
use lber::common::TagClass;
use lber::structure::{StructureTag, PL};
use lber::structures::{ASNTag, Enumerated, Integer, OctetString, Sequence, Set, Tag};
use lber::universal::Types;
use zeroize::Zeroizing;

use crate::error::{BridgeError, Result};

/// RFC 3062 password modify extended operation.
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";
/// RFC 4532 "Who am I?" extended operation.
pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
/// RFC 4511 notice of disconnection (unsolicited).
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Deepest nesting of constructed BER elements accepted in a message.
///
/// Also bounds the nesting of search filters.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Application tags of the protocol operations.
pub mod op_tags {
    pub const BIND_REQUEST: u64 = 0;
    pub const BIND_RESPONSE: u64 = 1;
    pub const UNBIND_REQUEST: u64 = 2;
    pub const SEARCH_REQUEST: u64 = 3;
    pub const SEARCH_RESULT_ENTRY: u64 = 4;
    pub const SEARCH_RESULT_DONE: u64 = 5;
    pub const MODIFY_REQUEST: u64 = 6;
    pub const MODIFY_RESPONSE: u64 = 7;
    pub const ADD_REQUEST: u64 = 8;
    pub const ADD_RESPONSE: u64 = 9;
    pub const DEL_REQUEST: u64 = 10;
    pub const DEL_RESPONSE: u64 = 11;
    pub const MODIFY_DN_REQUEST: u64 = 12;
    pub const MODIFY_DN_RESPONSE: u64 = 13;
    pub const COMPARE_REQUEST: u64 = 14;
    pub const ABANDON_REQUEST: u64 = 16;
    pub const EXTENDED_REQUEST: u64 = 23;
    pub const EXTENDED_RESPONSE: u64 = 24;
}

/// A decoded client request.
#[derive(Debug)]
pub struct LdapMessage {
    /// Message ID chosen by the client, echoed in every response.
    pub message_id: i32,
    /// The protocol operation.
    pub op: LdapOp,
}

/// Protocol operations a client can send.
#[derive(Debug)]
pub enum LdapOp {
    Bind(BindRequest),
    Unbind,
    Search(SearchRequest),
    Modify(ModifyRequest),
    Add(AddRequest),
    Delete(DeleteRequest),
    ModifyDn(ModifyDnRequest),
    /// Abandon the operation with the given message ID.
    Abandon(i32),
    Extended(ExtendedRequest),
    /// Any operation the bridge does not answer (compare, unknown tags).
    Unsupported { tag: u64 },
}

impl LdapOp {
    /// Short operation name used for logging and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind",
            Self::Unbind => "unbind",
            Self::Search(_) => "search",
            Self::Modify(_) => "modify",
            Self::Add(_) => "add",
            Self::Delete(_) => "delete",
            Self::ModifyDn(_) => "modify_dn",
            Self::Abandon(_) => "abandon",
            Self::Extended(_) => "extended",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Authentication choice of a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMethod {
    Simple,
    Sasl { mechanism: String },
}

/// A bind request.
///
/// The password is held in zeroizing storage and can be taken out exactly
/// once, after which the request no longer carries it.
pub struct BindRequest {
    pub version: i64,
    pub dn: String,
    pub method: BindMethod,
    password: Option<Zeroizing<String>>,
}

impl BindRequest {
    /// Simple bind with a DN and password.
    #[must_use]
    pub fn simple(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            version: 3,
            dn: dn.into(),
            method: BindMethod::Simple,
            password: Some(Zeroizing::new(password.into())),
        }
    }

    /// Remove the password from the request.
    pub fn take_password(&mut self) -> Option<Zeroizing<String>> {
        self.password.take()
    }

    /// Whether the request still carries a password.
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindRequest")
            .field("version", &self.version)
            .field("dn", &self.dn)
            .field("method", &self.method)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    /// Filter in RFC 4515 string form.
    pub filter: String,
    pub attributes: Vec<String>,
}

/// An attribute with its values, as used in add requests and search entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl PartialAttribute {
    /// Attribute with string values.
    #[must_use]
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        }
    }
}

/// An add request.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub entry: String,
    pub attributes: Vec<PartialAttribute>,
}

/// A delete request.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub entry: String,
}

/// Kind of change in a modify request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Add,
    Delete,
    Replace,
    Increment,
}

/// One change of a modify request.
#[derive(Debug, Clone)]
pub struct Change {
    pub operation: ModifyOperation,
    pub modification: PartialAttribute,
}

/// A modify request.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub object: String,
    pub changes: Vec<Change>,
}

/// A modify DN request.
#[derive(Debug, Clone)]
pub struct ModifyDnRequest {
    pub entry: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

/// An extended request.
#[derive(Debug, Clone)]
pub struct ExtendedRequest {
    pub name: String,
    pub value: Option<Vec<u8>>,
}

/// Decoded value of a password modify extended request.
///
/// Old and new passwords are dropped during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub new_password_supplied: bool,
}

impl ExtendedRequest {
    /// Decode the request value as a password modify request.
    ///
    /// A missing value is a request with every field omitted.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ProtocolDecode`] if the value is not a valid
    /// `PasswdModifyRequestValue`.
    pub fn password_modify(&self) -> Result<PasswordModifyRequest> {
        let Some(ref value) = self.value else {
            return Ok(PasswordModifyRequest::default());
        };
        let tag = parse_complete(value)?;
        let fields = universal(tag, Types::Sequence, "PasswdModifyRequestValue")?
            .expect_constructed()
            .ok_or_else(|| malformed("PasswdModifyRequestValue must be constructed"))?;

        let mut request = PasswordModifyRequest::default();
        for field in fields {
            if field.class != TagClass::Context {
                return Err(malformed("unexpected PasswdModifyRequestValue field"));
            }
            match field.id {
                0 => request.user_identity = Some(utf8(primitive(field, "userIdentity")?)?),
                1 => {}
                2 => request.new_password_supplied = true,
                id => {
                    return Err(malformed(format!(
                        "unknown PasswdModifyRequestValue field [{id}]"
                    )))
                }
            }
        }
        Ok(request)
    }
}

/// LDAP result codes used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    AuthMethodNotSupported,
    NoSuchObject,
    InvalidDnSyntax,
    InappropriateAuthentication,
    InvalidCredentials,
    Unavailable,
    UnwillingToPerform,
    Other,
}

impl ResultCode {
    /// Numeric value on the wire.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::OperationsError => 1,
            Self::ProtocolError => 2,
            Self::AuthMethodNotSupported => 7,
            Self::NoSuchObject => 32,
            Self::InvalidDnSyntax => 34,
            Self::InappropriateAuthentication => 48,
            Self::InvalidCredentials => 49,
            Self::Unavailable => 52,
            Self::UnwillingToPerform => 53,
            Self::Other => 80,
        }
    }
}

/// The common result part of every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
}

impl LdapResult {
    /// A result with the given code and diagnostic message.
    #[must_use]
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            message: message.into(),
        }
    }

    /// Empty success result.
    #[must_use]
    pub fn success() -> Self {
        Self::new(ResultCode::Success, "")
    }
}

/// A search result entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<PartialAttribute>,
}

/// An extended response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ExtendedResponse {
    /// Response carrying only a result.
    #[must_use]
    pub fn from_result(result: LdapResult) -> Self {
        Self {
            result,
            name: None,
            value: None,
        }
    }

    /// Successful password modify response with a generated password.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ProtocolEncode`] if the value cannot be encoded.
    pub fn password_modify(generated: &str) -> Result<Self> {
        let value = Tag::Sequence(Sequence {
            inner: vec![Tag::OctetString(OctetString {
                class: TagClass::Context,
                id: 0,
                inner: generated.as_bytes().to_vec(),
            })],
            ..Default::default()
        });
        Ok(Self {
            result: LdapResult::success(),
            name: None,
            value: Some(encode_to_vec(value.into_structure())?),
        })
    }

    /// Successful "Who am I?" response.
    #[must_use]
    pub fn whoami(authz_id: &str) -> Self {
        Self {
            result: LdapResult::success(),
            name: None,
            value: Some(authz_id.as_bytes().to_vec()),
        }
    }
}

/// Responses the bridge can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapResponse {
    Bind(LdapResult),
    SearchEntry(SearchResultEntry),
    SearchDone(LdapResult),
    Modify(LdapResult),
    Add(LdapResult),
    Delete(LdapResult),
    ModifyDn(LdapResult),
    Extended(ExtendedResponse),
}

/// A response paired with the message ID it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub message_id: i32,
    pub response: LdapResponse,
}

impl ResponseFrame {
    #[must_use]
    pub fn new(message_id: i32, response: LdapResponse) -> Self {
        Self {
            message_id,
            response,
        }
    }

    /// Unsolicited notice sent before the server drops a connection.
    #[must_use]
    pub fn notice_of_disconnection(code: ResultCode, message: impl Into<String>) -> Self {
        Self::new(
            0,
            LdapResponse::Extended(ExtendedResponse {
                result: LdapResult::new(code, message),
                name: Some(NOTICE_OF_DISCONNECTION_OID.to_string()),
                value: None,
            }),
        )
    }

    /// Build the `LDAPMessage` envelope.
    #[must_use]
    pub fn into_structure(self) -> StructureTag {
        let op = match self.response {
            LdapResponse::Bind(r) => result_op(op_tags::BIND_RESPONSE, r),
            LdapResponse::SearchEntry(entry) => search_entry_op(entry),
            LdapResponse::SearchDone(r) => result_op(op_tags::SEARCH_RESULT_DONE, r),
            LdapResponse::Modify(r) => result_op(op_tags::MODIFY_RESPONSE, r),
            LdapResponse::Add(r) => result_op(op_tags::ADD_RESPONSE, r),
            LdapResponse::Delete(r) => result_op(op_tags::DEL_RESPONSE, r),
            LdapResponse::ModifyDn(r) => result_op(op_tags::MODIFY_DN_RESPONSE, r),
            LdapResponse::Extended(ext) => extended_op(ext),
        };

        Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: i64::from(self.message_id),
                    ..Default::default()
                }),
                op,
            ],
            ..Default::default()
        })
        .into_structure()
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn octet_string(value: impl Into<Vec<u8>>) -> Tag {
    Tag::OctetString(OctetString {
        inner: value.into(),
        ..Default::default()
    })
}

fn result_fields(result: LdapResult) -> Vec<Tag> {
    vec![
        Tag::Enumerated(Enumerated {
            inner: result.code.code(),
            ..Default::default()
        }),
        octet_string(result.matched_dn),
        octet_string(result.message),
    ]
}

fn result_op(id: u64, result: LdapResult) -> Tag {
    Tag::Sequence(Sequence {
        class: TagClass::Application,
        id,
        inner: result_fields(result),
    })
}

fn search_entry_op(entry: SearchResultEntry) -> Tag {
    let attributes = entry
        .attributes
        .into_iter()
        .map(|attr| {
            Tag::Sequence(Sequence {
                inner: vec![
                    octet_string(attr.name),
                    Tag::Set(Set {
                        inner: attr.values.into_iter().map(octet_string).collect(),
                        ..Default::default()
                    }),
                ],
                ..Default::default()
            })
        })
        .collect();

    Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: op_tags::SEARCH_RESULT_ENTRY,
        inner: vec![
            octet_string(entry.dn),
            Tag::Sequence(Sequence {
                inner: attributes,
                ..Default::default()
            }),
        ],
    })
}

fn extended_op(ext: ExtendedResponse) -> Tag {
    let mut inner = result_fields(ext.result);
    if let Some(name) = ext.name {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 10,
            inner: name.into_bytes(),
        }));
    }
    if let Some(value) = ext.value {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 11,
            inner: value,
        }));
    }
    Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: op_tags::EXTENDED_RESPONSE,
        inner,
    })
}

fn encode_to_vec(tag: StructureTag) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    lber::write::encode_into(&mut buf, tag).map_err(|e| {
        BridgeError::ProtocolEncode {
            message: e.to_string(),
        }
    })?;
    Ok(buf.to_vec())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn malformed(message: impl Into<String>) -> BridgeError {
    BridgeError::ProtocolDecode {
        message: message.into(),
    }
}

/// Parse one complete BER element.
///
/// The nesting depth is checked first, so the recursive parser never sees
/// elements nested deeper than [`MAX_NESTING_DEPTH`].
pub(crate) fn parse_complete(bytes: &[u8]) -> Result<StructureTag> {
    check_nesting(bytes, MAX_NESTING_DEPTH)?;
    match lber::parse::parse_tag(bytes) {
        Ok((rest, tag)) if rest.is_empty() => Ok(tag),
        Ok(_) => Err(malformed("trailing bytes after BER element")),
        Err(_) => Err(malformed("invalid BER encoding")),
    }
}

/// Walk the BER headers in `bytes` without recursing.
///
/// # Errors
///
/// Returns [`BridgeError::ProtocolDecode`] if an element is truncated, uses
/// indefinite length, or sits more than `max_depth` constructed levels deep.
pub fn check_nesting(bytes: &[u8], max_depth: usize) -> Result<()> {
    // End offsets of the constructed elements enclosing `pos`.
    let mut open: Vec<usize> = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        while open.last().is_some_and(|&end| pos >= end) {
            open.pop();
        }
        let limit = open.last().copied().unwrap_or(bytes.len());
        let (is_constructed, header_len, content_len) = element_header(&bytes[pos..limit])?;

        if is_constructed {
            if open.len() >= max_depth {
                return Err(malformed(format!(
                    "BER elements nested deeper than {max_depth} levels"
                )));
            }
            open.push(pos + header_len + content_len);
            pos += header_len;
        } else {
            pos += header_len + content_len;
        }
    }
    Ok(())
}

/// Read one identifier and length header.
///
/// Returns `(constructed, header_len, content_len)`; the content is known to
/// fit inside `src`.
fn element_header(src: &[u8]) -> Result<(bool, usize, usize)> {
    let truncated = || malformed("truncated BER element");

    let identifier = *src.first().ok_or_else(truncated)?;
    let mut pos = 1;
    if identifier & 0x1f == 0x1f {
        // High tag number form.
        loop {
            let b = *src.get(pos).ok_or_else(truncated)?;
            pos += 1;
            if b & 0x80 == 0 {
                break;
            }
            if pos > 9 {
                return Err(malformed("BER tag number too large"));
            }
        }
    }

    let first = *src.get(pos).ok_or_else(truncated)?;
    pos += 1;
    let content_len = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 {
            return Err(malformed("indefinite length encoding is not allowed"));
        }
        if count > 4 {
            return Err(malformed(format!("length field of {count} bytes is too large")));
        }
        let length = src.get(pos..pos + count).ok_or_else(truncated)?;
        pos += count;
        length.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
    };

    if src.len() - pos < content_len {
        return Err(truncated());
    }
    Ok((identifier & 0x20 != 0, pos, content_len))
}

fn universal(tag: StructureTag, ty: Types, what: &str) -> Result<StructureTag> {
    tag.match_class(TagClass::Universal)
        .and_then(|t| t.match_id(ty as u64))
        .ok_or_else(|| malformed(format!("{what}: unexpected tag")))
}

fn primitive(tag: StructureTag, what: &str) -> Result<Vec<u8>> {
    tag.expect_primitive()
        .ok_or_else(|| malformed(format!("{what}: expected primitive encoding")))
}

fn constructed(tag: StructureTag, what: &str) -> Result<Vec<StructureTag>> {
    tag.expect_constructed()
        .ok_or_else(|| malformed(format!("{what}: expected constructed encoding")))
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| malformed("string is not valid UTF-8"))
}

fn integer_value(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(malformed(format!("invalid integer length {}", bytes.len())));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

fn decode_string(tag: StructureTag, what: &str) -> Result<String> {
    utf8(primitive(universal(tag, Types::OctetString, what)?, what)?)
}

fn decode_integer(tag: StructureTag, what: &str) -> Result<i64> {
    integer_value(&primitive(universal(tag, Types::Integer, what)?, what)?)
}

fn decode_enumerated(tag: StructureTag, what: &str) -> Result<i64> {
    integer_value(&primitive(universal(tag, Types::Enumerated, what)?, what)?)
}

fn decode_boolean(tag: StructureTag, what: &str) -> Result<bool> {
    let bytes = primitive(universal(tag, Types::Boolean, what)?, what)?;
    match bytes.as_slice() {
        [b] => Ok(*b != 0),
        _ => Err(malformed(format!("{what}: invalid boolean"))),
    }
}

fn message_id(value: i64) -> Result<i32> {
    i32::try_from(value)
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| malformed(format!("message ID {value} out of range")))
}

/// Fields of a constructed element, consumed in order.
struct Fields {
    inner: std::vec::IntoIter<StructureTag>,
    what: &'static str,
}

impl Fields {
    fn new(tag: StructureTag, what: &'static str) -> Result<Self> {
        Ok(Self {
            inner: constructed(tag, what)?.into_iter(),
            what,
        })
    }

    fn next(&mut self) -> Result<StructureTag> {
        self.inner
            .next()
            .ok_or_else(|| malformed(format!("{}: missing field", self.what)))
    }

    fn optional(&mut self) -> Option<StructureTag> {
        self.inner.next()
    }
}

/// Decode a complete `LDAPMessage`.
///
/// Unknown or unanswered operations decode to [`LdapOp::Unsupported`].
/// Controls are ignored.
///
/// # Errors
///
/// Returns [`BridgeError::ProtocolDecode`] if the message is malformed.
pub fn decode_message(tag: StructureTag) -> Result<LdapMessage> {
    let mut fields = Fields::new(universal(tag, Types::Sequence, "LDAPMessage")?, "LDAPMessage")?;
    let message_id = message_id(decode_integer(fields.next()?, "messageID")?)?;
    let op = fields.next()?;

    if op.class != TagClass::Application {
        return Err(malformed("protocolOp is not an application tag"));
    }

    let op = match op.id {
        op_tags::BIND_REQUEST => LdapOp::Bind(decode_bind(op)?),
        op_tags::UNBIND_REQUEST => LdapOp::Unbind,
        op_tags::SEARCH_REQUEST => LdapOp::Search(decode_search(op)?),
        op_tags::MODIFY_REQUEST => LdapOp::Modify(decode_modify(op)?),
        op_tags::ADD_REQUEST => LdapOp::Add(decode_add(op)?),
        op_tags::DEL_REQUEST => LdapOp::Delete(DeleteRequest {
            entry: utf8(primitive(op, "DelRequest")?)?,
        }),
        op_tags::MODIFY_DN_REQUEST => LdapOp::ModifyDn(decode_modify_dn(op)?),
        op_tags::ABANDON_REQUEST => {
            LdapOp::Abandon(message_id_lenient(&primitive(op, "AbandonRequest")?))
        }
        op_tags::EXTENDED_REQUEST => LdapOp::Extended(decode_extended(op)?),
        tag => LdapOp::Unsupported { tag },
    };

    Ok(LdapMessage { message_id, op })
}

fn message_id_lenient(bytes: &[u8]) -> i32 {
    integer_value(bytes)
        .ok()
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(-1)
}

fn decode_bind(op: StructureTag) -> Result<BindRequest> {
    let mut fields = Fields::new(op, "BindRequest")?;
    let version = decode_integer(fields.next()?, "BindRequest.version")?;
    let dn = decode_string(fields.next()?, "BindRequest.name")?;
    let auth = fields.next()?;

    if auth.class != TagClass::Context {
        return Err(malformed("BindRequest.authentication: unexpected tag"));
    }

    match (auth.id, auth.payload) {
        (0, PL::P(password)) => {
            let password = Zeroizing::new(password);
            let password = std::str::from_utf8(&password)
                .map_err(|_| malformed("simple bind password is not valid UTF-8"))?;
            Ok(BindRequest {
                version,
                dn,
                method: BindMethod::Simple,
                password: Some(Zeroizing::new(password.to_string())),
            })
        }
        (3, PL::C(credentials)) => {
            let mechanism = credentials
                .into_iter()
                .next()
                .map(|m| decode_string(m, "SaslCredentials.mechanism"))
                .transpose()?
                .unwrap_or_default();
            Ok(BindRequest {
                version,
                dn,
                method: BindMethod::Sasl { mechanism },
                password: None,
            })
        }
        (id, _) => Err(malformed(format!(
            "unsupported authentication choice [{id}]"
        ))),
    }
}

fn decode_search(op: StructureTag) -> Result<SearchRequest> {
    let mut fields = Fields::new(op, "SearchRequest")?;
    let base_dn = decode_string(fields.next()?, "SearchRequest.baseObject")?;
    let scope = match decode_enumerated(fields.next()?, "SearchRequest.scope")? {
        0 => SearchScope::BaseObject,
        1 => SearchScope::SingleLevel,
        2 => SearchScope::WholeSubtree,
        other => return Err(malformed(format!("invalid search scope {other}"))),
    };
    let _deref = decode_enumerated(fields.next()?, "SearchRequest.derefAliases")?;
    let size_limit = decode_integer(fields.next()?, "SearchRequest.sizeLimit")?;
    let time_limit = decode_integer(fields.next()?, "SearchRequest.timeLimit")?;
    let types_only = decode_boolean(fields.next()?, "SearchRequest.typesOnly")?;
    let filter = render_filter(fields.next()?, 1)?;
    let attributes = constructed(
        universal(fields.next()?, Types::Sequence, "SearchRequest.attributes")?,
        "SearchRequest.attributes",
    )?
    .into_iter()
    .map(|a| decode_string(a, "AttributeSelector"))
    .collect::<Result<Vec<_>>>()?;

    Ok(SearchRequest {
        base_dn,
        scope,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    })
}

fn decode_attribute(tag: StructureTag) -> Result<PartialAttribute> {
    let mut fields = Fields::new(universal(tag, Types::Sequence, "Attribute")?, "Attribute")?;
    let name = decode_string(fields.next()?, "Attribute.type")?;
    let values = constructed(
        universal(fields.next()?, Types::Set, "Attribute.vals")?,
        "Attribute.vals",
    )?
    .into_iter()
    .map(|v| primitive(universal(v, Types::OctetString, "AttributeValue")?, "AttributeValue"))
    .collect::<Result<Vec<_>>>()?;
    Ok(PartialAttribute { name, values })
}

fn decode_add(op: StructureTag) -> Result<AddRequest> {
    let mut fields = Fields::new(op, "AddRequest")?;
    let entry = decode_string(fields.next()?, "AddRequest.entry")?;
    let attributes = constructed(
        universal(fields.next()?, Types::Sequence, "AddRequest.attributes")?,
        "AddRequest.attributes",
    )?
    .into_iter()
    .map(decode_attribute)
    .collect::<Result<Vec<_>>>()?;
    Ok(AddRequest { entry, attributes })
}

fn decode_modify(op: StructureTag) -> Result<ModifyRequest> {
    let mut fields = Fields::new(op, "ModifyRequest")?;
    let object = decode_string(fields.next()?, "ModifyRequest.object")?;
    let changes = constructed(
        universal(fields.next()?, Types::Sequence, "ModifyRequest.changes")?,
        "ModifyRequest.changes",
    )?
    .into_iter()
    .map(|change| {
        let mut change = Fields::new(universal(change, Types::Sequence, "change")?, "change")?;
        let operation = match decode_enumerated(change.next()?, "change.operation")? {
            0 => ModifyOperation::Add,
            1 => ModifyOperation::Delete,
            2 => ModifyOperation::Replace,
            3 => ModifyOperation::Increment,
            other => return Err(malformed(format!("invalid modify operation {other}"))),
        };
        let modification = decode_attribute(change.next()?)?;
        Ok(Change {
            operation,
            modification,
        })
    })
    .collect::<Result<Vec<_>>>()?;
    Ok(ModifyRequest { object, changes })
}

fn decode_modify_dn(op: StructureTag) -> Result<ModifyDnRequest> {
    let mut fields = Fields::new(op, "ModifyDNRequest")?;
    let entry = decode_string(fields.next()?, "ModifyDNRequest.entry")?;
    let new_rdn = decode_string(fields.next()?, "ModifyDNRequest.newrdn")?;
    let delete_old_rdn = decode_boolean(fields.next()?, "ModifyDNRequest.deleteoldrdn")?;
    let new_superior = match fields.optional() {
        Some(tag) if tag.class == TagClass::Context && tag.id == 0 => {
            Some(utf8(primitive(tag, "ModifyDNRequest.newSuperior")?)?)
        }
        Some(_) => return Err(malformed("ModifyDNRequest.newSuperior: unexpected tag")),
        None => None,
    };
    Ok(ModifyDnRequest {
        entry,
        new_rdn,
        delete_old_rdn,
        new_superior,
    })
}

fn decode_extended(op: StructureTag) -> Result<ExtendedRequest> {
    let mut fields = Fields::new(op, "ExtendedRequest")?;
    let name = fields
        .next()?
        .match_class(TagClass::Context)
        .and_then(|t| t.match_id(0))
        .ok_or_else(|| malformed("ExtendedRequest.requestName: unexpected tag"))?;
    let name = utf8(primitive(name, "ExtendedRequest.requestName")?)?;
    let value = match fields.optional() {
        Some(tag) if tag.class == TagClass::Context && tag.id == 1 => {
            Some(primitive(tag, "ExtendedRequest.requestValue")?)
        }
        Some(_) => return Err(malformed("ExtendedRequest.requestValue: unexpected tag")),
        None => None,
    };
    Ok(ExtendedRequest { name, value })
}

/// Render a search filter in RFC 4515 string form.
///
/// `depth` is the nesting level of `tag`, starting at 1.
fn render_filter(tag: StructureTag, depth: usize) -> Result<String> {
    if depth > MAX_NESTING_DEPTH {
        return Err(malformed(format!(
            "Filter: nested deeper than {MAX_NESTING_DEPTH} levels"
        )));
    }
    if tag.class != TagClass::Context {
        return Err(malformed("Filter: unexpected tag"));
    }
    let rendered = match tag.id {
        0 | 1 => {
            let op = if tag.id == 0 { '&' } else { '|' };
            let parts = constructed(tag, "Filter.set")?
                .into_iter()
                .map(|part| render_filter(part, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            format!("({op}{})", parts.concat())
        }
        2 => {
            let inner = constructed(tag, "Filter.not")?
                .into_iter()
                .next()
                .ok_or_else(|| malformed("Filter.not: empty"))?;
            format!("(!{})", render_filter(inner, depth + 1)?)
        }
        3 | 5 | 6 | 8 => {
            let op = match tag.id {
                3 => "=",
                5 => ">=",
                6 => "<=",
                _ => "~=",
            };
            let mut ava = Fields::new(tag, "AttributeValueAssertion")?;
            let attr = decode_string(ava.next()?, "AttributeValueAssertion.attributeDesc")?;
            let value = primitive(ava.next()?, "AttributeValueAssertion.assertionValue")?;
            format!("({attr}{op}{})", String::from_utf8_lossy(&value))
        }
        4 => {
            let mut substrings = Fields::new(tag, "SubstringFilter")?;
            let attr = decode_string(substrings.next()?, "SubstringFilter.type")?;
            let mut pattern = String::new();
            let mut ends_with_any = false;
            for (i, part) in constructed(substrings.next()?, "SubstringFilter.substrings")?
                .into_iter()
                .enumerate()
            {
                let position = part.id;
                let value = primitive(part, "SubstringFilter.substring")?;
                if i > 0 || position != 0 {
                    pattern.push('*');
                }
                pattern.push_str(&String::from_utf8_lossy(&value));
                ends_with_any = position != 2;
            }
            if ends_with_any {
                pattern.push('*');
            }
            format!("({attr}={pattern})")
        }
        7 => format!("({}=*)", utf8(primitive(tag, "Filter.present")?)?),
        9 => "(extensibleMatch)".to_string(),
        other => return Err(malformed(format!("unknown filter choice [{other}]"))),
    };
    Ok(rendered)
}
