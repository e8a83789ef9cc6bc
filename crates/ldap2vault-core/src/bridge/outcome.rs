//! Results of a bind attempt.

use std::fmt;

use crate::network::message::{LdapResult, ResultCode};

/// Status of a bind attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    Success,
    InvalidCredentials,
    InvalidDnSyntax,
    InappropriateAuthentication,
}

impl BindStatus {
    /// LDAP result code sent to the client.
    #[must_use]
    pub fn result_code(self) -> ResultCode {
        match self {
            Self::Success => ResultCode::Success,
            Self::InvalidCredentials => ResultCode::InvalidCredentials,
            Self::InvalidDnSyntax => ResultCode::InvalidDnSyntax,
            Self::InappropriateAuthentication => ResultCode::InappropriateAuthentication,
        }
    }

    /// Metric label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidDnSyntax => "invalid_dn_syntax",
            Self::InappropriateAuthentication => "inappropriate_authentication",
        }
    }
}

impl fmt::Display for BindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which identity a bind was checked as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPhase {
    Application,
    User,
}

impl BindPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::User => "user",
        }
    }
}

/// Outcome of [`AuthenticationBridge::bind`](super::AuthenticationBridge::bind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    pub status: BindStatus,
    /// Diagnostic message for the client.
    pub message: Option<String>,
    /// `None` when the bind was rejected before a phase was chosen.
    pub phase: Option<BindPhase>,
}

impl BindOutcome {
    pub(crate) fn success(phase: BindPhase) -> Self {
        Self {
            status: BindStatus::Success,
            message: None,
            phase: Some(phase),
        }
    }

    pub(crate) fn failure(
        status: BindStatus,
        message: impl Into<String>,
        phase: Option<BindPhase>,
    ) -> Self {
        Self {
            status,
            message: Some(message.into()),
            phase,
        }
    }

    /// Whether the bind succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == BindStatus::Success
    }

    /// The `LDAPResult` of the BindResponse.
    #[must_use]
    pub fn to_ldap_result(&self) -> LdapResult {
        LdapResult::new(
            self.status.result_code(),
            self.message.clone().unwrap_or_default(),
        )
    }
}
