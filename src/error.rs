//! Error types for flag evaluation
//!
//! Failures are classified by an [`ErrorCode`] taxonomy shared between
//! providers and callers, carried by [`EvaluationError`]. Value-form
//! evaluations never surface these — they silently fall back to the caller's
//! default; details-form evaluations embed the error in the returned detail.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for flagkit
pub type Result<T> = std::result::Result<T, EvaluationError>;

/// Classification of an evaluation failure.
///
/// Serialized (and displayed) in the canonical `SCREAMING_SNAKE_CASE` wire
/// form, e.g. `PROVIDER_NOT_READY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The provider bound to the evaluated domain has not finished
    /// initializing.
    ProviderNotReady,
    /// The provider has no flag under the requested key.
    FlagNotFound,
    /// The flag key or configuration could not be parsed.
    ParseError,
    /// The resolved value is not assignable to the requested flag type.
    TypeMismatch,
    /// The provider requires a targeting key and none was supplied.
    TargetingKeyMissing,
    /// The merged evaluation context was rejected by the provider.
    InvalidContext,
    /// The provider entered an irrecoverable state.
    ProviderFatal,
    /// Any failure not covered by a more specific code.
    General,
}

impl ErrorCode {
    /// Canonical wire form of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderNotReady => "PROVIDER_NOT_READY",
            Self::FlagNotFound => "FLAG_NOT_FOUND",
            Self::ParseError => "PARSE_ERROR",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::TargetingKeyMissing => "TARGETING_KEY_MISSING",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::ProviderFatal => "PROVIDER_FATAL",
            Self::General => "GENERAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified evaluation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct EvaluationError {
    /// Failure classification.
    pub code: ErrorCode,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

impl EvaluationError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Create an error carrying only a code.
    #[must_use]
    pub fn code(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// The bound provider has not completed initialization.
    #[must_use]
    pub fn provider_not_ready() -> Self {
        Self::code(ErrorCode::ProviderNotReady)
    }

    /// The bound provider is in an irrecoverable state.
    pub fn provider_fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderFatal, message)
    }

    /// No flag exists under `flag_key`.
    pub fn flag_not_found(flag_key: impl Into<String>) -> Self {
        Self::new(ErrorCode::FlagNotFound, flag_key)
    }

    /// The resolved value does not match the requested type.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeMismatch, message)
    }

    /// The provider requires a targeting key.
    #[must_use]
    pub fn targeting_key_missing() -> Self {
        Self::code(ErrorCode::TargetingKeyMissing)
    }

    /// The evaluation context was rejected.
    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidContext, message)
    }

    /// A parsing failure.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    /// An unclassified failure.
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::General, message)
    }

    /// Returns `true` when the error marks the provider as irrecoverable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.code == ErrorCode::ProviderFatal
    }
}
