//! Resolution and evaluation result types.
//!
//! Providers answer one lookup with a [`ResolutionDetail`] (dynamic value +
//! reason + variant + optional error + metadata). The pipeline folds that
//! into the typed [`EvaluationDetail`] handed back to callers.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::error::EvaluationError;
use crate::value::{FlagType, Value};

/// Why a resolution produced the value it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag has a single static value.
    Static,
    /// The caller's default was returned.
    Default,
    /// A targeting rule matched the evaluation context.
    TargetingMatch,
    /// The value was chosen by a pseudorandom split.
    Split,
    /// The value came from a provider-internal cache.
    Cached,
    /// The flag is disabled in the management system.
    Disabled,
    /// The provider could not classify the outcome.
    Unknown,
    /// The value may be out of date.
    Stale,
    /// The evaluation failed; see the attached error.
    Error,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Static => "STATIC",
            Self::Default => "DEFAULT",
            Self::TargetingMatch => "TARGETING_MATCH",
            Self::Split => "SPLIT",
            Self::Cached => "CACHED",
            Self::Disabled => "DISABLED",
            Self::Unknown => "UNKNOWN",
            Self::Stale => "STALE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Flag metadata
// ============================================================================

/// A single flag-metadata value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean field.
    Bool(bool),
    /// Integer field.
    Int(i64),
    /// Float field.
    Float(f64),
    /// String field.
    String(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Failure of a typed [`FlagMetadata`] accessor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagMetadataError {
    /// No field exists under the requested key.
    #[error("metadata field not found: {0}")]
    Missing(String),
    /// The field exists but holds a different type.
    #[error("metadata field {key} is not a {expected}")]
    TypeMismatch {
        /// Requested field key.
        key: String,
        /// The type the accessor asked for.
        expected: &'static str,
    },
}

/// Provider-populated metadata attached to one flag resolution.
///
/// Read-only after return; the typed accessors distinguish a missing field
/// from one holding the wrong type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagMetadata {
    #[serde(flatten)]
    fields: HashMap<String, MetadataValue>,
}

impl FlagMetadata {
    /// Create empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Raw field lookup.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    /// Returns `true` when no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Boolean field accessor.
    pub fn bool_field(&self, key: &str) -> Result<bool, FlagMetadataError> {
        match self.require(key)? {
            MetadataValue::Bool(b) => Ok(*b),
            _ => Err(Self::mismatch(key, "bool")),
        }
    }

    /// String field accessor.
    pub fn string_field(&self, key: &str) -> Result<String, FlagMetadataError> {
        match self.require(key)? {
            MetadataValue::String(s) => Ok(s.clone()),
            _ => Err(Self::mismatch(key, "string")),
        }
    }

    /// Integer field accessor.
    pub fn int_field(&self, key: &str) -> Result<i64, FlagMetadataError> {
        match self.require(key)? {
            MetadataValue::Int(i) => Ok(*i),
            _ => Err(Self::mismatch(key, "int")),
        }
    }

    /// Float field accessor.
    pub fn float_field(&self, key: &str) -> Result<f64, FlagMetadataError> {
        match self.require(key)? {
            MetadataValue::Float(f) => Ok(*f),
            _ => Err(Self::mismatch(key, "float")),
        }
    }

    fn require(&self, key: &str) -> Result<&MetadataValue, FlagMetadataError> {
        self.fields
            .get(key)
            .ok_or_else(|| FlagMetadataError::Missing(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str) -> FlagMetadataError {
        FlagMetadataError::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }
}

// ============================================================================
// Resolution / evaluation details
// ============================================================================

/// A provider's full response for one lookup.
///
/// `value` is `None` exactly when the provider signals an error; the pipeline
/// substitutes the caller's default on that path.
#[derive(Debug, Clone)]
pub struct ResolutionDetail {
    /// Resolved dynamic value; `None` on error.
    pub value: Option<Value>,
    /// Name of the variant that produced the value.
    pub variant: Option<String>,
    /// Why this value was chosen.
    pub reason: Reason,
    /// Provider-signalled failure, if any.
    pub error: Option<EvaluationError>,
    /// Flag metadata attached by the provider.
    pub flag_metadata: FlagMetadata,
}

impl ResolutionDetail {
    /// Successful resolution.
    pub fn new(value: impl Into<Value>, reason: Reason) -> Self {
        Self {
            value: Some(value.into()),
            variant: None,
            reason,
            error: None,
            flag_metadata: FlagMetadata::new(),
        }
    }

    /// Failed resolution; the pipeline will fall back to the default.
    #[must_use]
    pub fn from_error(error: EvaluationError) -> Self {
        Self {
            value: None,
            variant: None,
            reason: Reason::Error,
            error: Some(error),
            flag_metadata: FlagMetadata::new(),
        }
    }

    /// Attach a variant name.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Attach flag metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: FlagMetadata) -> Self {
        self.flag_metadata = metadata;
        self
    }
}

/// The pipeline's response to the caller for one evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationDetail<T> {
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// The type the caller requested.
    pub flag_type: FlagType,
    /// Typed value: the resolved one, or the caller's default on failure.
    pub value: T,
    /// Variant name, when the provider reported one.
    pub variant: Option<String>,
    /// Why this value was returned.
    pub reason: Reason,
    /// Classified failure; `None` on success.
    pub error: Option<EvaluationError>,
    /// Flag metadata attached by the provider.
    pub flag_metadata: FlagMetadata,
}

impl<T> EvaluationDetail<T> {
    /// Returns `true` when the evaluation failed and `value` is the default.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accessors_distinguish_missing_from_mismatch() {
        let meta = FlagMetadata::new()
            .with_field("enabled", true)
            .with_field("weight", 0.5)
            .with_field("bucket", 3i64)
            .with_field("owner", "growth-team");

        assert_eq!(meta.bool_field("enabled"), Ok(true));
        assert_eq!(meta.float_field("weight"), Ok(0.5));
        assert_eq!(meta.int_field("bucket"), Ok(3));
        assert_eq!(meta.string_field("owner"), Ok("growth-team".to_string()));

        assert_eq!(
            meta.bool_field("missing"),
            Err(FlagMetadataError::Missing("missing".to_string()))
        );
        assert_eq!(
            meta.int_field("owner"),
            Err(FlagMetadataError::TypeMismatch {
                key: "owner".to_string(),
                expected: "int",
            })
        );
    }

    #[test]
    fn error_resolution_has_no_value() {
        let detail = ResolutionDetail::from_error(EvaluationError::flag_not_found("nope"));
        assert!(detail.value.is_none());
        assert_eq!(detail.reason, Reason::Error);
        assert!(detail.error.is_some());
    }

    #[test]
    fn reason_displays_wire_form() {
        assert_eq!(Reason::TargetingMatch.to_string(), "TARGETING_MATCH");
        assert_eq!(Reason::Default.to_string(), "DEFAULT");
    }

    #[test]
    fn reason_serializes_like_display() {
        let json = serde_json::to_string(&Reason::TargetingMatch).unwrap();
        assert_eq!(json, "\"TARGETING_MATCH\"");
    }
}
