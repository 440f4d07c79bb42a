//! Evaluation contexts and their layering rules.
//!
//! A context is the targeting payload for one evaluation: an optional
//! targeting key plus arbitrary string-keyed attributes. Contexts exist at
//! four layers — global, transaction, client, invocation — and are merged
//! with fixed precedence before the provider sees them:
//!
//! ```text
//! global (lowest)  ⊕  transaction  ⊕  client  ⊕  invocation (highest)
//! ```
//!
//! Higher layers overwrite shared attribute keys; the targeting key is the
//! first non-empty one walking from the highest layer down.

use std::collections::HashMap;

use serde::Serialize;

use crate::value::Value;

/// Reserved attribute under which the targeting key appears in the flattened
/// context handed to providers.
pub const TARGETING_KEY_FIELD: &str = "targetingKey";

/// The flattened, single-level context shape providers receive.
pub type FlattenedContext = HashMap<String, Value>;

/// Targeting payload for an evaluation.
///
/// Immutable from the consumer's viewpoint: built once via the `with_*`
/// constructors, values copied in, no shared mutation afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationContext {
    targeting_key: Option<String>,
    attributes: HashMap<String, Value>,
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the targeting key.
    #[must_use]
    pub fn with_targeting_key(mut self, key: impl Into<String>) -> Self {
        self.targeting_key = Some(key.into());
        self
    }

    /// Add one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The targeting key, if one was set.
    #[must_use]
    pub fn targeting_key(&self) -> Option<&str> {
        self.targeting_key.as_deref()
    }

    /// Look up a single attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// All attributes (excluding the targeting key).
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Returns `true` when the context carries neither a non-empty targeting
    /// key nor any attribute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_targeting_key() && self.attributes.is_empty()
    }

    fn has_targeting_key(&self) -> bool {
        self.targeting_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Merge `higher` into `self`, with `higher` winning.
    ///
    /// Shared attribute keys are overwritten by `higher`; `higher`'s targeting
    /// key replaces the current one only when it is non-empty.
    pub fn merge(&mut self, higher: &EvaluationContext) {
        if higher.has_targeting_key() {
            self.targeting_key = higher.targeting_key.clone();
        }
        for (key, value) in &higher.attributes {
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    /// Merge a stack of layers, lowest precedence first.
    #[must_use]
    pub fn layered(layers: &[&EvaluationContext]) -> EvaluationContext {
        let mut merged = EvaluationContext::new();
        for layer in layers {
            merged.merge(layer);
        }
        merged
    }

    /// Flatten into the single-level shape providers receive.
    ///
    /// A non-empty targeting key appears under [`TARGETING_KEY_FIELD`] so
    /// providers can read it uniformly.
    #[must_use]
    pub fn flattened(&self) -> FlattenedContext {
        let mut flat = self.attributes.clone();
        if let Some(key) = self.targeting_key.as_deref() {
            if !key.is_empty() {
                flat.insert(TARGETING_KEY_FIELD.to_string(), Value::from(key));
            }
        }
        flat
    }
}
