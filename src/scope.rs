//! Per-call scopes: cancellation, deadlines, and transaction context.
//!
//! A [`CallScope`] is the explicit scope object threaded through every
//! operation that may suspend — evaluations, provider initialization, and
//! shutdown. It carries three things:
//!
//! - a [`CancellationToken`] honored by all blocking points,
//! - an optional deadline, enforced with `tokio::time::timeout`,
//! - an optional **transaction context**: an [`EvaluationContext`] attached
//!   to the call chain so hooks and the pipeline pick it up without explicit
//!   threading.
//!
//! Scopes are cheap to clone; derived scopes share the parent's cancellation
//! token, so cancelling the parent cancels everything derived from it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::context::EvaluationContext;
use crate::error::EvaluationError;

/// Why a scope stopped admitting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The cancellation token fired.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl Interruption {
    /// Short message used on events and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "timeout",
        }
    }
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Interruption> for EvaluationError {
    fn from(interruption: Interruption) -> Self {
        EvaluationError::general(interruption.as_str())
    }
}

/// Ambient scope for one call chain.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    transaction: Option<Arc<EvaluationContext>>,
}

impl CallScope {
    /// Create a scope with no deadline and no transaction context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The scope's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Set a deadline `after` from now.
    #[must_use]
    pub fn with_deadline(mut self, after: Duration) -> Self {
        self.deadline = Some(Instant::now() + after);
        self
    }

    /// Time left until the deadline, if one is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Classify whether the scope still admits work.
    #[must_use]
    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancellation.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Some(Interruption::DeadlineExceeded);
        }
        None
    }

    /// Derive a scope carrying `ctx` as its transaction context.
    ///
    /// Any previously attached transaction context is replaced.
    #[must_use]
    pub fn with_transaction(&self, ctx: EvaluationContext) -> Self {
        let mut derived = self.clone();
        derived.transaction = Some(Arc::new(ctx));
        derived
    }

    /// The attached transaction context, or an empty context if none.
    #[must_use]
    pub fn transaction(&self) -> EvaluationContext {
        self.transaction
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    /// Derive a scope whose transaction context is the existing one merged
    /// with `ctx`, with `ctx` winning on shared keys.
    #[must_use]
    pub fn merge_transaction(&self, ctx: &EvaluationContext) -> Self {
        let mut merged = self.transaction();
        merged.merge(ctx);
        self.with_transaction(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_defaults_to_empty() {
        let scope = CallScope::new();
        assert!(scope.transaction().is_empty());
    }

    #[test]
    fn with_transaction_replaces_and_merge_combines() {
        let scope = CallScope::new()
            .with_transaction(EvaluationContext::new().with_attribute("a", 1i64));

        let replaced =
            scope.with_transaction(EvaluationContext::new().with_attribute("b", 2i64));
        assert!(replaced.transaction().attribute("a").is_none());

        let merged =
            scope.merge_transaction(&EvaluationContext::new().with_attribute("a", 9i64));
        assert_eq!(
            merged.transaction().attribute("a"),
            Some(&crate::value::Value::Int(9))
        );
    }

    #[test]
    fn merge_transaction_keeps_disjoint_keys() {
        let scope = CallScope::new()
            .with_transaction(EvaluationContext::new().with_attribute("a", 1i64))
            .merge_transaction(&EvaluationContext::new().with_attribute("b", 2i64));

        let tx = scope.transaction();
        assert!(tx.attribute("a").is_some());
        assert!(tx.attribute("b").is_some());
    }

    #[test]
    fn derived_scopes_share_cancellation() {
        let scope = CallScope::new();
        let derived = scope.with_transaction(EvaluationContext::new());
        scope.cancellation().cancel();
        assert_eq!(derived.interruption(), Some(Interruption::Cancelled));
    }

    #[test]
    fn expired_deadline_classifies_as_timeout() {
        let scope = CallScope::new().with_deadline(Duration::ZERO);
        assert_eq!(scope.interruption(), Some(Interruption::DeadlineExceeded));
        assert_eq!(
            EvaluationError::from(Interruption::DeadlineExceeded).message.as_deref(),
            Some("timeout")
        );
    }
}
