//! Hooks — four-stage listeners wrapped around every evaluation.
//!
//! Hooks attach at four levels and compose into a single ordered chain:
//! global → client → invocation → provider. The `before` stage runs in that
//! forward order; `after`, `error`, and `finally` run reversed, mirroring the
//! middleware convention of request-order-in / response-order-out.
//!
//! # Stage contract
//!
//! - `before` may return a replacement [`CallScope`] (typically carrying a
//!   modified transaction context); the pipeline adopts it for everything
//!   that follows. A `before` failure skips the remaining `before` stages and
//!   the provider call entirely.
//! - `after` runs only on success; a failure there rejoins the error path.
//! - `error` observes the classified failure; it cannot itself fail.
//! - `finally` always runs, sees the final detail (default-on-error
//!   included), and must not propagate failures — panics are caught by the
//!   pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::ClientMetadata;
use crate::context::EvaluationContext;
use crate::detail::EvaluationDetail;
use crate::error::{EvaluationError, Result};
use crate::provider::ProviderMetadata;
use crate::scope::CallScope;
use crate::value::{FlagType, Value};

/// Opaque per-invocation data handed unchanged to every hook stage.
pub type HookHints = HashMap<String, Value>;

/// Evaluation state visible to hooks.
///
/// `evaluation_context` reflects the merged layers at the moment the stage
/// runs; a `before` hook that attaches a new transaction context sees the
/// re-merged result in subsequent stages.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Key of the flag being evaluated.
    pub flag_key: String,
    /// Requested flag type.
    pub flag_type: FlagType,
    /// The caller's default value.
    pub default_value: Value,
    /// Metadata of the client running the evaluation.
    pub client_metadata: ClientMetadata,
    /// Metadata of the provider answering it.
    pub provider_metadata: ProviderMetadata,
    /// The merged evaluation context at this stage.
    pub evaluation_context: EvaluationContext,
}

/// A four-stage evaluation listener.
///
/// All stages default to no-ops so implementations override only what they
/// need. Implementations must be `Send + Sync + 'static` because they are
/// shared as `Arc<dyn Hook>` across concurrent evaluations.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Runs before the provider call, in forward chain order.
    ///
    /// Return `Ok(Some(scope))` to swap in a derived scope (e.g. with a
    /// modified transaction context); `Ok(None)` leaves the current scope in
    /// place.
    async fn before(
        &self,
        scope: &CallScope,
        ctx: &HookContext,
        hints: &HookHints,
    ) -> Result<Option<CallScope>> {
        let _ = (scope, ctx, hints);
        Ok(None)
    }

    /// Runs after a successful resolution, in reverse chain order.
    async fn after(
        &self,
        scope: &CallScope,
        ctx: &HookContext,
        detail: &EvaluationDetail<Value>,
        hints: &HookHints,
    ) -> Result<()> {
        let _ = (scope, ctx, detail, hints);
        Ok(())
    }

    /// Runs when any stage or the provider fails, in reverse chain order.
    async fn error(
        &self,
        scope: &CallScope,
        ctx: &HookContext,
        error: &EvaluationError,
        hints: &HookHints,
    ) {
        let _ = (scope, ctx, error, hints);
    }

    /// Always runs last, in reverse chain order, with the final detail.
    async fn finally(
        &self,
        scope: &CallScope,
        ctx: &HookContext,
        detail: &EvaluationDetail<Value>,
        hints: &HookHints,
    ) {
        let _ = (scope, ctx, detail, hints);
    }
}

/// Per-invocation evaluation options: extra hooks and hook hints.
#[derive(Clone, Default)]
pub struct EvaluationOptions {
    hooks: Vec<Arc<dyn Hook>>,
    hints: HookHints,
}

impl EvaluationOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook at the invocation level.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Add one hook hint.
    #[must_use]
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Invocation-level hooks, in append order.
    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn Hook>] {
        &self.hooks
    }

    /// Hints passed to every hook stage.
    #[must_use]
    pub fn hints(&self) -> &HookHints {
        &self.hints
    }
}

impl fmt::Debug for EvaluationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationOptions")
            .field("hooks", &self.hooks.len())
            .field("hints", &self.hints)
            .finish()
    }
}
