//! Client façade and the evaluation pipeline.
//!
//! A [`Client`] binds one domain to every evaluation it runs, carries the
//! client-level hook and context layers, and forwards event-handler
//! registration to the dispatcher's per-domain registry.
//!
//! # Pipeline
//!
//! One evaluation flows through a fixed sequence:
//!
//! 1. snapshot `(provider, global hooks, global context)` from the registry,
//! 2. merge context layers: global ⊕ transaction ⊕ client ⊕ invocation,
//! 3. `before` hooks forward (global → client → invocation → provider),
//! 4. domain-state short-circuit (skipped for the no-op sentinel),
//! 5. the typed provider resolver, then an assignability check,
//! 6. `after` hooks reversed on success, `error` hooks reversed on failure,
//! 7. `finally` hooks reversed, always.
//!
//! Value-form evaluations collapse every failure into the caller's default;
//! details-form evaluations expose the classified error on the detail.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::EvaluationContext;
use crate::detail::{EvaluationDetail, FlagMetadata, Reason, ResolutionDetail};
use crate::error::EvaluationError;
use crate::events::{DomainState, EventHandler, ProviderEventKind};
use crate::hook::{EvaluationOptions, Hook, HookContext, HookHints};
use crate::provider::TrackingEventDetails;
use crate::registry::{EvaluationTarget, ProviderRegistry};
use crate::scope::CallScope;
use crate::value::{FlagType, Value};

/// Immutable identifying metadata for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientMetadata {
    domain: String,
}

impl ClientMetadata {
    pub(crate) fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// The domain this client evaluates against (empty = default).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// Domain-bound evaluation façade.
///
/// All methods are safe for concurrent use; the client-local hook and context
/// layers sit behind a read-write lock and are snapshotted at the start of
/// each evaluation, so an in-flight evaluation never observes a mid-update
/// mixture.
pub struct Client {
    metadata: ClientMetadata,
    registry: Arc<ProviderRegistry>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
    context: RwLock<EvaluationContext>,
}

impl Client {
    pub(crate) fn new(registry: Arc<ProviderRegistry>, domain: &str) -> Self {
        Self {
            metadata: ClientMetadata::new(domain),
            registry,
            hooks: RwLock::new(Vec::new()),
            context: RwLock::new(EvaluationContext::new()),
        }
    }

    /// This client's immutable metadata.
    #[must_use]
    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    /// The domain this client evaluates against.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.metadata.domain()
    }

    /// Replace the client-level evaluation context layer.
    pub fn set_evaluation_context(&self, ctx: EvaluationContext) {
        *self.context.write() = ctx;
    }

    /// Snapshot of the client-level evaluation context layer.
    #[must_use]
    pub fn evaluation_context(&self) -> EvaluationContext {
        self.context.read().clone()
    }

    /// Append hooks at the client level.
    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.hooks.write().extend(hooks);
    }

    /// Register an event handler scoped to this client's domain.
    pub fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) {
        self.registry
            .dispatcher()
            .add_domain_handler(self.domain(), kind, handler);
    }

    /// Remove a previously registered handler (by identity).
    pub fn remove_handler(&self, kind: ProviderEventKind, handler: &EventHandler) {
        self.registry
            .dispatcher()
            .remove_domain_handler(self.domain(), kind, handler);
    }

    /// Record an occurrence of `event_name` with the bound provider.
    ///
    /// Routes to the provider's tracking capability with the fully merged
    /// evaluation context; providers without the capability silently no-op.
    pub async fn track(
        &self,
        scope: &CallScope,
        event_name: &str,
        ctx: Option<&EvaluationContext>,
        details: &TrackingEventDetails,
    ) {
        let target = self.registry.for_evaluation(self.domain());
        let client_ctx = self.context.read().clone();
        let invocation = ctx.cloned().unwrap_or_default();
        let merged = merge_layers(&target.context, scope, &client_ctx, &invocation);
        target.provider.track(scope, event_name, &merged, details).await;
    }

    // ── Typed evaluation surface ─────────────────────────────────────────────

    /// Evaluate a boolean flag; errors collapse to `default`.
    pub async fn bool_value(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: bool,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> bool {
        self.bool_details(scope, flag_key, default, ctx, options)
            .await
            .value
    }

    /// Evaluate a boolean flag with full resolution details.
    pub async fn bool_details(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: bool,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<bool> {
        let detail = self
            .evaluate(scope, flag_key, FlagType::Bool, Value::Bool(default), ctx, options)
            .await;
        typed_detail(detail, |v| v.as_bool(), default)
    }

    /// Evaluate a string flag; errors collapse to `default`.
    pub async fn string_value(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: impl Into<String>,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> String {
        self.string_details(scope, flag_key, default, ctx, options)
            .await
            .value
    }

    /// Evaluate a string flag with full resolution details.
    pub async fn string_details(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: impl Into<String>,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<String> {
        let default = default.into();
        let detail = self
            .evaluate(
                scope,
                flag_key,
                FlagType::String,
                Value::String(default.clone()),
                ctx,
                options,
            )
            .await;
        typed_detail(detail, |v| v.as_str().map(ToOwned::to_owned), default)
    }

    /// Evaluate a 64-bit integer flag; errors collapse to `default`.
    pub async fn int_value(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: i64,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> i64 {
        self.int_details(scope, flag_key, default, ctx, options)
            .await
            .value
    }

    /// Evaluate a 64-bit integer flag with full resolution details.
    pub async fn int_details(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: i64,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<i64> {
        let detail = self
            .evaluate(scope, flag_key, FlagType::Int, Value::Int(default), ctx, options)
            .await;
        typed_detail(detail, |v| v.as_int(), default)
    }

    /// Evaluate a 64-bit float flag; errors collapse to `default`.
    pub async fn float_value(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: f64,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> f64 {
        self.float_details(scope, flag_key, default, ctx, options)
            .await
            .value
    }

    /// Evaluate a 64-bit float flag with full resolution details.
    pub async fn float_details(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: f64,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<f64> {
        let detail = self
            .evaluate(scope, flag_key, FlagType::Float, Value::Float(default), ctx, options)
            .await;
        typed_detail(detail, |v| v.as_float(), default)
    }

    /// Evaluate a dynamic (object) flag; errors collapse to `default`.
    pub async fn object_value(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: Value,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> Value {
        self.object_details(scope, flag_key, default, ctx, options)
            .await
            .value
    }

    /// Evaluate a dynamic (object) flag with full resolution details.
    ///
    /// The provider's dynamic value passes through without an assignability
    /// check.
    pub async fn object_details(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: Value,
        ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<Value> {
        self.evaluate(scope, flag_key, FlagType::Object, default, ctx, options)
            .await
    }

    // ── Pipeline internals ───────────────────────────────────────────────────

    /// Run the full hook-wrapped evaluation for one flag.
    async fn evaluate(
        &self,
        scope: &CallScope,
        flag_key: &str,
        flag_type: FlagType,
        default: Value,
        invocation_ctx: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetail<Value> {
        let target = self.registry.for_evaluation(self.domain());
        let client_ctx = self.context.read().clone();
        let invocation_ctx = invocation_ctx.cloned().unwrap_or_default();
        let hints: HookHints = options.map(|o| o.hints().clone()).unwrap_or_default();

        // Hook chain in before-order: global → client → invocation → provider.
        let mut hooks = target.hooks.clone();
        hooks.extend(self.hooks.read().iter().cloned());
        if let Some(options) = options {
            hooks.extend(options.hooks().iter().cloned());
        }
        hooks.extend(target.provider.hooks());

        let mut scope = scope.clone();
        let mut hook_ctx = HookContext {
            flag_key: flag_key.to_string(),
            flag_type,
            default_value: default.clone(),
            client_metadata: self.metadata.clone(),
            provider_metadata: target.provider.metadata(),
            evaluation_context: merge_layers(&target.context, &scope, &client_ctx, &invocation_ctx),
        };

        // Before stage, forward order. A failure skips the rest of the stage
        // and the provider call.
        let mut failure: Option<EvaluationError> = None;
        for hook in &hooks {
            match hook.before(&scope, &hook_ctx, &hints).await {
                Ok(None) => {}
                Ok(Some(updated)) => {
                    // The replacement scope's transaction context flows into
                    // everything downstream.
                    scope = updated;
                    hook_ctx.evaluation_context =
                        merge_layers(&target.context, &scope, &client_ctx, &invocation_ctx);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // An interrupted scope never reaches the provider.
        if failure.is_none() {
            failure = scope.interruption().map(Into::into);
        }

        // Domain-state short-circuit. The no-op sentinel predates any
        // lifecycle event and is exempt.
        if failure.is_none() && !target.provider_is_noop {
            failure = match self.registry.dispatcher().domain_state(&target.state_domain) {
                DomainState::NotReady => Some(EvaluationError::provider_not_ready()),
                DomainState::Fatal => Some(EvaluationError::provider_fatal(
                    "provider entered an irrecoverable state",
                )),
                _ => None,
            };
        }

        let mut detail = match failure {
            Some(err) => {
                error_detail(flag_key, flag_type, default.clone(), err, FlagMetadata::new())
            }
            None => {
                let resolution = resolve(&target, &scope, flag_key, flag_type, &default, &hook_ctx).await;
                fold_resolution(flag_key, flag_type, default.clone(), resolution)
            }
        };

        // After stage, reverse order; a failure rejoins the error path.
        if detail.error.is_none() {
            for hook in hooks.iter().rev() {
                if let Err(err) = hook.after(&scope, &hook_ctx, &detail, &hints).await {
                    let metadata = detail.flag_metadata.clone();
                    detail = error_detail(flag_key, flag_type, default.clone(), err, metadata);
                    break;
                }
            }
        }

        // Error stage, reverse order.
        if let Some(err) = detail.error.clone() {
            debug!(
                flag_key = %flag_key,
                domain = %self.domain(),
                code = %err.code,
                "Evaluation fell back to the default value"
            );
            for hook in hooks.iter().rev() {
                hook.error(&scope, &hook_ctx, &err, &hints).await;
            }
        }

        // Finally stage, reverse order, unconditionally. Panics stay here.
        for hook in hooks.iter().rev() {
            let stage = hook.finally(&scope, &hook_ctx, &detail, &hints);
            if AssertUnwindSafe(stage).catch_unwind().await.is_err() {
                warn!(flag_key = %flag_key, "finally hook panicked; continuing");
            }
        }

        detail
    }
}

// ============================================================================
// Pipeline helpers
// ============================================================================

/// Merge the four context layers with fixed precedence.
fn merge_layers(
    global: &EvaluationContext,
    scope: &CallScope,
    client: &EvaluationContext,
    invocation: &EvaluationContext,
) -> EvaluationContext {
    let transaction = scope.transaction();
    EvaluationContext::layered(&[global, &transaction, client, invocation])
}

/// Dispatch to the provider resolver matching the requested type.
async fn resolve(
    target: &EvaluationTarget,
    scope: &CallScope,
    flag_key: &str,
    flag_type: FlagType,
    default: &Value,
    hook_ctx: &HookContext,
) -> ResolutionDetail {
    let flat = hook_ctx.evaluation_context.flattened();
    let provider = &target.provider;
    match flag_type {
        FlagType::Bool => {
            provider
                .resolve_bool(scope, flag_key, default.as_bool().unwrap_or_default(), &flat)
                .await
        }
        FlagType::String => {
            provider
                .resolve_string(scope, flag_key, default.as_str().unwrap_or_default(), &flat)
                .await
        }
        FlagType::Int => {
            provider
                .resolve_int(scope, flag_key, default.as_int().unwrap_or_default(), &flat)
                .await
        }
        FlagType::Float => {
            provider
                .resolve_float(scope, flag_key, default.as_float().unwrap_or_default(), &flat)
                .await
        }
        FlagType::Object => provider.resolve_object(scope, flag_key, default, &flat).await,
    }
}

/// Fold a provider resolution into the caller-facing detail, applying the
/// post-call assignability check for the typed flavors.
fn fold_resolution(
    flag_key: &str,
    flag_type: FlagType,
    default: Value,
    resolution: ResolutionDetail,
) -> EvaluationDetail<Value> {
    if let Some(err) = resolution.error {
        return error_detail(flag_key, flag_type, default, err, resolution.flag_metadata);
    }
    match resolution.value {
        Some(value) if value.conforms_to(flag_type) => EvaluationDetail {
            flag_key: flag_key.to_string(),
            flag_type,
            value,
            variant: resolution.variant,
            reason: resolution.reason,
            error: None,
            flag_metadata: resolution.flag_metadata,
        },
        Some(value) => {
            let err = EvaluationError::type_mismatch(format!(
                "expected {flag_type}, got {}",
                value.kind()
            ));
            error_detail(flag_key, flag_type, default, err, resolution.flag_metadata)
        }
        None => error_detail(
            flag_key,
            flag_type,
            default,
            EvaluationError::general("provider returned no value"),
            resolution.flag_metadata,
        ),
    }
}

/// Default-valued detail carrying a classified error.
fn error_detail(
    flag_key: &str,
    flag_type: FlagType,
    default: Value,
    error: EvaluationError,
    flag_metadata: FlagMetadata,
) -> EvaluationDetail<Value> {
    EvaluationDetail {
        flag_key: flag_key.to_string(),
        flag_type,
        value: default,
        variant: None,
        reason: Reason::Error,
        error: Some(error),
        flag_metadata,
    }
}

/// Narrow a dynamic detail to the caller's type. A value that does not
/// narrow falls back to the default; the assignability check upstream makes
/// that path unreachable for conforming providers.
fn typed_detail<T>(
    detail: EvaluationDetail<Value>,
    extract: impl Fn(&Value) -> Option<T>,
    default: T,
) -> EvaluationDetail<T> {
    let EvaluationDetail {
        flag_key,
        flag_type,
        value,
        variant,
        reason,
        error,
        flag_metadata,
    } = detail;
    EvaluationDetail {
        flag_key,
        flag_type,
        value: extract(&value).unwrap_or(default),
        variant,
        reason,
        error,
        flag_metadata,
    }
}
