//! Shared test doubles: a scripted provider and recording hooks.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use flagkit::context::{EvaluationContext, FlattenedContext};
use flagkit::detail::{EvaluationDetail, ResolutionDetail};
use flagkit::error::{EvaluationError, Result};
use flagkit::events::EventDetails;
use flagkit::hook::{Hook, HookContext, HookHints};
use flagkit::provider::{FeatureProvider, ProviderMetadata, TrackingEventDetails};
use flagkit::scope::CallScope;
use flagkit::value::Value;

// ============================================================================
// Scripted provider
// ============================================================================

/// Provider test double with scripted flag responses and call recording.
pub struct ScriptedProvider {
    name: String,
    flags: Mutex<HashMap<String, ResolutionDetail>>,
    hooks: Vec<Arc<dyn Hook>>,
    init_delay: Option<Duration>,
    init_error: Option<EvaluationError>,
    shutdown_error: Option<EvaluationError>,
    events: Option<broadcast::Sender<EventDetails>>,
    /// Number of `initialize` calls observed.
    pub init_calls: AtomicUsize,
    /// Number of `shutdown` calls observed.
    pub shutdown_calls: AtomicUsize,
    /// Number of resolver calls observed.
    pub resolver_calls: AtomicUsize,
    /// Flattened contexts the resolvers received, in call order.
    pub seen_contexts: Mutex<Vec<FlattenedContext>>,
    /// Tracking calls observed as `(event_name, merged_context, details)`.
    pub tracked: Mutex<Vec<(String, EvaluationContext, TrackingEventDetails)>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: Mutex::new(HashMap::new()),
            hooks: Vec::new(),
            init_delay: None,
            init_error: None,
            shutdown_error: None,
            events: None,
            init_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            resolver_calls: AtomicUsize::new(0),
            seen_contexts: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Script the resolution returned for `flag_key` (any flag type).
    pub fn with_flag(self, flag_key: &str, detail: ResolutionDetail) -> Self {
        self.flags
            .lock()
            .unwrap()
            .insert(flag_key.to_string(), detail);
        self
    }

    /// Attach a provider-level hook.
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Make `initialize` sleep before settling.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// Make `initialize` fail.
    pub fn with_init_error(mut self, error: EvaluationError) -> Self {
        self.init_error = Some(error);
        self
    }

    /// Make `shutdown` fail.
    pub fn with_shutdown_error(mut self, error: EvaluationError) -> Self {
        self.shutdown_error = Some(error);
        self
    }

    /// Expose an event stream; use [`ScriptedProvider::emit`] to push events.
    pub fn with_event_stream(mut self) -> Self {
        let (tx, _rx) = broadcast::channel(16);
        self.events = Some(tx);
        self
    }

    /// Push an event into the stream (no-op without `with_event_stream`).
    pub fn emit(&self, details: EventDetails) {
        if let Some(tx) = &self.events {
            let _ = tx.send(details);
        }
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn resolver_count(&self) -> usize {
        self.resolver_calls.load(Ordering::SeqCst)
    }

    /// The last flattened context a resolver received.
    pub fn last_context(&self) -> Option<FlattenedContext> {
        self.seen_contexts.lock().unwrap().last().cloned()
    }

    fn answer(&self, flag_key: &str, ctx: &FlattenedContext) -> ResolutionDetail {
        self.resolver_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_contexts.lock().unwrap().push(ctx.clone());
        self.flags
            .lock()
            .unwrap()
            .get(flag_key)
            .cloned()
            .unwrap_or_else(|| {
                ResolutionDetail::from_error(EvaluationError::flag_not_found(flag_key))
            })
    }
}

#[async_trait]
impl FeatureProvider for ScriptedProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(self.name.clone())
    }

    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks.clone()
    }

    async fn resolve_bool(
        &self,
        _scope: &CallScope,
        flag_key: &str,
        _default: bool,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        self.answer(flag_key, ctx)
    }

    async fn resolve_string(
        &self,
        _scope: &CallScope,
        flag_key: &str,
        _default: &str,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        self.answer(flag_key, ctx)
    }

    async fn resolve_int(
        &self,
        _scope: &CallScope,
        flag_key: &str,
        _default: i64,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        self.answer(flag_key, ctx)
    }

    async fn resolve_float(
        &self,
        _scope: &CallScope,
        flag_key: &str,
        _default: f64,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        self.answer(flag_key, ctx)
    }

    async fn resolve_object(
        &self,
        _scope: &CallScope,
        flag_key: &str,
        _default: &Value,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        self.answer(flag_key, ctx)
    }

    async fn initialize(&self, _scope: &CallScope, _ctx: &EvaluationContext) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn shutdown(&self, _scope: &CallScope) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        match &self.shutdown_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn event_stream(&self) -> Option<broadcast::Receiver<EventDetails>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }

    async fn track(
        &self,
        _scope: &CallScope,
        event_name: &str,
        ctx: &EvaluationContext,
        details: &TrackingEventDetails,
    ) {
        self.tracked
            .lock()
            .unwrap()
            .push((event_name.to_string(), ctx.clone(), details.clone()));
    }
}

// ============================================================================
// Recording hook
// ============================================================================

/// Shared log of hook-stage invocations, as `"name:stage"` entries.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Hook that records every stage call and can be scripted to fail, attach a
/// transaction context, or panic in `finally`.
pub struct RecordingHook {
    name: String,
    log: CallLog,
    before_error: Option<EvaluationError>,
    after_error: Option<EvaluationError>,
    transaction: Option<EvaluationContext>,
    finally_panics: bool,
}

impl RecordingHook {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            before_error: None,
            after_error: None,
            transaction: None,
            finally_panics: false,
        }
    }

    pub fn with_before_error(mut self, error: EvaluationError) -> Self {
        self.before_error = Some(error);
        self
    }

    pub fn with_after_error(mut self, error: EvaluationError) -> Self {
        self.after_error = Some(error);
        self
    }

    /// `before` returns a scope carrying this transaction context (merged
    /// over any existing one).
    pub fn with_transaction(mut self, ctx: EvaluationContext) -> Self {
        self.transaction = Some(ctx);
        self
    }

    pub fn with_finally_panic(mut self) -> Self {
        self.finally_panics = true;
        self
    }

    fn record(&self, stage: &str) {
        self.log.lock().unwrap().push(format!("{}:{stage}", self.name));
    }
}

#[async_trait]
impl Hook for RecordingHook {
    async fn before(
        &self,
        scope: &CallScope,
        _ctx: &HookContext,
        _hints: &HookHints,
    ) -> Result<Option<CallScope>> {
        self.record("before");
        if let Some(err) = &self.before_error {
            return Err(err.clone());
        }
        Ok(self
            .transaction
            .as_ref()
            .map(|ctx| scope.merge_transaction(ctx)))
    }

    async fn after(
        &self,
        _scope: &CallScope,
        _ctx: &HookContext,
        _detail: &EvaluationDetail<Value>,
        _hints: &HookHints,
    ) -> Result<()> {
        self.record("after");
        match &self.after_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn error(
        &self,
        _scope: &CallScope,
        _ctx: &HookContext,
        _error: &EvaluationError,
        _hints: &HookHints,
    ) {
        self.record("error");
    }

    async fn finally(
        &self,
        _scope: &CallScope,
        _ctx: &HookContext,
        _detail: &EvaluationDetail<Value>,
        _hints: &HookHints,
    ) {
        self.record("finally");
        assert!(!self.finally_panics, "scripted finally panic");
    }
}

/// Hook that captures the hints handed to each stage.
#[derive(Default)]
pub struct HintProbe {
    pub seen: Mutex<Vec<HookHints>>,
}

#[async_trait]
impl Hook for HintProbe {
    async fn before(
        &self,
        _scope: &CallScope,
        _ctx: &HookContext,
        hints: &HookHints,
    ) -> Result<Option<CallScope>> {
        self.seen.lock().unwrap().push(hints.clone());
        Ok(None)
    }

    async fn finally(
        &self,
        _scope: &CallScope,
        _ctx: &HookContext,
        _detail: &EvaluationDetail<Value>,
        hints: &HookHints,
    ) {
        self.seen.lock().unwrap().push(hints.clone());
    }
}

// ============================================================================
// Async test helpers
// ============================================================================

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
