//! Provider abstraction — pluggable flag backends behind one trait.
//!
//! This module decouples the evaluation pipeline from any specific
//! flag-management system: every backend (remote evaluation service, local
//! rules engine, static file, test double) sits behind [`FeatureProvider`]
//! and is bound to a domain through the registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ProviderRegistry │  default + domain → Arc<dyn FeatureProvider>
//! └────────┬─────────┘
//!          │ for_evaluation(domain)
//!          ▼
//! ┌──────────────────┐   optional capabilities
//! │ FeatureProvider  │── initialize / shutdown   (lifecycle)
//! │  resolve_bool    │── event_stream            (eventing)
//! │  resolve_string  │── track                   (tracking)
//! │  resolve_int     │
//! │  resolve_float   │
//! │  resolve_object  │
//! └──────────────────┘
//! ```
//!
//! The required surface is metadata, provider hooks, and the five typed
//! resolvers. The optional capabilities have defaulted implementations: a
//! provider that does not participate in lifecycle trivially succeeds
//! initialization and is READY immediately.

mod noop;

pub use noop::NoOpProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::context::{EvaluationContext, FlattenedContext};
use crate::detail::ResolutionDetail;
use crate::error::Result;
use crate::events::EventDetails;
use crate::hook::Hook;
use crate::scope::CallScope;
use crate::value::Value;

// ============================================================================
// Metadata & tracking payloads
// ============================================================================

/// Identifying metadata for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
    name: String,
}

impl ProviderMetadata {
    /// Create metadata with the given provider name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Unique, stable name of the provider implementation.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Payload for the optional tracking capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingEventDetails {
    /// Numeric measurement attached to the event, if any.
    pub value: Option<f64>,
    /// Arbitrary event attributes.
    pub attributes: HashMap<String, Value>,
}

impl TrackingEventDetails {
    /// Create an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a numeric measurement.
    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Add one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// FeatureProvider trait
// ============================================================================

/// A source of flag resolutions.
///
/// Resolvers receive the flattened evaluation context (targeting key under
/// the reserved `targetingKey` attribute) and answer with a
/// [`ResolutionDetail`]. They may block for network I/O; the registry lock is
/// never held across a resolver call. Failures are signalled in the detail's
/// `error` field, not by panicking.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be stored in
/// `Arc<dyn FeatureProvider>` and shared across tasks; the same instance may
/// be bound to several domains at once.
#[async_trait]
pub trait FeatureProvider: Send + Sync + 'static {
    /// Identifying metadata.
    fn metadata(&self) -> ProviderMetadata;

    /// Provider-supplied hooks, appended after invocation hooks.
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    /// Resolve a boolean flag.
    async fn resolve_bool(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: bool,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail;

    /// Resolve a string flag.
    async fn resolve_string(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: &str,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail;

    /// Resolve a 64-bit integer flag.
    async fn resolve_int(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: i64,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail;

    /// Resolve a 64-bit float flag.
    async fn resolve_float(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: f64,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail;

    /// Resolve a dynamic (object) flag.
    async fn resolve_object(
        &self,
        scope: &CallScope,
        flag_key: &str,
        default: &Value,
        ctx: &FlattenedContext,
    ) -> ResolutionDetail;

    /// Optional lifecycle: cooperative setup before the provider serves
    /// evaluations.
    ///
    /// Called by the registry after the binding is swapped in, outside the
    /// registry lock, with the global evaluation context. The scope's
    /// cancellation token and deadline are honored by the registry; a
    /// provider that blocks past them is reported as `cancelled` / `timeout`.
    ///
    /// # Errors
    ///
    /// An error is broadcast as a `PROVIDER_ERROR` event (fatal errors keep
    /// their `PROVIDER_FATAL` code) and, for the waiting registration form,
    /// returned to the caller.
    async fn initialize(&self, scope: &CallScope, ctx: &EvaluationContext) -> Result<()> {
        let _ = (scope, ctx);
        Ok(())
    }

    /// Optional lifecycle: cooperative teardown.
    ///
    /// Invoked exactly once per instance, when its last binding is released.
    ///
    /// # Errors
    ///
    /// Errors from background teardown are logged, never raised.
    async fn shutdown(&self, scope: &CallScope) -> Result<()> {
        let _ = scope;
        Ok(())
    }

    /// Optional eventing: a stream of provider-emitted lifecycle events.
    ///
    /// Called once per binding; each call must return a fresh receiver. The
    /// registry forwards the stream into the event dispatcher under the
    /// binding's domain until the binding is replaced or torn down.
    fn event_stream(&self) -> Option<broadcast::Receiver<EventDetails>> {
        None
    }

    /// Optional tracking: record an occurrence of `event_name` with the
    /// merged evaluation context. The default silently no-ops.
    async fn track(
        &self,
        scope: &CallScope,
        event_name: &str,
        ctx: &EvaluationContext,
        details: &TrackingEventDetails,
    ) {
        let _ = (scope, event_name, ctx, details);
    }
}
