//! Process-wide API surface.
//!
//! An [`Api`] owns one registry + dispatcher pair. The crate exposes a
//! process-wide instance through [`global()`], but nothing is baked into the
//! types — embedded uses and tests instantiate their own `Api` and get fully
//! independent registries.

use std::sync::{Arc, LazyLock};

use crate::client::Client;
use crate::context::EvaluationContext;
use crate::error::Result;
use crate::events::{EventDispatcher, EventHandler, ProviderEventKind};
use crate::hook::Hook;
use crate::provider::{FeatureProvider, ProviderMetadata};
use crate::registry::ProviderRegistry;
use crate::scope::CallScope;

/// An independent flag-evaluation universe: one provider registry, one event
/// dispatcher, any number of clients.
///
/// [`Api::shutdown`] resets the instance to its pristine state rather than
/// poisoning it, so the global instance stays usable across test runs and
/// process-lifecycle boundaries.
pub struct Api {
    registry: Arc<ProviderRegistry>,
}

impl Api {
    /// Create an independent instance with the no-op provider bound to the
    /// default domain.
    #[must_use]
    pub fn new() -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        Self {
            registry: Arc::new(ProviderRegistry::new(dispatcher)),
        }
    }

    /// Create a client bound to `domain` (empty string = default domain).
    #[must_use]
    pub fn client(&self, domain: &str) -> Client {
        Client::new(Arc::clone(&self.registry), domain)
    }

    /// Bind `provider` to `domain`, initializing on a background task.
    pub fn set_provider(
        &self,
        scope: &CallScope,
        domain: &str,
        provider: Arc<dyn FeatureProvider>,
    ) {
        self.registry.set_provider(scope, domain, provider);
    }

    /// Bind `provider` to `domain` and wait for initialization to settle.
    ///
    /// # Errors
    ///
    /// Returns the provider's initialization failure; the same failure is
    /// broadcast as a `PROVIDER_ERROR` event.
    pub async fn set_provider_and_wait(
        &self,
        scope: &CallScope,
        domain: &str,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<()> {
        self.registry
            .set_provider_and_wait(scope, domain, provider)
            .await
    }

    /// Metadata of the provider bound to `domain`.
    #[must_use]
    pub fn provider_metadata(&self, domain: &str) -> ProviderMetadata {
        self.registry.provider_metadata(domain)
    }

    /// Replace the global evaluation context layer.
    pub fn set_evaluation_context(&self, ctx: EvaluationContext) {
        self.registry.set_evaluation_context(ctx);
    }

    /// Snapshot of the global evaluation context layer.
    #[must_use]
    pub fn evaluation_context(&self) -> EvaluationContext {
        self.registry.evaluation_context()
    }

    /// Append hooks at the global (outermost) level.
    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.registry.add_hooks(hooks);
    }

    /// Register a handler that fires on any domain's `kind` events.
    pub fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) {
        self.registry.dispatcher().add_global_handler(kind, handler);
    }

    /// Remove a previously registered global handler (by identity).
    pub fn remove_handler(&self, kind: ProviderEventKind, handler: &EventHandler) {
        self.registry
            .dispatcher()
            .remove_global_handler(kind, handler);
    }

    /// Shut down every bound provider and reset this instance to its pristine
    /// state: no-op default binding, no hooks, no handlers, no cached states.
    ///
    /// # Errors
    ///
    /// Returns an error only when `scope` is interrupted before every
    /// provider finished shutting down.
    pub async fn shutdown(&self, scope: &CallScope) -> Result<()> {
        self.registry.shutdown(scope).await
    }
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<Api> = LazyLock::new(Api::new);

/// The process-wide [`Api`] instance.
#[must_use]
pub fn global() -> &'static Api {
    &GLOBAL
}
