//! Provider registry — binding, lifecycle, and replacement semantics.
//!
//! The registry owns the default provider slot plus a `domain → provider`
//! mapping and coordinates every provider state transition:
//!
//! - **Replacement** swaps the binding under the write lock, then runs the
//!   incoming provider's `initialize` with the lock released — evaluations
//!   already see the new provider while initialization is still cancellable.
//! - **Reference counting**: one provider instance may back several domains.
//!   Whether a superseded instance is still referenced is decided by pointer
//!   identity over the post-swap table, inside the same critical section, so
//!   shutdown fires exactly once per instance.
//! - **Retirement** of an unreferenced provider runs on a background task
//!   once the replacement's initialization settles; failures are logged,
//!   never raised.
//!
//! Global hooks and the global evaluation context live here too, in a single
//! lock, so [`ProviderRegistry::for_evaluation`] hands the pipeline one
//! coherent snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::EvaluationContext;
use crate::error::Result;
use crate::events::{EventDetails, EventDispatcher, ProviderEventKind};
use crate::hook::Hook;
use crate::provider::{FeatureProvider, NoOpProvider, ProviderMetadata};
use crate::scope::{CallScope, Interruption};

// ============================================================================
// Binding table
// ============================================================================

/// One provider bound to one domain, plus the cancellation handle of its
/// event-stream forwarder (if the provider exposes a stream).
struct Binding {
    provider: Arc<dyn FeatureProvider>,
    forwarder: Option<CancellationToken>,
}

impl Binding {
    fn new(provider: Arc<dyn FeatureProvider>) -> Self {
        Self {
            provider,
            forwarder: None,
        }
    }

    fn detach_forwarder(&self) {
        if let Some(token) = &self.forwarder {
            token.cancel();
        }
    }
}

struct BindingTable {
    /// The default binding. Always present; starts as the no-op sentinel.
    default: Binding,
    /// Named domain bindings.
    domains: HashMap<String, Binding>,
}

impl BindingTable {
    /// Pointer-identity reference check across the whole table.
    fn is_referenced(&self, provider: &Arc<dyn FeatureProvider>) -> bool {
        Arc::ptr_eq(&self.default.provider, provider)
            || self
                .domains
                .values()
                .any(|b| Arc::ptr_eq(&b.provider, provider))
    }
}

/// Global hooks + global context, kept in one lock so evaluation snapshots
/// never observe a mid-update mixture.
struct Globals {
    hooks: Vec<Arc<dyn Hook>>,
    context: EvaluationContext,
}

/// Everything the pipeline needs for one evaluation, snapshotted atomically.
pub struct EvaluationTarget {
    /// The provider bound to the requested domain (or the default fallback).
    pub provider: Arc<dyn FeatureProvider>,
    /// Global hooks at snapshot time.
    pub hooks: Vec<Arc<dyn Hook>>,
    /// Global evaluation context at snapshot time.
    pub context: EvaluationContext,
    /// Whether `provider` is the registry's own no-op sentinel; evaluations
    /// against it bypass the domain-state short-circuit.
    pub provider_is_noop: bool,
    /// The domain whose cached state gates this evaluation: the requested
    /// domain when it has its own binding, the default domain otherwise.
    pub state_domain: String,
}

/// Outcome of swapping a binding, handed to the initialization path.
struct Replacement {
    previous: Option<Arc<dyn FeatureProvider>>,
    previous_unreferenced: bool,
    init_context: EvaluationContext,
}

// ============================================================================
// ProviderRegistry
// ============================================================================

/// Owner of all provider bindings and the global evaluation layer.
pub struct ProviderRegistry {
    bindings: RwLock<BindingTable>,
    globals: RwLock<Globals>,
    dispatcher: Arc<EventDispatcher>,
    /// Sentinel bound to the default slot before any real provider arrives.
    noop: Arc<dyn FeatureProvider>,
}

impl ProviderRegistry {
    /// Create a registry with the no-op sentinel bound to the default domain.
    #[must_use]
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        let noop: Arc<dyn FeatureProvider> = Arc::new(NoOpProvider::new());
        Self {
            bindings: RwLock::new(BindingTable {
                default: Binding::new(Arc::clone(&noop)),
                domains: HashMap::new(),
            }),
            globals: RwLock::new(Globals {
                hooks: Vec::new(),
                context: EvaluationContext::new(),
            }),
            dispatcher,
            noop,
        }
    }

    /// The event dispatcher this registry reports into.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Bind `provider` to `domain` (empty string = default domain) and start
    /// its initialization on a background task.
    ///
    /// Returns immediately; the initialization outcome is conveyed only
    /// through `PROVIDER_READY` / `PROVIDER_ERROR` events.
    pub fn set_provider(
        &self,
        scope: &CallScope,
        domain: &str,
        provider: Arc<dyn FeatureProvider>,
    ) {
        let replacement = self.swap_in(domain, &provider);
        info!(
            domain = %domain,
            provider = %provider.metadata().name(),
            "Provider bound; initializing in background"
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let scope = scope.clone();
        let domain = domain.to_string();
        tokio::spawn(async move {
            let ctx = replacement.init_context.clone();
            let _ = initialize_and_announce(&dispatcher, &domain, &provider, &scope, &ctx).await;
            retire_if_unreferenced(&domain, replacement);
        });
    }

    /// Bind `provider` to `domain` and return only after its initialization
    /// settles.
    ///
    /// # Errors
    ///
    /// Returns the initialization failure (which is also broadcast as a
    /// `PROVIDER_ERROR` event). The binding itself stays in place either way.
    pub async fn set_provider_and_wait(
        &self,
        scope: &CallScope,
        domain: &str,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<()> {
        let replacement = self.swap_in(domain, &provider);
        info!(
            domain = %domain,
            provider = %provider.metadata().name(),
            "Provider bound; awaiting initialization"
        );

        let ctx = replacement.init_context.clone();
        let result =
            initialize_and_announce(&self.dispatcher, domain, &provider, scope, &ctx).await;
        retire_if_unreferenced(domain, replacement);
        result
    }

    /// Swap the binding for `domain` under the write lock.
    ///
    /// The reference check for the outgoing provider runs inside the same
    /// critical section, which is what makes retirement exactly-once under
    /// concurrent replacements.
    fn swap_in(&self, domain: &str, provider: &Arc<dyn FeatureProvider>) -> Replacement {
        let forwarder = provider
            .event_stream()
            .map(|rx| self.spawn_forwarder(domain, provider, rx));
        let binding = Binding {
            provider: Arc::clone(provider),
            forwarder,
        };

        let mut bindings = self.bindings.write();
        let previous = if domain.is_empty() {
            Some(std::mem::replace(&mut bindings.default, binding))
        } else {
            bindings.domains.insert(domain.to_string(), binding)
        };
        let previous_unreferenced = previous.as_ref().is_some_and(|b| {
            !Arc::ptr_eq(&b.provider, &self.noop) && !bindings.is_referenced(&b.provider)
        });
        let init_context = self.globals.read().context.clone();
        drop(bindings);

        // The outgoing binding's event subscription ends with the binding.
        if let Some(prev) = &previous {
            prev.detach_forwarder();
        }

        Replacement {
            previous: previous.map(|b| b.provider),
            previous_unreferenced,
            init_context,
        }
    }

    /// Forward a provider's event stream into the dispatcher under `domain`
    /// until the returned token is cancelled or the stream closes.
    fn spawn_forwarder(
        &self,
        domain: &str,
        provider: &Arc<dyn FeatureProvider>,
        mut rx: broadcast::Receiver<EventDetails>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let provider_name = provider.metadata().name().to_string();
        let domain = domain.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(mut details) => {
                            if details.provider_name.is_empty() {
                                details.provider_name = provider_name.clone();
                            }
                            dispatcher.dispatch(&domain, details);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                domain = %domain,
                                provider = %provider_name,
                                skipped,
                                "Provider event stream lagged; events dropped"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(domain = %domain, provider = %provider_name, "Event forwarder stopped");
        });

        token
    }

    // ── Evaluation-side reads ────────────────────────────────────────────────

    /// Atomic snapshot of everything one evaluation needs.
    ///
    /// A domain with no binding of its own falls back to the default
    /// provider (and the default domain's cached state).
    #[must_use]
    pub fn for_evaluation(&self, domain: &str) -> EvaluationTarget {
        let bindings = self.bindings.read();
        let (provider, bound) = if domain.is_empty() {
            (Arc::clone(&bindings.default.provider), true)
        } else if let Some(binding) = bindings.domains.get(domain) {
            (Arc::clone(&binding.provider), true)
        } else {
            (Arc::clone(&bindings.default.provider), false)
        };
        drop(bindings);

        let globals = self.globals.read();
        EvaluationTarget {
            provider_is_noop: Arc::ptr_eq(&provider, &self.noop),
            state_domain: if bound {
                domain.to_string()
            } else {
                String::new()
            },
            hooks: globals.hooks.clone(),
            context: globals.context.clone(),
            provider,
        }
    }

    /// Metadata of the provider bound to `domain`.
    ///
    /// A named domain with no binding reports the no-op sentinel metadata.
    #[must_use]
    pub fn provider_metadata(&self, domain: &str) -> ProviderMetadata {
        let bindings = self.bindings.read();
        if domain.is_empty() {
            return bindings.default.provider.metadata();
        }
        bindings
            .domains
            .get(domain)
            .map_or_else(|| self.noop.metadata(), |b| b.provider.metadata())
    }

    // ── Global hooks & context ───────────────────────────────────────────────

    /// Append hooks at the global (outermost) level.
    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.globals.write().hooks.extend(hooks);
    }

    /// Replace the global evaluation context.
    pub fn set_evaluation_context(&self, ctx: EvaluationContext) {
        self.globals.write().context = ctx;
    }

    /// Snapshot of the global evaluation context.
    #[must_use]
    pub fn evaluation_context(&self) -> EvaluationContext {
        self.globals.read().context.clone()
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Shut down every distinct provider instance and reset the registry to
    /// its pristine state: no-op default binding, no domain bindings, no
    /// global hooks or context, no event handlers or cached states.
    ///
    /// Blocks until each provider's `shutdown` returns or `scope` is
    /// interrupted. Individual provider failures are logged and do not stop
    /// the teardown of the remaining instances.
    ///
    /// # Errors
    ///
    /// Returns an error only when `scope` was cancelled or its deadline
    /// passed before every provider finished shutting down.
    pub async fn shutdown(&self, scope: &CallScope) -> Result<()> {
        let mut providers: Vec<Arc<dyn FeatureProvider>> = Vec::new();
        {
            let mut bindings = self.bindings.write();
            let drained = std::mem::replace(
                &mut *bindings,
                BindingTable {
                    default: Binding::new(Arc::clone(&self.noop)),
                    domains: HashMap::new(),
                },
            );
            for binding in std::iter::once(drained.default).chain(drained.domains.into_values()) {
                binding.detach_forwarder();
                if Arc::ptr_eq(&binding.provider, &self.noop) {
                    continue;
                }
                if !providers.iter().any(|p| Arc::ptr_eq(p, &binding.provider)) {
                    providers.push(binding.provider);
                }
            }
        }
        {
            let mut globals = self.globals.write();
            globals.hooks.clear();
            globals.context = EvaluationContext::new();
        }

        info!(providers = providers.len(), "Shutting down provider registry");
        for provider in providers {
            if let Err(err) = run_scoped(scope, provider.shutdown(scope)).await {
                if let Some(interruption) = scope.interruption() {
                    self.dispatcher.clear();
                    return Err(interruption.into());
                }
                warn!(
                    provider = %provider.metadata().name(),
                    error = %err,
                    "Provider shutdown failed"
                );
            }
        }

        self.dispatcher.clear();
        Ok(())
    }
}

// ============================================================================
// Lifecycle helpers
// ============================================================================

/// Run `initialize` bounded by the scope, then broadcast the outcome.
async fn initialize_and_announce(
    dispatcher: &Arc<EventDispatcher>,
    domain: &str,
    provider: &Arc<dyn FeatureProvider>,
    scope: &CallScope,
    ctx: &EvaluationContext,
) -> Result<()> {
    let name = provider.metadata().name().to_string();
    match run_scoped(scope, provider.initialize(scope, ctx)).await {
        Ok(()) => {
            info!(domain = %domain, provider = %name, "Provider ready");
            dispatcher.dispatch(
                domain,
                EventDetails::new(ProviderEventKind::Ready).with_provider_name(name),
            );
            Ok(())
        }
        Err(err) => {
            warn!(
                domain = %domain,
                provider = %name,
                error = %err,
                "Provider initialization failed"
            );
            let mut details = EventDetails::new(ProviderEventKind::Error)
                .with_provider_name(name)
                .with_error_code(err.code);
            if let Some(message) = &err.message {
                details = details.with_message(message.clone());
            }
            dispatcher.dispatch(domain, details);
            Err(err)
        }
    }
}

/// Schedule background teardown of a superseded, unreferenced provider.
fn retire_if_unreferenced(domain: &str, replacement: Replacement) {
    let Some(previous) = replacement.previous else {
        return;
    };
    if !replacement.previous_unreferenced {
        return;
    }
    let domain = domain.to_string();
    tokio::spawn(async move {
        let name = previous.metadata().name().to_string();
        match previous.shutdown(&CallScope::new()).await {
            Ok(()) => debug!(domain = %domain, provider = %name, "Superseded provider shut down"),
            Err(err) => warn!(
                domain = %domain,
                provider = %name,
                error = %err,
                "Background provider shutdown failed"
            ),
        }
    });
}

/// Drive `fut` while honoring the scope's cancellation token and deadline.
async fn run_scoped<F>(scope: &CallScope, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    if let Some(interruption) = scope.interruption() {
        return Err(interruption.into());
    }
    let bounded = async {
        match scope.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, fut).await {
                Ok(result) => result,
                Err(_) => Err(Interruption::DeadlineExceeded.into()),
            },
            None => fut.await,
        }
    };
    tokio::select! {
        () = scope.cancellation().cancelled() => Err(Interruption::Cancelled.into()),
        result = bounded => result,
    }
}
