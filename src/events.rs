//! Event subsystem — provider lifecycle events fanned out to subscribers.
//!
//! The dispatcher maintains two registries (global and per-domain), forwards
//! provider state transitions to registered handlers, and caches the latest
//! state per domain so the evaluation pipeline can short-circuit against
//! providers that are not ready or have failed fatally.
//!
//! # Delivery
//!
//! - Handlers in one registry slot fire in insertion order.
//! - Handler lists are snapshotted under the lock, then invoked with the lock
//!   released — a handler may re-enter the dispatcher without deadlocking.
//! - A panicking handler is isolated: the panic is caught and logged, and the
//!   remaining handlers still run.
//! - Late subscription: registering a handler whose event kind matches the
//!   domain's current cached state fires it immediately with the cached last
//!   event, so subscribers attaching after `PROVIDER_READY` are not stranded.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::value::Value;

// ============================================================================
// Event model
// ============================================================================

/// Kinds of provider lifecycle events.
///
/// A fatal failure is not a distinct kind: it travels as [`Error`] with
/// [`ErrorCode::ProviderFatal`], which the state cache maps to
/// [`DomainState::Fatal`].
///
/// [`Error`]: ProviderEventKind::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventKind {
    /// The provider finished initialization or recovered.
    Ready,
    /// The provider failed; fatal when the error code says so.
    Error,
    /// The provider's cached flag data may be out of date.
    Stale,
    /// The provider's flag configuration changed.
    ConfigurationChanged,
}

impl std::fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ready => "PROVIDER_READY",
            Self::Error => "PROVIDER_ERROR",
            Self::Stale => "PROVIDER_STALE",
            Self::ConfigurationChanged => "PROVIDER_CONFIGURATION_CHANGED",
        };
        f.write_str(name)
    }
}

/// Payload delivered to event handlers.
#[derive(Debug, Clone, Serialize)]
pub struct EventDetails {
    /// Name of the provider that produced the event.
    pub provider_name: String,
    /// Event kind.
    pub kind: ProviderEventKind,
    /// Keys of flags affected by a configuration change.
    pub flags_changed: Vec<String>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Error classification for `PROVIDER_ERROR` events.
    pub error_code: Option<ErrorCode>,
    /// Arbitrary event metadata.
    pub metadata: HashMap<String, Value>,
}

impl EventDetails {
    /// Create details for an event kind.
    #[must_use]
    pub fn new(kind: ProviderEventKind) -> Self {
        Self {
            provider_name: String::new(),
            kind,
            flags_changed: Vec::new(),
            message: None,
            error_code: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the originating provider name.
    #[must_use]
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach an error code.
    #[must_use]
    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Attach the list of changed flag keys.
    #[must_use]
    pub fn with_flags_changed(mut self, flags: Vec<String>) -> Self {
        self.flags_changed = flags;
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Cached lifecycle state of one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainState {
    /// No provider has finished initializing yet.
    #[default]
    NotReady,
    /// The bound provider is serving evaluations.
    Ready,
    /// The bound provider's data may be out of date.
    Stale,
    /// The bound provider failed; recovery is possible.
    Error,
    /// The bound provider failed irrecoverably.
    Fatal,
}

/// An event callback.
///
/// Registered and removed by identity (`Arc::ptr_eq`), so keep the `Arc`
/// around if you intend to remove the handler later.
pub type EventHandler = Arc<dyn Fn(&EventDetails) + Send + Sync>;

// ============================================================================
// EventDispatcher
// ============================================================================

type HandlerTable = HashMap<ProviderEventKind, Vec<EventHandler>>;

/// Subscription registries plus the per-domain state cache.
#[derive(Default)]
pub struct EventDispatcher {
    /// Handlers that fire on any domain's events.
    global: RwLock<HandlerTable>,
    /// Handlers that fire only for events of one domain.
    domains: RwLock<HashMap<String, HandlerTable>>,
    /// `domain → state`, read on the evaluation hot path.
    states: DashMap<String, DomainState>,
    /// Last event per domain, replayed to late subscribers.
    last_events: DashMap<String, EventDetails>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached state for `domain` (`NotReady` before any event).
    #[must_use]
    pub fn domain_state(&self, domain: &str) -> DomainState {
        self.states.get(domain).map_or_else(DomainState::default, |s| *s)
    }

    /// Register a handler that fires on any provider's `kind` events.
    ///
    /// If any domain's cached state already matches `kind`, the handler fires
    /// immediately with that domain's cached last event.
    pub fn add_global_handler(&self, kind: ProviderEventKind, handler: EventHandler) {
        self.global.write().entry(kind).or_default().push(handler.clone());

        // Collect matching domains first; the replay runs user code, which
        // must not execute under the shard locks of the state map.
        let matching: Vec<String> = self
            .states
            .iter()
            .filter(|entry| Self::kind_matches_state(kind, *entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        for domain in matching {
            self.replay_last(&domain, kind, &handler);
        }
    }

    /// Remove a previously registered global handler (by identity).
    pub fn remove_global_handler(&self, kind: ProviderEventKind, handler: &EventHandler) {
        if let Some(handlers) = self.global.write().get_mut(&kind) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Register a handler for `kind` events of one domain only.
    ///
    /// Fires immediately with the cached last event when the domain's state
    /// already matches `kind`.
    pub fn add_domain_handler(&self, domain: &str, kind: ProviderEventKind, handler: EventHandler) {
        self.domains
            .write()
            .entry(domain.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .push(handler.clone());

        if Self::kind_matches_state(kind, self.domain_state(domain)) {
            self.replay_last(domain, kind, &handler);
        }
    }

    /// Remove a previously registered per-domain handler (by identity).
    pub fn remove_domain_handler(
        &self,
        domain: &str,
        kind: ProviderEventKind,
        handler: &EventHandler,
    ) {
        let mut domains = self.domains.write();
        if let Some(handlers) = domains.get_mut(domain).and_then(|t| t.get_mut(&kind)) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Record an event for `domain` and fan it out.
    ///
    /// Updates the state and last-event caches, then invokes the matching
    /// global and per-domain handlers in insertion order. Handlers run on the
    /// dispatching task with no locks held.
    pub fn dispatch(&self, domain: &str, details: EventDetails) {
        let state = Self::state_after(&details);
        self.states.insert(domain.to_string(), state);
        self.last_events.insert(domain.to_string(), details.clone());

        debug!(
            domain = %domain,
            kind = %details.kind,
            provider = %details.provider_name,
            state = ?state,
            "Dispatching provider event"
        );

        let mut handlers: Vec<EventHandler> = self
            .global
            .read()
            .get(&details.kind)
            .cloned()
            .unwrap_or_default();
        let scoped: Vec<EventHandler> = self
            .domains
            .read()
            .get(domain)
            .and_then(|t| t.get(&details.kind))
            .cloned()
            .unwrap_or_default();
        handlers.extend(scoped);

        for handler in &handlers {
            Self::run_handler(domain, handler, &details);
        }
    }

    /// Drop every handler and all cached state.
    pub fn clear(&self) {
        self.global.write().clear();
        self.domains.write().clear();
        self.states.clear();
        self.last_events.clear();
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// State transition produced by one event.
    fn state_after(details: &EventDetails) -> DomainState {
        match details.kind {
            ProviderEventKind::Ready | ProviderEventKind::ConfigurationChanged => {
                DomainState::Ready
            }
            ProviderEventKind::Stale => DomainState::Stale,
            ProviderEventKind::Error => {
                if details.error_code == Some(ErrorCode::ProviderFatal) {
                    DomainState::Fatal
                } else {
                    DomainState::Error
                }
            }
        }
    }

    /// Whether a cached state warrants replaying to a fresh `kind` handler.
    fn kind_matches_state(kind: ProviderEventKind, state: DomainState) -> bool {
        match kind {
            ProviderEventKind::Ready | ProviderEventKind::ConfigurationChanged => {
                state == DomainState::Ready
            }
            ProviderEventKind::Error => {
                matches!(state, DomainState::Error | DomainState::Fatal)
            }
            ProviderEventKind::Stale => state == DomainState::Stale,
        }
    }

    /// Fire `handler` with the cached last event of `domain`, if one exists.
    fn replay_last(&self, domain: &str, kind: ProviderEventKind, handler: &EventHandler) {
        if let Some(details) = self.last_events.get(domain).map(|d| d.value().clone()) {
            debug!(domain = %domain, kind = %kind, "Replaying cached event to late subscriber");
            Self::run_handler(domain, handler, &details);
        }
    }

    /// Invoke one handler with panic isolation.
    fn run_handler(domain: &str, handler: &EventHandler, details: &EventDetails) {
        if catch_unwind(AssertUnwindSafe(|| handler(details))).is_err() {
            warn!(
                domain = %domain,
                kind = %details.kind,
                "Event handler panicked; continuing with remaining handlers"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
