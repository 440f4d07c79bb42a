//! flagkit — vendor-neutral feature-flag evaluation SDK
//!
//! Uniform client API for boolean / string / number / object flag lookups,
//! decoupled from the flag-management system behind a pluggable provider
//! abstraction.
//!
//! # Features
//!
//! - **Typed evaluations**: five flag types, each in a value form (errors
//!   collapse to the default) and a details form (full resolution detail)
//! - **Layered hooks**: before/after/error/finally stages composed from the
//!   global, client, invocation, and provider levels
//! - **Context merging**: global ⊕ transaction ⊕ client ⊕ invocation with
//!   fixed precedence and first-non-empty targeting key
//! - **Provider lifecycle**: atomic replacement, cancellable initialization,
//!   reference-counted exactly-once shutdown
//! - **Events**: global and per-domain subscriptions with cached-state replay
//!   for late subscribers
//!
//! # Example
//!
//! ```rust
//! use flagkit::{Api, CallScope};
//!
//! # async fn demo() {
//! let api = Api::new();
//! let client = api.client("checkout");
//! let scope = CallScope::new();
//!
//! // No provider bound yet: the no-op sentinel echoes the default.
//! let enabled = client.bool_value(&scope, "new-flow", false, None, None).await;
//! assert!(!enabled);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod client;
pub mod context;
pub mod detail;
pub mod error;
pub mod events;
pub mod hook;
pub mod provider;
pub mod registry;
pub mod scope;
pub mod value;

pub use api::{Api, global};
pub use client::{Client, ClientMetadata};
pub use context::{EvaluationContext, FlattenedContext, TARGETING_KEY_FIELD};
pub use detail::{EvaluationDetail, FlagMetadata, Reason, ResolutionDetail};
pub use error::{ErrorCode, EvaluationError, Result};
pub use events::{DomainState, EventDetails, EventHandler, ProviderEventKind};
pub use hook::{EvaluationOptions, Hook, HookContext, HookHints};
pub use provider::{FeatureProvider, NoOpProvider, ProviderMetadata, TrackingEventDetails};
pub use scope::CallScope;
pub use value::{FlagType, Value};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Currently infallible; returns `Result` for forward compatibility with
/// configurable sinks.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
