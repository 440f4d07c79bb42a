//! The no-op provider bound before any real provider.

use async_trait::async_trait;

use crate::context::FlattenedContext;
use crate::detail::{Reason, ResolutionDetail};
use crate::scope::CallScope;
use crate::value::Value;

use super::{FeatureProvider, ProviderMetadata};

/// Provider that answers every lookup with the caller's default.
///
/// The registry binds one instance of this to the default domain at
/// construction so evaluations always have a provider to land on. It carries
/// no lifecycle, and evaluations against the registry's own sentinel instance
/// bypass the domain-state short-circuit.
#[derive(Debug, Default)]
pub struct NoOpProvider;

impl NoOpProvider {
    /// Name reported by [`NoOpProvider::metadata`].
    pub const NAME: &'static str = "no-op";

    /// Create a no-op provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn default_detail(value: impl Into<Value>) -> ResolutionDetail {
        ResolutionDetail::new(value, Reason::Default)
    }
}

#[async_trait]
impl FeatureProvider for NoOpProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(Self::NAME)
    }

    async fn resolve_bool(
        &self,
        _scope: &CallScope,
        _flag_key: &str,
        default: bool,
        _ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        Self::default_detail(default)
    }

    async fn resolve_string(
        &self,
        _scope: &CallScope,
        _flag_key: &str,
        default: &str,
        _ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        Self::default_detail(default)
    }

    async fn resolve_int(
        &self,
        _scope: &CallScope,
        _flag_key: &str,
        default: i64,
        _ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        Self::default_detail(default)
    }

    async fn resolve_float(
        &self,
        _scope: &CallScope,
        _flag_key: &str,
        default: f64,
        _ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        Self::default_detail(default)
    }

    async fn resolve_object(
        &self,
        _scope: &CallScope,
        _flag_key: &str,
        default: &Value,
        _ctx: &FlattenedContext,
    ) -> ResolutionDetail {
        Self::default_detail(default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_resolver_echoes_the_default() {
        let provider = NoOpProvider::new();
        let scope = CallScope::new();
        let ctx = FlattenedContext::new();

        let b = provider.resolve_bool(&scope, "f", true, &ctx).await;
        assert_eq!(b.value, Some(Value::Bool(true)));
        assert_eq!(b.reason, Reason::Default);
        assert!(b.error.is_none());

        let s = provider.resolve_string(&scope, "f", "fallback", &ctx).await;
        assert_eq!(s.value, Some(Value::from("fallback")));

        let i = provider.resolve_int(&scope, "f", 3, &ctx).await;
        assert_eq!(i.value, Some(Value::Int(3)));

        let f = provider.resolve_float(&scope, "f", 0.5, &ctx).await;
        assert_eq!(f.value, Some(Value::Float(0.5)));

        let o = provider
            .resolve_object(&scope, "f", &Value::Int(9), &ctx)
            .await;
        assert_eq!(o.value, Some(Value::Int(9)));
    }
}
