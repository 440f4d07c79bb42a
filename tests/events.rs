//! Event subsystem tests: late subscription, domain isolation, provider
//! event streams, and state-driven pipeline behavior.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flagkit::detail::{Reason, ResolutionDetail};
use flagkit::error::ErrorCode;
use flagkit::events::{EventDetails, ProviderEventKind};
use flagkit::provider::FeatureProvider;
use flagkit::scope::CallScope;
use flagkit::Api;

use common::{ScriptedProvider, wait_until};

type NameLog = Arc<Mutex<Vec<String>>>;

fn name_collector() -> (NameLog, flagkit::events::EventHandler) {
    let log: NameLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let handler: flagkit::events::EventHandler = Arc::new(move |details: &EventDetails| {
        sink.lock().unwrap().push(details.provider_name.clone());
    });
    (log, handler)
}

// ============================================================================
// Late subscription
// ============================================================================

#[tokio::test]
async fn ready_handler_added_after_readiness_fires_immediately() {
    // GIVEN: a provider that became ready before anyone subscribed
    let api = Api::new();
    let provider = Arc::new(ScriptedProvider::new("p"));
    api.set_provider_and_wait(&CallScope::new(), "checkout", provider)
        .await
        .unwrap();

    // WHEN: a PROVIDER_READY handler is registered afterwards
    let (log, handler) = name_collector();
    api.client("checkout")
        .add_handler(ProviderEventKind::Ready, handler);

    // THEN: it fires synchronously with the cached ready event
    assert_eq!(log.lock().unwrap().as_slice(), &["p".to_string()]);
}

#[tokio::test]
async fn late_global_ready_handler_replays_ready_domains() {
    let api = Api::new();
    let scope = CallScope::new();
    api.set_provider_and_wait(&scope, "a", Arc::new(ScriptedProvider::new("pa")))
        .await
        .unwrap();
    api.set_provider_and_wait(&scope, "b", Arc::new(ScriptedProvider::new("pb")))
        .await
        .unwrap();

    let (log, handler) = name_collector();
    api.add_handler(ProviderEventKind::Ready, handler);

    let mut names = log.lock().unwrap().clone();
    names.sort();
    assert_eq!(names, vec!["pa".to_string(), "pb".to_string()]);
}

#[tokio::test]
async fn handler_added_before_readiness_does_not_fire_early() {
    let api = Api::new();
    let (log, handler) = name_collector();
    api.client("checkout")
        .add_handler(ProviderEventKind::Ready, handler);
    assert!(log.lock().unwrap().is_empty(), "nothing is ready yet");

    api.set_provider_and_wait(
        &CallScope::new(),
        "checkout",
        Arc::new(ScriptedProvider::new("p")),
    )
    .await
    .unwrap();

    assert_eq!(log.lock().unwrap().as_slice(), &["p".to_string()]);
}

// ============================================================================
// Provider event streams
// ============================================================================

#[tokio::test]
async fn domain_handlers_only_hear_their_own_provider() {
    // GIVEN: two providers with event streams on separate domains
    let api = Api::new();
    let scope = CallScope::new();
    let pa = Arc::new(ScriptedProvider::new("pa").with_event_stream());
    let pb = Arc::new(ScriptedProvider::new("pb").with_event_stream());
    api.set_provider_and_wait(&scope, "A", Arc::clone(&pa) as Arc<dyn FeatureProvider>).await.unwrap();
    api.set_provider_and_wait(&scope, "B", Arc::clone(&pb) as Arc<dyn FeatureProvider>).await.unwrap();

    let (a_log, a_handler) = name_collector();
    let (b_log, b_handler) = name_collector();
    api.client("A").add_handler(ProviderEventKind::Stale, a_handler);
    api.client("B").add_handler(ProviderEventKind::Stale, b_handler);

    // WHEN: only provider A emits
    pa.emit(EventDetails::new(ProviderEventKind::Stale));

    // THEN: the A handler hears it, the B handler never does
    assert!(
        wait_until(Duration::from_secs(1), || !a_log.lock().unwrap().is_empty()).await,
        "A's handler must receive the stream event"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b_log.lock().unwrap().is_empty(), "B's handler must stay silent");
}

#[tokio::test]
async fn forwarder_stamps_the_provider_name_on_stream_events() {
    let api = Api::new();
    let provider = Arc::new(ScriptedProvider::new("stamped").with_event_stream());
    api.set_provider_and_wait(&CallScope::new(), "A", Arc::clone(&provider) as Arc<dyn FeatureProvider>)
        .await
        .unwrap();

    let captured: Arc<Mutex<Vec<EventDetails>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    api.client("A").add_handler(
        ProviderEventKind::ConfigurationChanged,
        Arc::new(move |details: &EventDetails| {
            sink.lock().unwrap().push(details.clone());
        }),
    );

    provider.emit(
        EventDetails::new(ProviderEventKind::ConfigurationChanged)
            .with_flags_changed(vec!["a".to_string(), "b".to_string()]),
    );

    assert!(
        wait_until(Duration::from_secs(1), || !captured.lock().unwrap().is_empty()).await
    );
    let details = captured.lock().unwrap().first().cloned().unwrap();
    assert_eq!(details.provider_name, "stamped");
    assert_eq!(details.flags_changed, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn global_handlers_hear_every_domain() {
    let api = Api::new();
    let scope = CallScope::new();
    let pa = Arc::new(ScriptedProvider::new("pa").with_event_stream());
    let pb = Arc::new(ScriptedProvider::new("pb").with_event_stream());
    api.set_provider_and_wait(&scope, "A", Arc::clone(&pa) as Arc<dyn FeatureProvider>).await.unwrap();
    api.set_provider_and_wait(&scope, "B", Arc::clone(&pb) as Arc<dyn FeatureProvider>).await.unwrap();

    let (log, handler) = name_collector();
    api.add_handler(ProviderEventKind::Stale, handler);

    pa.emit(EventDetails::new(ProviderEventKind::Stale));
    pb.emit(EventDetails::new(ProviderEventKind::Stale));

    assert!(
        wait_until(Duration::from_secs(1), || log.lock().unwrap().len() == 2).await,
        "global handler must hear both domains"
    );
}

#[tokio::test]
async fn replaced_provider_stream_is_detached() {
    let api = Api::new();
    let scope = CallScope::new();
    let old = Arc::new(ScriptedProvider::new("old").with_event_stream());
    api.set_provider_and_wait(&scope, "A", Arc::clone(&old) as Arc<dyn FeatureProvider>).await.unwrap();
    api.set_provider_and_wait(&scope, "A", Arc::new(ScriptedProvider::new("new")))
        .await
        .unwrap();

    let (log, handler) = name_collector();
    api.client("A").add_handler(ProviderEventKind::Stale, handler);

    // The unbound provider's events must no longer reach the domain.
    old.emit(EventDetails::new(ProviderEventKind::Stale));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn removed_global_handler_stops_firing() {
    let api = Api::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let handler: flagkit::events::EventHandler = Arc::new(move |_: &EventDetails| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    api.add_handler(ProviderEventKind::Ready, Arc::clone(&handler));
    api.remove_handler(ProviderEventKind::Ready, &handler);

    api.set_provider_and_wait(&CallScope::new(), "", Arc::new(ScriptedProvider::new("p")))
        .await
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Stream events steer the pipeline
// ============================================================================

#[tokio::test]
async fn fatal_stream_event_gates_evaluations_until_recovery() {
    let api = Api::new();
    let provider = Arc::new(
        ScriptedProvider::new("p")
            .with_event_stream()
            .with_flag("flag", ResolutionDetail::new(true, Reason::Static)),
    );
    api.set_provider_and_wait(&CallScope::new(), "", Arc::clone(&provider) as Arc<dyn FeatureProvider>)
        .await
        .unwrap();
    let client = api.client("");
    let scope = CallScope::new();

    assert!(client.bool_value(&scope, "flag", false, None, None).await);

    // WHEN: the provider reports a fatal error through its stream
    provider.emit(
        EventDetails::new(ProviderEventKind::Error)
            .with_error_code(ErrorCode::ProviderFatal)
            .with_message("license expired"),
    );

    // THEN: evaluations short-circuit with PROVIDER_FATAL
    let mut gated = false;
    for _ in 0..200 {
        let detail = client.bool_details(&scope, "flag", false, None, None).await;
        if detail.error.as_ref().map(|e| e.code) == Some(ErrorCode::ProviderFatal) {
            gated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gated, "fatal state must gate evaluations");

    // WHEN: a configuration change signals recovery
    provider.emit(EventDetails::new(ProviderEventKind::ConfigurationChanged));

    // THEN: evaluations flow again
    let mut recovered = false;
    for _ in 0..200 {
        let detail = client.bool_details(&scope, "flag", false, None, None).await;
        if detail.error.is_none() && detail.value {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(recovered, "configuration change must recover the domain");
}

#[tokio::test]
async fn stale_stream_event_does_not_gate_evaluations() {
    let api = Api::new();
    let provider = Arc::new(
        ScriptedProvider::new("p")
            .with_event_stream()
            .with_flag("flag", ResolutionDetail::new(true, Reason::Static)),
    );
    api.set_provider_and_wait(&CallScope::new(), "", Arc::clone(&provider) as Arc<dyn FeatureProvider>)
        .await
        .unwrap();
    let client = api.client("");

    let (log, handler) = name_collector();
    api.client("").add_handler(ProviderEventKind::Stale, handler);
    provider.emit(EventDetails::new(ProviderEventKind::Stale));
    assert!(wait_until(Duration::from_secs(1), || !log.lock().unwrap().is_empty()).await);

    // STALE is observable but does not block the provider call.
    assert!(
        client
            .bool_value(&CallScope::new(), "flag", false, None, None)
            .await
    );
}
