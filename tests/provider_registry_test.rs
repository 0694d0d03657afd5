//! Provider registry integration tests
//!
//! Two OpenAI-compatible endpoints served by `wiremock`; checks priority
//! order, fallback on upstream failure and explicit targeting.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley::config::ProvidersConfig;
use parley::error::{classify, ParleyError};
use parley::events::{EventBus, EventKind};
use parley::providers::{ChatTurn, GenerationOptions, ProviderRegistry};

use common::{mount_completion, mount_models, provider_settings};

async fn failing_endpoint() -> MockServer {
    let server = MockServer::start().await;
    mount_models(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;
    server
}

async fn healthy_endpoint(text: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_models(&server).await;
    mount_completion(&server, text).await;
    server
}

fn registry_config(a: &MockServer, b: &MockServer) -> ProvidersConfig {
    let mut providers = BTreeMap::new();
    providers.insert("a".to_string(), provider_settings(a));
    providers.insert("b".to_string(), provider_settings(b));
    ProvidersConfig {
        default_provider: "a".to_string(),
        fallback_providers: vec!["b".to_string()],
        health_check_interval_secs: 3600,
        providers,
    }
}

#[tokio::test]
async fn test_falls_back_to_next_provider() {
    let a = failing_endpoint().await;
    let b = healthy_endpoint("from b").await;
    let events = Arc::new(EventBus::default());
    let registry = Arc::new(ProviderRegistry::new(registry_config(&a, &b), Arc::clone(&events)));
    registry.start().await.unwrap();

    let result = registry
        .generate(&[ChatTurn::user("hello")], &GenerationOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(result.provider, "b");
    assert_eq!(result.completion.text, "from b");
    assert_eq!(result.completion.usage.map(|u| u.total_tokens), Some(12));

    let stats = registry.stats().await;
    assert_eq!(stats.providers["a"].error_count, 1);
    assert_eq!(stats.providers["a"].request_count, 1);
    assert_eq!(stats.providers["b"].error_count, 0);
    assert_eq!(stats.providers["b"].request_count, 1);

    assert!(events
        .recent(50)
        .iter()
        .any(|e| e.kind == EventKind::ProviderFailed && e.data["name"] == "a"));

    registry.stop().await;
}

#[tokio::test]
async fn test_explicit_provider_does_not_fall_back() {
    let a = failing_endpoint().await;
    let b = healthy_endpoint("from b").await;
    let registry = Arc::new(ProviderRegistry::new(
        registry_config(&a, &b),
        Arc::new(EventBus::default()),
    ));
    registry.start().await.unwrap();

    let err = registry
        .generate(&[ChatTurn::user("hello")], &GenerationOptions::default(), Some("a"))
        .await
        .unwrap_err();
    match classify(&err) {
        Some(ParleyError::AllCandidatesFailed { attempted, .. }) => {
            assert_eq!(attempted, &vec!["a".to_string()]);
        }
        other => panic!("expected AllCandidatesFailed, got {:?}", other),
    }
    assert_eq!(registry.stats().await.providers["b"].request_count, 0);

    registry.stop().await;
}

#[tokio::test]
async fn test_all_providers_failing() {
    let a = failing_endpoint().await;
    let b = failing_endpoint().await;
    let events = Arc::new(EventBus::default());
    let registry = Arc::new(ProviderRegistry::new(registry_config(&a, &b), Arc::clone(&events)));
    registry.start().await.unwrap();
    let before = registry.stats().await;

    let err = registry
        .generate(&[ChatTurn::user("hello")], &GenerationOptions::default(), None)
        .await
        .unwrap_err();
    match classify(&err) {
        Some(ParleyError::AllCandidatesFailed {
            attempted,
            last_error,
            ..
        }) => {
            assert_eq!(attempted, &vec!["a".to_string(), "b".to_string()]);
            assert!(last_error.contains("overloaded"));
        }
        other => panic!("expected AllCandidatesFailed, got {:?}", other),
    }

    // Each candidate counts exactly one failed request and nothing else moves.
    let after = registry.stats().await;
    assert_eq!(after.total, before.total);
    assert_eq!(after.connected, before.connected);
    assert_eq!(after.default_provider, before.default_provider);
    for name in ["a", "b"] {
        let (was, now) = (&before.providers[name], &after.providers[name]);
        assert_eq!(now.request_count, was.request_count + 1, "{}", name);
        assert_eq!(now.error_count, was.error_count + 1, "{}", name);
        assert_eq!(now.connected, was.connected, "{}", name);
        assert_eq!(now.model, was.model, "{}", name);
    }
    assert_eq!(events.count(EventKind::ProviderFailed), 2);

    registry.stop().await;
}

#[tokio::test]
async fn test_unreachable_provider_stays_registered() {
    let b = healthy_endpoint("from b").await;
    let a = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&a)
        .await;

    let registry = Arc::new(ProviderRegistry::new(
        registry_config(&a, &b),
        Arc::new(EventBus::default()),
    ));
    registry.start().await.unwrap();

    let stats = registry.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.connected, 1);
    assert!(!stats.providers["a"].connected);

    let result = registry
        .generate(&[ChatTurn::user("hello")], &GenerationOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(result.provider, "b");

    let health = registry.health_check().await;
    assert_eq!(health.get("a"), Some(&false));
    assert_eq!(health.get("b"), Some(&true));

    registry.stop().await;
}
