use super::*;
use crate::llm::mock::{ScriptedProvider, ScriptedStreamingProvider};
use crate::llm::{LLMError, Message, ProviderChunk};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_config(fallbacks: &[&str]) -> CoreConfig {
    CoreConfig {
        default_provider: "none".to_string(),
        fallback_providers: fallbacks.iter().map(|s| s.to_string()).collect(),
        simulated_chunk_delay_ms: 1,
        request_timeout_secs: 5,
        ..CoreConfig::default()
    }
}

fn hello() -> AIRequest {
    AIRequest::new(vec![Message::user("hello")])
}

#[tokio::test]
async fn test_no_provider_available() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    let result = orchestrator.process_request(hello()).await;
    assert!(matches!(result, Err(OrchestratorError::NoProviderAvailable)));
}

#[tokio::test]
async fn test_unavailable_provider_is_rejected() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    let result = orchestrator
        .register_provider(Arc::new(ScriptedProvider::unavailable("offline")))
        .await;

    assert!(matches!(result, Err(OrchestratorError::ProviderUnavailable(name)) if name == "offline"));
    assert!(orchestrator.available_providers().await.is_empty());
}

#[tokio::test]
async fn test_first_registered_becomes_active() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "from b")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("a", "from a")))
        .await
        .unwrap();

    assert_eq!(orchestrator.active_provider().await.as_deref(), Some("b"));
    assert_eq!(orchestrator.available_providers().await, vec!["a", "b"]);
}

#[tokio::test]
async fn test_default_provider_takes_over_on_registration() {
    let config = CoreConfig {
        default_provider: "ollama".to_string(),
        ..test_config(&[])
    };
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("openai", "x")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("ollama", "y")))
        .await
        .unwrap();

    assert_eq!(orchestrator.active_provider().await.as_deref(), Some("ollama"));
}

#[tokio::test]
async fn test_selection_order() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("a", "from a")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "from b")))
        .await
        .unwrap();

    // Explicit provider wins
    let response = orchestrator
        .process_request(hello().with_provider("b"))
        .await
        .unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(response.content, "from b");

    // Unknown explicit provider falls through to the active one
    let response = orchestrator
        .process_request(hello().with_provider("missing"))
        .await
        .unwrap();
    assert_eq!(response.provider, "a");

    // Active provider when nothing is named
    let response = orchestrator.process_request(hello()).await.unwrap();
    assert_eq!(response.provider, "a");
    assert_eq!(response.model, "a-model");
    assert!(response.token_usage.total_tokens > 0);
    assert!(!response.is_streaming());
}

#[tokio::test]
async fn test_switch_provider() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("a", "from a")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "from b")))
        .await
        .unwrap();

    orchestrator.switch_provider("b").await.unwrap();
    assert_eq!(orchestrator.process_request(hello()).await.unwrap().provider, "b");

    let result = orchestrator.switch_provider("nope").await;
    assert!(matches!(result, Err(OrchestratorError::ProviderNotFound(_))));
    assert_eq!(orchestrator.active_provider().await.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_unregister_active_moves_pointer() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("a", "from a")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "from b")))
        .await
        .unwrap();

    orchestrator.unregister_provider("a").await.unwrap();
    assert_eq!(orchestrator.active_provider().await.as_deref(), Some("b"));
    assert!(matches!(
        orchestrator.unregister_provider("a").await,
        Err(OrchestratorError::ProviderNotFound(_))
    ));
}

#[tokio::test]
async fn test_fallback_annotates_response() {
    let orchestrator = Orchestrator::new(test_config(&["b"]));
    let primary = Arc::new(ScriptedProvider::failing("a", "upstream 500"));
    orchestrator.register_provider(primary.clone()).await.unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "rescued")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello()).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(response.content, "rescued");
    assert_eq!(response.fallback_from(), Some("a"));
    assert!(response.original_error().unwrap().contains("upstream 500"));
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_fallback_skips_failed_and_unregistered() {
    let orchestrator = Orchestrator::new(test_config(&["a", "ghost", "c"]));
    let primary = Arc::new(ScriptedProvider::failing("a", "down"));
    orchestrator.register_provider(primary.clone()).await.unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("c", "from c")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello()).await.unwrap();
    assert_eq!(response.provider, "c");
    // The failed provider is not retried from the fallback list
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_all_providers_failed_wraps_original() {
    let orchestrator = Orchestrator::new(test_config(&["b", "c"]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::failing("a", "original cause")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::failing("b", "second")))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::failing("c", "third")))
        .await
        .unwrap();

    let error = orchestrator.process_request(hello()).await.unwrap_err();
    match error {
        OrchestratorError::AllProvidersFailed {
            provider,
            source,
            attempted,
        } => {
            assert_eq!(provider, "a");
            assert!(source.to_string().contains("original cause"));
            assert_eq!(attempted, vec!["b", "c"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_timeout_enters_fallback() {
    let config = CoreConfig {
        request_timeout_secs: 1,
        ..test_config(&["b"])
    };
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .register_provider(Arc::new(
            ScriptedProvider::replying("a", "too late").with_delay(Duration::from_secs(3)),
        ))
        .await
        .unwrap();
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("b", "on time")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello()).await.unwrap();
    assert_eq!(response.provider, "b");
    assert!(response.original_error().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_cancelled_request_does_not_fall_back() {
    let orchestrator = Orchestrator::new(test_config(&["b"]));
    orchestrator
        .register_provider(Arc::new(
            ScriptedProvider::replying("a", "slow").with_delay(Duration::from_secs(2)),
        ))
        .await
        .unwrap();
    let fallback = Arc::new(ScriptedProvider::replying("b", "fallback"));
    orchestrator.register_provider(fallback.clone()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = orchestrator.process_request_with_cancel(hello(), cancel).await;
    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test]
async fn test_streaming_request_returns_handle_only() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("local", "a b c")))
        .await
        .unwrap();

    let response = orchestrator
        .process_request(hello().streaming().with_thoughts())
        .await
        .unwrap();
    assert!(response.is_streaming());
    assert!(response.content.is_empty());
    assert!(response.has_thoughts);
    assert_eq!(response.provider, "local");

    let stream_id = response.stream_id.unwrap();
    let handle = orchestrator.get_stream(&stream_id).unwrap();

    let mut contents = Vec::new();
    while let Some(chunk) = handle.recv().await {
        contents.push((chunk.content, chunk.done));
    }
    assert_eq!(
        contents,
        vec![
            ("a ".to_string(), false),
            ("b ".to_string(), false),
            ("c ".to_string(), true)
        ]
    );

    // Give the pump task a moment to unregister
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(
        orchestrator.get_stream(&stream_id),
        Err(OrchestratorError::StreamNotFound(_))
    ));
}

#[tokio::test]
async fn test_streaming_disabled_returns_full_content() {
    let config = CoreConfig {
        streaming_enabled: false,
        ..test_config(&[])
    };
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("local", "whole answer")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello().streaming()).await.unwrap();
    assert!(!response.is_streaming());
    assert_eq!(response.content, "whole answer");
}

#[tokio::test]
async fn test_native_streaming_provider() {
    let orchestrator = Orchestrator::new(test_config(&[]));
    orchestrator
        .register_provider(Arc::new(ScriptedStreamingProvider::new(
            "native",
            vec![
                ProviderChunk::text("streamed "),
                ProviderChunk::text("reply").with_done(true),
            ],
        )))
        .await
        .unwrap();

    let statuses = orchestrator.provider_statuses().await;
    assert!(statuses[0].supports_streaming);

    let response = orchestrator.process_request(hello().streaming()).await.unwrap();
    let handle = orchestrator.get_stream(response.stream_id.as_deref().unwrap()).unwrap();
    assert_eq!(handle.collect_text().await.unwrap(), "streamed reply");
}

#[tokio::test]
async fn test_cancel_stream() {
    let orchestrator = Orchestrator::new(CoreConfig {
        simulated_chunk_delay_ms: 50,
        ..test_config(&[])
    });
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying(
            "local",
            "one two three four five six",
        )))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello().streaming()).await.unwrap();
    let stream_id = response.stream_id.unwrap();
    let handle = orchestrator.get_stream(&stream_id).unwrap();

    let first = handle.recv().await.unwrap();
    assert_eq!(first.content, "one ");
    orchestrator.cancel_stream(&stream_id).unwrap();

    let mut remaining = 0;
    while let Some(chunk) = handle.recv().await {
        assert!(!chunk.done);
        remaining += 1;
    }
    assert!(remaining < 5);

    assert!(matches!(
        orchestrator.cancel_stream("stream_unknown"),
        Err(OrchestratorError::StreamNotFound(_))
    ));
}

#[tokio::test]
async fn test_stream_failure_is_delivered_in_chunk() {
    let orchestrator = Orchestrator::new(test_config(&["b"]));
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::failing("a", "stream broke")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello().streaming()).await.unwrap();
    let handle = orchestrator.get_stream(response.stream_id.as_deref().unwrap()).unwrap();

    let chunk = handle.recv().await.unwrap();
    assert!(chunk.done);
    assert!(matches!(
        chunk.error,
        Some(crate::stream::StreamError::Provider(LLMError::Network(_)))
    ));
    assert!(handle.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_streams() {
    let orchestrator = Orchestrator::new(CoreConfig {
        simulated_chunk_delay_ms: 100,
        ..test_config(&[])
    });
    orchestrator
        .register_provider(Arc::new(ScriptedProvider::replying("local", "w1 w2 w3 w4 w5")))
        .await
        .unwrap();

    let response = orchestrator.process_request(hello().streaming()).await.unwrap();
    let handle = orchestrator.get_stream(response.stream_id.as_deref().unwrap()).unwrap();
    assert!(handle.recv().await.is_some());

    orchestrator.shutdown();
    let mut saw_done = false;
    while let Some(chunk) = handle.recv().await {
        saw_done |= chunk.done;
    }
    assert!(!saw_done);
}
