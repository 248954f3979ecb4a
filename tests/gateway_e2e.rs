//! End-to-end scenarios from spec S8, driven against the real HTTP dispatch path
//! (`dispatch_request`) and a raw hyper mock upstream — no mocked adapters, no
//! in-process shortcuts. Mirrors the request/response shapes the teacher's own
//! `openai_chat_forward.rs` drove against a mock upstream, adapted to this gateway's
//! credential-store-backed registry instead of its dropped `upstream_services` config.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

use ai_gateway::credentials::{CredentialKind, CredentialRecord, CredentialStore};
use ai_gateway::http::{dispatch_request, AppState};

const NONSTREAM_TEXT: &[u8] =
    br#"{"id":"chatcmpl-mock","object":"chat.completion","created":1,"model":"m1","choices":[{"index":0,"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;

fn tool_call_stream_body() -> Vec<u8> {
    let chunk1 = serde_json::json!({
        "id": "c1", "object": "chat.completion.chunk", "created": 1, "model": "m1",
        "choices": [{
            "index": 0,
            "delta": {
                "role": "assistant",
                "tool_calls": [{
                    "index": 0, "id": "call_1", "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\":"},
                }],
            },
            "finish_reason": null,
        }],
    });
    let chunk2 = serde_json::json!({
        "id": "c1", "object": "chat.completion.chunk", "created": 1, "model": "m1",
        "choices": [{
            "index": 0,
            "delta": {
                "tool_calls": [{"index": 0, "function": {"arguments": "\"Tokyo\"}"}}],
            },
            "finish_reason": null,
        }],
    });
    let chunk3 = serde_json::json!({
        "id": "c1", "object": "chat.completion.chunk", "created": 1, "model": "m1",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
    });
    format!(
        "data: {}\n\ndata: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        chunk1, chunk2, chunk3
    )
    .into_bytes()
}

/// Spawns a minimal hyper mock upstream on an ephemeral loopback port that always
/// returns `body` for every POST, with `content_type` as its sole response header.
/// Returns the bound port; the server task runs until the test process exits.
async fn spawn_mock_upstream(body: Vec<u8>, content_type: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral mock upstream port");
    let port = listener.local_addr().expect("local addr").port();
    let body = Bytes::from(body);

    tokio::spawn(async move {
        let conn_builder = AutoBuilder::new(TokioExecutor::new());
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let io = TokioIo::new(stream);
            let builder = conn_builder.clone();
            let body = body.clone();
            let service = service_fn(move |request: Request<Incoming>| {
                let body = body.clone();
                async move {
                    let (_, incoming) = request.into_parts();
                    let _ = incoming.collect().await;
                    let mut response = Response::new(Full::new(body));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, content_type.parse().unwrap());
                    Ok::<_, Infallible>(response)
                }
            });
            tokio::spawn(async move {
                let _ = builder.serve_connection(io, service).await;
            });
        }
    });

    port
}

fn state_with_litellm_credential(base_url: String) -> Arc<AppState> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "ai-gateway-e2e-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let store = CredentialStore::load(dir.join("auth.json"));
    store
        .put(
            "litellm",
            CredentialRecord {
                api_key: Some("test-key".to_string()),
                project_id: Some(base_url),
                enabled_models: vec!["test-model".to_string()],
                kind: Some(CredentialKind::Key),
                ..Default::default()
            },
        )
        .expect("seed litellm credential");

    Arc::new(AppState {
        credentials: Arc::new(store),
    })
}

fn empty_state() -> Arc<AppState> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "ai-gateway-e2e-empty-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    Arc::new(AppState {
        credentials: Arc::new(CredentialStore::load(dir.join("auth.json"))),
    })
}

async fn post(state: &Arc<AppState>, path: &str, body: serde_json::Value) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = dispatch_request(Arc::clone(state), Arc::from(""), request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

#[tokio::test]
async fn models_listing_is_exactly_the_credentialed_cross_product() {
    // Spec S8 scenario 1: a store holding only `openai` with one enabled model
    // yields a single-element `data` array, not a cross-product with any
    // credential-free provider (cursor has no credential record per S4.2).
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "ai-gateway-e2e-models-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let store = CredentialStore::load(dir.join("auth.json"));
    store
        .put(
            "openai",
            CredentialRecord {
                api_key: Some("sk-test".to_string()),
                enabled_models: vec!["gpt-4o-mini".to_string()],
                kind: Some(CredentialKind::Key),
                ..Default::default()
            },
        )
        .expect("seed openai credential");
    let state = Arc::new(AppState {
        credentials: Arc::new(store),
    });

    let request = Request::builder()
        .method("GET")
        .uri("/v1/models")
        .body(Body::empty())
        .unwrap();
    let response = dispatch_request(Arc::clone(&state), Arc::from(""), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    let data = parsed["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "openai/gpt-4o-mini");
    assert_eq!(data[0]["object"], "model");
    assert_eq!(data[0]["owned_by"], "ai-gateway");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn chat_completions_non_stream_text_scenario() {
    let port = spawn_mock_upstream(NONSTREAM_TEXT.to_vec(), "application/json").await;
    let state = state_with_litellm_credential(format!("http://127.0.0.1:{port}"));

    let (status, body) = post(
        &state,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "litellm/test-model",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
            "max_tokens": 5,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["choices"][0]["message"]["content"], "ok");
    assert_eq!(parsed["choices"][0]["finish_reason"], "stop");
    assert!(parsed["usage"]["total_tokens"].is_number());
}

#[tokio::test]
async fn chat_completions_stream_tool_call_scenario() {
    let port = spawn_mock_upstream(tool_call_stream_body(), "text/event-stream").await;
    let state = state_with_litellm_credential(format!("http://127.0.0.1:{port}"));

    let (status, body) = post(
        &state,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "litellm/test-model",
            "stream": true,
            "messages": [{"role": "user", "content": "weather in Tokyo"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "get the weather",
                    "parameters": {"type": "object", "properties": {"location": {"type": "string"}}},
                },
            }],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("\"name\":\"get_weather\""));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    let mut args = String::new();
    let mut saw_finish = false;
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload == "[DONE]" {
            continue;
        }
        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
        if let Some(arguments) = chunk["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str() {
            args.push_str(arguments);
        }
        if chunk["choices"][0]["finish_reason"] == "tool_calls" {
            saw_finish = true;
        }
    }
    assert!(saw_finish);
    let parsed_args: serde_json::Value = serde_json::from_str(&args).unwrap();
    assert_eq!(parsed_args["location"], "Tokyo");
}

#[tokio::test]
async fn messages_stream_tool_call_scenario() {
    let port = spawn_mock_upstream(tool_call_stream_body(), "text/event-stream").await;
    let state = state_with_litellm_credential(format!("http://127.0.0.1:{port}"));

    let (status, body) = post(
        &state,
        "/v1/messages",
        serde_json::json!({
            "model": "litellm/test-model",
            "stream": true,
            "max_tokens": 200,
            "messages": [{"role": "user", "content": "weather in Tokyo"}],
            "tools": [{
                "name": "get_weather",
                "description": "get the weather",
                "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}},
            }],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();

    let event_order: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(
        event_order,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    assert!(text.contains("\"name\":\"get_weather\""));

    let mut partial_json = String::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        if value["type"] == "content_block_delta" && value["delta"]["type"] == "input_json_delta" {
            partial_json.push_str(value["delta"]["partial_json"].as_str().unwrap());
        }
        if value["type"] == "message_delta" {
            assert_eq!(value["delta"]["stop_reason"], "tool_use");
        }
    }
    let parsed: serde_json::Value = serde_json::from_str(&partial_json).unwrap();
    assert_eq!(parsed["location"], "Tokyo");
}

#[tokio::test]
async fn unknown_provider_returns_500_with_provider_message() {
    let state = empty_state();
    let (status, body) = post(
        &state,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "nope/x",
            "messages": [{"role": "user", "content": "hi"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["message"], "Unsupported provider: nope");
}

#[tokio::test]
async fn missing_credentials_returns_500_mentioning_provider() {
    let state = empty_state();
    let (status, body) = post(
        &state,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let message = parsed["error"]["message"].as_str().unwrap();
    assert!(message.contains("openai"));
}
