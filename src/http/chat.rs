//! `POST /v1/chat/completions`: decode the OpenAI-shaped wire request, resolve the
//! qualified `provider/model` id against the registry, and either return a single
//! `chat.completion` body or frame an SSE stream of `chat.completion.chunk`s.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use crate::error::GatewayError;
use crate::protocol::openai_chat::decoder::decode_request;
use crate::protocol::openai_chat::response_encoder::encode_response;
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::registry;
use crate::stream::multiplexer::ChatCompletionsMultiplexer;
use crate::util::next_generated_id;

use super::AppState;

static RESPONSE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    match handle(state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: Arc<AppState>, body: bytes::Bytes) -> Result<Response, GatewayError> {
    let wire: OpenAiChatRequest =
        serde_json::from_slice(&body).map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;

    let model_id = wire.model.clone();
    let stream = wire.stream.unwrap_or(false);
    let mut generation = decode_request(&wire)?;
    generation.stream = stream;

    let language_model = registry::resolve(&state.credentials, &model_id).await?;

    if stream {
        let id = next_generated_id("chatcmpl", &RESPONSE_ID_COUNTER);
        let created = crate::util::unix_now_secs();
        let events = language_model.stream(&generation).await?;

        let multiplexer = ChatCompletionsMultiplexer::new(id, model_id, created);
        let framed = events.map(move |event| {
            let frame = multiplexer.encode(&event);
            Ok::<_, std::convert::Infallible>(bytes::Bytes::from(frame))
        });

        let mut response = Response::new(axum::body::Body::from_stream(framed));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(response)
    } else {
        let result = language_model.generate(&generation).await?;
        let id = next_generated_id("chatcmpl", &RESPONSE_ID_COUNTER);
        let encoded = encode_response(&result, &id, &model_id);
        Ok(axum::Json(encoded).into_response())
    }
}
