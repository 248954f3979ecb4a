//! `POST /v1/messages`: decode the Anthropic-shaped wire request, resolve the
//! qualified `provider/model` id against the registry, and either return a single
//! Messages response or frame an SSE stream of named Messages events.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};

use crate::error::GatewayError;
use crate::protocol::anthropic::decoder::decode_request;
use crate::protocol::anthropic::response_encoder::encode_response;
use crate::protocol::anthropic::AnthropicMessagesRequest;
use crate::registry;
use crate::stream::multiplexer::MessagesMultiplexer;

use super::AppState;

pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    match handle(state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: Arc<AppState>, body: bytes::Bytes) -> Result<Response, GatewayError> {
    let wire: AnthropicMessagesRequest =
        serde_json::from_slice(&body).map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;

    let model_id = wire.model.clone();
    let streaming = wire.stream.unwrap_or(false);
    let mut generation = decode_request(&wire)?;
    generation.stream = streaming;

    let language_model = registry::resolve(&state.credentials, &model_id).await?;

    if streaming {
        let events = language_model.stream(&generation).await?;
        let mut multiplexer = MessagesMultiplexer::new(model_id);
        let start = multiplexer.start_frame();

        let framed = stream::once(async move { bytes::Bytes::from(start) }).chain(events.flat_map(move |event| {
            let frames = multiplexer.encode(&event);
            stream::iter(frames.into_iter().map(bytes::Bytes::from))
        }));
        let framed = framed.map(Ok::<_, std::convert::Infallible>);

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
        let encoded = encode_response(&result, &model_id);
        Ok(axum::Json(encoded).into_response())
    }
}
