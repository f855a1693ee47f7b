use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use routecodex_common::{EntryEndpoint, GatewayError};
use routecodex_core::engine::{EngineOutput, RouterEngine};
use routecodex_protocol::Proto;
use routecodex_protocol::openai::stream::ChatCompletionChunk;
use routecodex_protocol::sse::{
    PROVIDER_DATA_EVENT, PROVIDER_DONE_EVENT, SseDecoder, error_frame,
};
use routecodex_switch::generate::stream::EntryStreamEmitter;

#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<RouterEngine>,
}

/// The HTTP entry surface: one route per supported wire protocol plus a
/// liveness probe.
pub fn gateway_router(engine: Arc<RouterEngine>) -> Router {
    let state = GatewayState { engine };
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1beta/models/{*model_action}", post(gemini_post))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}

async fn openai_chat(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(
        state,
        headers,
        Proto::OpenaiChat,
        EntryEndpoint::OpenaiChat,
        "/v1/chat/completions".to_string(),
        body,
        None,
        false,
    )
    .await
}

async fn openai_responses(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(
        state,
        headers,
        Proto::OpenaiResponses,
        EntryEndpoint::OpenaiResponses,
        "/v1/responses".to_string(),
        body,
        None,
        false,
    )
    .await
}

async fn anthropic_messages(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(
        state,
        headers,
        Proto::AnthropicMessages,
        EntryEndpoint::AnthropicMessages,
        "/v1/messages".to_string(),
        body,
        None,
        false,
    )
    .await
}

/// Gemini routes carry `model:action` as the trailing path segment.
async fn gemini_post(
    State(state): State<GatewayState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (model, action) = match model_action.split_once(':') {
        Some((model, action)) => (model.to_string(), action),
        None => (model_action.clone(), "generateContent"),
    };
    let force_stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_response(&GatewayError::config(format!(
                "unsupported gemini action: {other}"
            )));
        }
    };
    let endpoint_path = format!("/v1beta/models/{model}:{action}");
    dispatch(
        state,
        headers,
        Proto::Gemini,
        EntryEndpoint::GeminiGenerate,
        endpoint_path,
        body,
        Some(model),
        force_stream,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: GatewayState,
    headers: HeaderMap,
    entry: Proto,
    entry_endpoint: EntryEndpoint,
    endpoint_path: String,
    body: Bytes,
    path_model: Option<String>,
    force_stream: bool,
) -> Response {
    let body: JsonValue = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            let mut gateway = GatewayError::config(format!("invalid json body: {err}"));
            gateway.status_code = Some(400);
            return error_response(&gateway);
        }
    };
    let session_id = headers
        .get("x-session-id")
        .or_else(|| headers.get("session_id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let reply = state
        .engine
        .handle(
            entry,
            entry_endpoint,
            &endpoint_path,
            body,
            path_model,
            force_stream,
            session_id,
        )
        .await;

    match reply {
        Ok(reply) => match reply.output {
            EngineOutput::Json(body) => axum::Json(body).into_response(),
            EngineOutput::Stream(stream) => {
                sse_response(entry, &reply.metadata.model, &reply.metadata.request_id, stream)
            }
        },
        Err(err) => {
            warn!(
                event = "request_failed",
                endpoint = %endpoint_path,
                kind = %err.kind.as_str(),
                status = err.status_code.unwrap_or(0),
                error = %err,
            );
            error_response(&err)
        }
    }
}

fn error_response(err: &GatewayError) -> Response {
    let status = err
        .status_code
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(err.envelope())).into_response()
}

/// Re-frame the normalized provider stream into the entry protocol's SSE
/// wire format and hand it to the client as `text/event-stream`.
fn sse_response(
    entry: Proto,
    model: &str,
    request_id: &str,
    mut upstream: tokio::sync::mpsc::Receiver<Bytes>,
) -> Response {
    let mut emitter = EntryStreamEmitter::new(entry, model, request_id);
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::convert::Infallible>>(64);

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        let mut finish_reason: Option<String> = None;
        let mut done = false;

        while let Some(chunk) = upstream.recv().await {
            for frame in decoder.feed_bytes(&chunk) {
                match frame.event.as_deref() {
                    Some(PROVIDER_DATA_EVENT) => {
                        let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(&frame.data)
                        else {
                            continue;
                        };
                        if let Some(reason) = parsed
                            .choices
                            .iter()
                            .find_map(|choice| choice.finish_reason.clone())
                        {
                            finish_reason = Some(reason);
                        }
                        for line in emitter.on_chunk(&parsed) {
                            if tx.send(Ok(Bytes::from(line))).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(PROVIDER_DONE_EVENT) => {
                        done = true;
                        for line in emitter.close(finish_reason.as_deref()) {
                            if tx.send(Ok(Bytes::from(line))).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some("error") => {
                        let _ = tx.send(Ok(Bytes::from(error_frame(&frame.data)))).await;
                        return;
                    }
                    _ => {}
                }
            }
        }

        // Upstream closed without a done marker: close the entry framing
        // anyway so clients do not hang on a truncated stream.
        if !done {
            for line in emitter.close(finish_reason.as_deref()) {
                if tx.send(Ok(Bytes::from(line))).await.is_err() {
                    return;
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
