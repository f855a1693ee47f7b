use bytes::Bytes;
use routecodex_common::EntryEndpoint;
use serde_json::Value as JsonValue;

use crate::headers::Headers;

pub type SseStream = tokio::sync::mpsc::Receiver<Bytes>;

/// Request handed to a provider by the pipeline: a protocol-correct JSON
/// body plus the envelope the provider needs for snapshots and restoration.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub body: JsonValue,
    pub entry_endpoint: EntryEndpoint,
    pub request_id: String,
    /// Model named by the inbound request, before the pipeline override.
    pub orig_model: String,
    /// Downstream asked for a streamed response.
    pub wants_stream: bool,
    /// Caller session, when the entry surface carried one. Keys per-session
    /// provider state such as the Antigravity signature cache.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub processing_time_ms: u64,
    /// Inbound model restored for the downstream response.
    pub model: String,
    pub usage: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub data: JsonValue,
    pub status: u16,
    pub headers: Headers,
    pub metadata: ResponseMetadata,
}

/// What a provider hands back: a complete JSON body, or a raw upstream SSE
/// byte stream for providers that opted into streaming upstream.
#[derive(Debug)]
pub enum ProviderReply {
    Json(ProviderResponse),
    Sse {
        stream: SseStream,
        metadata: ResponseMetadata,
    },
}
