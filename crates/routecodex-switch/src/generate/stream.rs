use routecodex_protocol::Proto;
use routecodex_protocol::openai::stream::ChatCompletionChunk;
use routecodex_protocol::sse::{DONE_SENTINEL, format_frame};
use serde_json::json;

/// Re-frames normalized pivot chunks (`openai-chat` chunk JSON carried in
/// `provider.data` events) into the entry protocol's SSE wire format.
///
/// The emitter is stateful because Anthropic and Responses framing need
/// open/close bookkeeping (`message_start`, `content_block_stop`, …) that
/// the pivot chunks do not carry.
#[derive(Debug)]
pub struct EntryStreamEmitter {
    entry: Proto,
    model: String,
    request_id: String,
    opened: bool,
    block_open: bool,
}

impl EntryStreamEmitter {
    pub fn new(entry: Proto, model: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            entry,
            model: model.into(),
            request_id: request_id.into(),
            opened: false,
            block_open: false,
        }
    }

    /// Frames to send before the first chunk.
    pub fn open(&mut self) -> Vec<String> {
        if self.opened {
            return Vec::new();
        }
        self.opened = true;
        match self.entry {
            Proto::OpenaiChat | Proto::Gemini => Vec::new(),
            Proto::AnthropicMessages => vec![format_frame(
                Some("message_start"),
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": self.request_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                })
                .to_string(),
            )],
            Proto::OpenaiResponses => vec![format_frame(
                Some("response.created"),
                &json!({
                    "type": "response.created",
                    "response": {"id": self.request_id, "model": self.model, "status": "in_progress"},
                })
                .to_string(),
            )],
        }
    }

    pub fn on_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<String> {
        let mut frames = self.open();
        match self.entry {
            Proto::OpenaiChat => {
                if let Ok(data) = serde_json::to_string(chunk) {
                    frames.push(format_frame(None, &data));
                }
            }
            Proto::AnthropicMessages => {
                for choice in &chunk.choices {
                    let Some(content) = &choice.delta.content else {
                        continue;
                    };
                    if !self.block_open {
                        self.block_open = true;
                        frames.push(format_frame(
                            Some("content_block_start"),
                            &json!({
                                "type": "content_block_start",
                                "index": 0,
                                "content_block": {"type": "text", "text": ""},
                            })
                            .to_string(),
                        ));
                    }
                    frames.push(format_frame(
                        Some("content_block_delta"),
                        &json!({
                            "type": "content_block_delta",
                            "index": 0,
                            "delta": {"type": "text_delta", "text": content},
                        })
                        .to_string(),
                    ));
                }
            }
            Proto::OpenaiResponses => {
                for choice in &chunk.choices {
                    if let Some(content) = &choice.delta.content {
                        frames.push(format_frame(
                            Some("response.output_text.delta"),
                            &json!({
                                "type": "response.output_text.delta",
                                "delta": content,
                            })
                            .to_string(),
                        ));
                    }
                }
            }
            Proto::Gemini => {
                for choice in &chunk.choices {
                    let Some(content) = &choice.delta.content else {
                        continue;
                    };
                    frames.push(format_frame(
                        None,
                        &json!({
                            "candidates": [{
                                "content": {"role": "model", "parts": [{"text": content}]},
                                "index": choice.index,
                            }],
                        })
                        .to_string(),
                    ));
                }
            }
        }
        frames
    }

    /// Terminal frames after the provider stream ends.
    pub fn close(&mut self, finish_reason: Option<&str>) -> Vec<String> {
        let mut frames = self.open();
        match self.entry {
            Proto::OpenaiChat => {
                frames.push(format_frame(None, DONE_SENTINEL));
            }
            Proto::AnthropicMessages => {
                if self.block_open {
                    frames.push(format_frame(
                        Some("content_block_stop"),
                        &json!({"type": "content_block_stop", "index": 0}).to_string(),
                    ));
                }
                let stop_reason = match finish_reason {
                    Some("length") => "max_tokens",
                    Some("tool_calls") => "tool_use",
                    _ => "end_turn",
                };
                frames.push(format_frame(
                    Some("message_delta"),
                    &json!({
                        "type": "message_delta",
                        "delta": {"stop_reason": stop_reason},
                        "usage": {"output_tokens": 0},
                    })
                    .to_string(),
                ));
                frames.push(format_frame(
                    Some("message_stop"),
                    &json!({"type": "message_stop"}).to_string(),
                ));
            }
            Proto::OpenaiResponses => {
                frames.push(format_frame(
                    Some("response.completed"),
                    &json!({
                        "type": "response.completed",
                        "response": {"id": self.request_id, "model": self.model, "status": "completed"},
                    })
                    .to_string(),
                ));
            }
            Proto::Gemini => {}
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_protocol::openai::stream::{ChunkChoice, ChunkDelta};

    fn text_chunk(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            model: "m".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(text.to_string()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn anthropic_framing_brackets_deltas() {
        let mut emitter =
            EntryStreamEmitter::new(Proto::AnthropicMessages, "m", "msg_1");
        let frames = emitter.on_chunk(&text_chunk("he"));
        assert!(frames[0].starts_with("event: message_start"));
        assert!(frames[1].starts_with("event: content_block_start"));
        assert!(frames[2].starts_with("event: content_block_delta"));

        let frames = emitter.on_chunk(&text_chunk("llo"));
        assert_eq!(frames.len(), 1);

        let frames = emitter.close(Some("stop"));
        assert!(frames.iter().any(|frame| frame.starts_with("event: message_stop")));
    }

    #[test]
    fn openai_chat_closes_with_done_sentinel() {
        let mut emitter = EntryStreamEmitter::new(Proto::OpenaiChat, "m", "r1");
        let _ = emitter.on_chunk(&text_chunk("x"));
        let frames = emitter.close(None);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }
}
