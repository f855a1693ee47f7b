use routecodex_protocol::Proto;
use routecodex_protocol::openai::chat::{ChatCompletionRequest, ChatCompletionResponse};
use serde_json::Value as JsonValue;

use crate::SwitchError;

pub mod anthropic2openai_chat;
pub mod gemini2openai_chat;
pub mod responses2openai_chat;
pub mod stream;

/// Translate a request body from the entry protocol to the provider
/// protocol. OpenAI Chat is the pivot shape: every entry protocol lowers
/// into it and every provider protocol is produced from it, so adding a
/// protocol means writing one pair of lowers instead of a full matrix row.
pub fn switch_request(
    input: Proto,
    output: Proto,
    body: JsonValue,
) -> Result<JsonValue, SwitchError> {
    if input == output {
        return Ok(body);
    }
    let pivot = lower_request(input, body)?;
    raise_request(output, pivot)
}

/// Translate a provider response body back into the entry protocol.
pub fn switch_response(
    provider: Proto,
    entry: Proto,
    body: JsonValue,
) -> Result<JsonValue, SwitchError> {
    if provider == entry {
        return Ok(body);
    }
    let pivot = lower_response(provider, body)?;
    raise_response(entry, pivot)
}

fn lower_request(input: Proto, body: JsonValue) -> Result<ChatCompletionRequest, SwitchError> {
    match input {
        Proto::OpenaiChat => serde_json::from_value(body)
            .map_err(|err| SwitchError::malformed("openai-chat", err)),
        Proto::OpenaiResponses => {
            let request = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("openai-responses", err))?;
            Ok(responses2openai_chat::transform_request(request))
        }
        Proto::AnthropicMessages => {
            let request = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("anthropic-messages", err))?;
            Ok(anthropic2openai_chat::transform_request(request))
        }
        Proto::Gemini => {
            let request = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("gemini", err))?;
            Ok(gemini2openai_chat::transform_request(request))
        }
    }
}

fn raise_request(output: Proto, pivot: ChatCompletionRequest) -> Result<JsonValue, SwitchError> {
    let value = match output {
        Proto::OpenaiChat => serde_json::to_value(pivot),
        Proto::OpenaiResponses => {
            serde_json::to_value(responses2openai_chat::untransform_request(pivot))
        }
        Proto::AnthropicMessages => {
            serde_json::to_value(anthropic2openai_chat::untransform_request(pivot))
        }
        Proto::Gemini => serde_json::to_value(gemini2openai_chat::untransform_request(pivot)),
    };
    value.map_err(|err| SwitchError::malformed("pivot", err))
}

fn lower_response(provider: Proto, body: JsonValue) -> Result<ChatCompletionResponse, SwitchError> {
    match provider {
        Proto::OpenaiChat => serde_json::from_value(body)
            .map_err(|err| SwitchError::malformed("openai-chat", err)),
        Proto::OpenaiResponses => {
            let response = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("openai-responses", err))?;
            Ok(responses2openai_chat::transform_response(response))
        }
        Proto::AnthropicMessages => {
            let response = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("anthropic-messages", err))?;
            Ok(anthropic2openai_chat::transform_response(response))
        }
        Proto::Gemini => {
            let response = serde_json::from_value(body)
                .map_err(|err| SwitchError::malformed("gemini", err))?;
            Ok(gemini2openai_chat::transform_response(response))
        }
    }
}

fn raise_response(entry: Proto, pivot: ChatCompletionResponse) -> Result<JsonValue, SwitchError> {
    let value = match entry {
        Proto::OpenaiChat => serde_json::to_value(pivot),
        Proto::OpenaiResponses => {
            serde_json::to_value(responses2openai_chat::untransform_response(pivot))
        }
        Proto::AnthropicMessages => {
            serde_json::to_value(anthropic2openai_chat::untransform_response(pivot))
        }
        Proto::Gemini => serde_json::to_value(gemini2openai_chat::untransform_response(pivot)),
    };
    value.map_err(|err| SwitchError::malformed("pivot", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_pair_is_passthrough() {
        let body = json!({"model": "m", "messages": [], "custom": 1});
        let out = switch_request(Proto::OpenaiChat, Proto::OpenaiChat, body.clone()).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn anthropic_request_reaches_gemini_through_pivot() {
        let body = json!({
            "model": "glm-4.6",
            "max_tokens": 128,
            "messages": [{"role": "user", "content": "hello"}]
        });
        let out = switch_request(Proto::AnthropicMessages, Proto::Gemini, body).unwrap();
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(out["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 128);
    }

    #[test]
    fn gemini_response_raises_to_anthropic_blocks() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        });
        let out = switch_response(Proto::Gemini, Proto::AnthropicMessages, body).unwrap();
        assert_eq!(out["content"][0]["type"], "text");
        assert_eq!(out["content"][0]["text"], "hi");
        assert_eq!(out["usage"]["input_tokens"], 3);
    }
}
