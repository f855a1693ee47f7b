use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionDefinition, MessageContent,
    ToolDefinition,
};
use routecodex_protocol::openai::responses::{
    InputItem, ResponsesInput, ResponsesRequest, ResponsesResponse,
};
use serde_json::{Value as JsonValue, json};

/// Lower an OpenAI Responses request into the chat pivot.
pub fn transform_request(request: ResponsesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(instructions) = &request.instructions
        && !instructions.is_empty()
    {
        messages.push(ChatMessage::text("system", instructions.clone()));
    }

    match request.input {
        Some(ResponsesInput::Text(text)) => messages.push(ChatMessage::text("user", text)),
        Some(ResponsesInput::Items(items)) => {
            for item in items {
                if let Some(message) = map_input_item(item) {
                    messages.push(message);
                }
            }
        }
        None => {}
    }

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: request.tools.map(map_responses_tools),
        tool_choice: request.tool_choice,
        stream: request.stream,
        max_tokens: request.max_output_tokens,
        metadata: request.metadata,
        ..Default::default()
    }
}

fn map_input_item(item: InputItem) -> Option<ChatMessage> {
    // Only message-shaped items carry conversation content; function-call
    // items from prior turns are dropped on the non-stateful proxy path.
    match item.item_type.as_deref() {
        None | Some("message") => {
            let text = item.text_concat();
            if text.is_empty() {
                return None;
            }
            Some(ChatMessage::text(
                item.role.unwrap_or_else(|| "user".to_string()),
                text,
            ))
        }
        _ => None,
    }
}

/// Responses tools are flat `{type, name, parameters}`; chat tools nest the
/// function object.
fn map_responses_tools(tools: Vec<JsonValue>) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .filter_map(|tool| {
            if let Some(function) = tool.get("function") {
                return serde_json::from_value(json!({
                    "type": "function",
                    "function": function,
                }))
                .ok();
            }
            let name = tool.get("name").and_then(|name| name.as_str())?;
            Some(ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: name.to_string(),
                    description: tool
                        .get("description")
                        .and_then(|desc| desc.as_str())
                        .map(|desc| desc.to_string()),
                    parameters: tool.get("parameters").cloned(),
                    strict: tool.get("strict").and_then(|strict| strict.as_bool()),
                },
                extra: Default::default(),
            })
        })
        .collect()
}

/// Raise the chat pivot into a Responses request.
pub fn untransform_request(request: ChatCompletionRequest) -> ResponsesRequest {
    let mut instructions = Vec::new();
    let mut items = Vec::new();

    for message in request.messages {
        if matches!(message.role.as_str(), "system" | "developer") {
            if let Some(content) = message.content {
                instructions.push(content.text_concat());
            }
            continue;
        }
        let text = message
            .content
            .map(|content| content.text_concat())
            .unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        let content_type = if message.role == "assistant" {
            "output_text"
        } else {
            "input_text"
        };
        items.push(InputItem {
            item_type: Some("message".to_string()),
            role: Some(message.role),
            content: Some(json!([{"type": content_type, "text": text}])),
            ..Default::default()
        });
    }

    ResponsesRequest {
        model: request.model,
        input: Some(ResponsesInput::Items(items)),
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n")),
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.function.name,
                        "description": tool.function.description,
                        "parameters": tool.function.parameters,
                    })
                })
                .collect()
        }),
        tool_choice: request.tool_choice,
        stream: request.stream,
        max_output_tokens: request.max_tokens.or(request.max_completion_tokens),
        metadata: request.metadata,
        ..Default::default()
    }
}

/// Lower a Responses response into the chat pivot.
pub fn transform_response(response: ResponsesResponse) -> ChatCompletionResponse {
    let mut texts = Vec::new();
    for item in &response.output {
        let Some("message") = item.get("type").and_then(|value| value.as_str()) else {
            continue;
        };
        let Some(parts) = item.get("content").and_then(|content| content.as_array()) else {
            continue;
        };
        for part in parts {
            if let Some(text) = part.get("text").and_then(|text| text.as_str()) {
                texts.push(text.to_string());
            }
        }
    }

    ChatCompletionResponse {
        id: response.id,
        model: response.model,
        created: response.created_at,
        choices: vec![routecodex_protocol::openai::chat::ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: Some(MessageContent::Text(texts.join(""))),
                ..Default::default()
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: response
            .usage
            .and_then(|usage| serde_json::from_value(usage).ok()),
        ..Default::default()
    }
}

/// Raise the chat pivot into a Responses response.
pub fn untransform_response(response: ChatCompletionResponse) -> ResponsesResponse {
    let choice = response.choices.into_iter().next().unwrap_or_default();
    let text = choice
        .message
        .content
        .map(|content| content.text_concat())
        .unwrap_or_default();

    ResponsesResponse {
        id: response.id,
        created_at: response.created,
        model: response.model,
        output: vec![json!({
            "type": "message",
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text}],
        })],
        usage: response
            .usage
            .and_then(|usage| serde_json::to_value(usage).ok()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_become_system_message() {
        let request: ResponsesRequest = serde_json::from_str(
            r#"{"model": "m", "instructions": "be terse", "input": "hello"}"#,
        )
        .unwrap();
        let pivot = transform_request(request);
        assert_eq!(pivot.messages[0].role, "system");
        assert_eq!(pivot.messages[1].role, "user");
    }

    #[test]
    fn flat_responses_tools_are_nested_for_chat() {
        let request: ResponsesRequest = serde_json::from_str(
            r#"{"model": "m", "input": "x", "tools": [{"type": "function", "name": "run_code", "parameters": {}}]}"#,
        )
        .unwrap();
        let pivot = transform_request(request);
        assert_eq!(pivot.tools.unwrap()[0].function.name, "run_code");
    }

    #[test]
    fn pivot_response_raises_to_output_text() {
        let response = ChatCompletionResponse {
            id: "r1".to_string(),
            model: "m".to_string(),
            choices: vec![routecodex_protocol::openai::chat::ChatChoice {
                index: 0,
                message: ChatMessage::text("assistant", "done"),
                finish_reason: Some("stop".to_string()),
            }],
            ..Default::default()
        };
        let raised = untransform_response(response);
        assert_eq!(raised.output[0]["content"][0]["text"], "done");
    }
}
