use routecodex_protocol::anthropic::messages::{
    AnthropicContent, AnthropicMessage, AnthropicTool, AnthropicUsage, ContentBlock,
    MessagesRequest, MessagesResponse, SystemPrompt,
};
use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart,
    FunctionCall, FunctionDefinition, ImageUrl, MessageContent, ToolCall, ToolDefinition, Usage,
};
use serde_json::Value as JsonValue;

/// Lower an Anthropic Messages request into the OpenAI-Chat pivot shape.
pub fn transform_request(request: MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.text_concat();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for message in request.messages {
        map_message(message, &mut messages);
    }

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: request.tools.map(map_tools),
        tool_choice: request.tool_choice,
        stream: request.stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        metadata: request.metadata,
        ..Default::default()
    }
}

fn map_message(message: AnthropicMessage, out: &mut Vec<ChatMessage>) {
    let blocks = match message.content {
        AnthropicContent::Text(text) => {
            out.push(ChatMessage::text(message.role, text));
            return;
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.block_type.as_str() {
            "text" => parts.push(ContentPart {
                part_type: "text".to_string(),
                text: block.text,
                ..Default::default()
            }),
            "image" => parts.push(map_image_block(&block)),
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id,
                call_type: Some("function".to_string()),
                function: FunctionCall {
                    name: block.name.unwrap_or_default(),
                    arguments: block
                        .input
                        .map(|input| input.to_string())
                        .unwrap_or_else(|| "{}".to_string()),
                },
            }),
            "tool_result" => out.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(MessageContent::Text(tool_result_text(&block))),
                tool_call_id: block.tool_use_id,
                ..Default::default()
            }),
            _ => {}
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }
    out.push(ChatMessage {
        role: message.role,
        content: (!parts.is_empty()).then_some(MessageContent::Parts(parts)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..Default::default()
    });
}

fn map_image_block(block: &ContentBlock) -> ContentPart {
    let url = block
        .source
        .as_ref()
        .map(|source| {
            let media = source
                .get("media_type")
                .and_then(|value| value.as_str())
                .unwrap_or("image/png");
            let data = source
                .get("data")
                .and_then(|value| value.as_str())
                .unwrap_or_default();
            format!("data:{media};base64,{data}")
        })
        .unwrap_or_default();
    ContentPart {
        part_type: "image_url".to_string(),
        image_url: Some(ImageUrl {
            url,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tool_result_text(block: &ContentBlock) -> String {
    match &block.content {
        Some(JsonValue::String(text)) => text.clone(),
        Some(JsonValue::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn map_tools(tools: Vec<AnthropicTool>) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .map(|tool| ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
                strict: None,
            },
            extra: Default::default(),
        })
        .collect()
}

/// Raise the pivot shape into an Anthropic Messages request (used when the
/// provider speaks Anthropic natively).
pub fn untransform_request(request: ChatCompletionRequest) -> MessagesRequest {
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(content) = message.content {
                    system_texts.push(content.text_concat());
                }
            }
            "tool" => messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Blocks(vec![ContentBlock {
                    block_type: "tool_result".to_string(),
                    tool_use_id: message.tool_call_id,
                    content: message
                        .content
                        .map(|content| JsonValue::String(content.text_concat())),
                    ..Default::default()
                }]),
            }),
            role => {
                let mut blocks = Vec::new();
                if let Some(content) = message.content {
                    let text = content.text_concat();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::text_block(text));
                    }
                }
                for call in message.tool_calls.unwrap_or_default() {
                    blocks.push(ContentBlock {
                        block_type: "tool_use".to_string(),
                        id: call.id,
                        name: Some(call.function.name),
                        input: serde_json::from_str(&call.function.arguments).ok(),
                        ..Default::default()
                    });
                }
                if !blocks.is_empty() {
                    messages.push(AnthropicMessage {
                        role: role.to_string(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
            }
        }
    }

    MessagesRequest {
        model: request.model,
        messages,
        system: (!system_texts.is_empty()).then(|| SystemPrompt::Text(system_texts.join("\n"))),
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| AnthropicTool {
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool.function.parameters,
                    extra: Default::default(),
                })
                .collect()
        }),
        tool_choice: request.tool_choice,
        max_tokens: request.max_tokens.or(request.max_completion_tokens),
        stream: request.stream,
        temperature: request.temperature,
        metadata: request.metadata,
        ..Default::default()
    }
}

/// Lower an Anthropic Messages response into the pivot response shape.
pub fn transform_response(response: MessagesResponse) -> ChatCompletionResponse {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in &response.content {
        match block.block_type.as_str() {
            "text" => {
                if let Some(text) = &block.text {
                    text_parts.push(text.clone());
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id.clone(),
                call_type: Some("function".to_string()),
                function: FunctionCall {
                    name: block.name.clone().unwrap_or_default(),
                    arguments: block
                        .input
                        .as_ref()
                        .map(|input| input.to_string())
                        .unwrap_or_else(|| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    let finish_reason = response.stop_reason.as_deref().map(|reason| match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    });

    ChatCompletionResponse {
        id: response.id,
        model: response.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: (!text_parts.is_empty())
                    .then(|| MessageContent::Text(text_parts.join(""))),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..Default::default()
            },
            finish_reason,
        }],
        usage: response.usage.map(|usage| Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Raise the pivot response into an Anthropic Messages response.
pub fn untransform_response(response: ChatCompletionResponse) -> MessagesResponse {
    let choice = response.choices.into_iter().next().unwrap_or_default();
    let mut content = Vec::new();
    if let Some(text) = choice.message.content.map(|value| value.text_concat())
        && !text.is_empty()
    {
        content.push(ContentBlock::text_block(text));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(ContentBlock {
            block_type: "tool_use".to_string(),
            id: call.id,
            name: Some(call.function.name),
            input: serde_json::from_str(&call.function.arguments).ok(),
            ..Default::default()
        });
    }

    let stop_reason = choice.finish_reason.as_deref().map(|reason| match reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    });

    MessagesResponse {
        id: response.id,
        model: response.model,
        content,
        stop_reason,
        usage: response.usage.map(|usage| AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_tool_result_lower_into_pivot_roles() {
        let request: MessagesRequest = serde_json::from_str(
            r#"{
                "model": "m",
                "system": "be brief",
                "messages": [
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "t1", "content": "42"}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        let pivot = transform_request(request);
        assert_eq!(pivot.messages[0].role, "system");
        assert_eq!(pivot.messages[1].role, "tool");
        assert_eq!(pivot.messages[1].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn tool_use_round_trips_as_tool_calls() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "model": "m",
                "content": [{"type": "tool_use", "id": "tu_1", "name": "search", "input": {"q": "x"}}],
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();
        let pivot = transform_response(response);
        let calls = pivot.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(pivot.choices[0].finish_reason.as_deref(), Some("tool_calls"));

        let back = untransform_response(pivot);
        assert_eq!(back.content[0].block_type, "tool_use");
        assert_eq!(back.stop_reason.as_deref(), Some("tool_use"));
    }
}
