use routecodex_protocol::gemini::generate::{
    Candidate, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
    UsageMetadata,
};
use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionCall,
    FunctionDefinition, MessageContent, ToolCall, ToolDefinition, Usage,
};
use serde_json::{Value as JsonValue, json};

/// Lower a Gemini generate-content request into the OpenAI-Chat pivot.
/// The Gemini path carries the model in the URL, so `model` starts empty and
/// is filled by the dispatcher from the path segment.
pub fn transform_request(request: GenerateContentRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system_instruction {
        let text = system.text_concat();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for content in request.contents {
        let role = match content.role.as_deref() {
            Some("model") => "assistant",
            Some(role) => role,
            None => "user",
        }
        .to_string();

        let mut tool_calls = Vec::new();
        let mut texts = Vec::new();
        for part in content.parts {
            if let Some(text) = part.text {
                texts.push(text);
            } else if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: call
                        .get("id")
                        .and_then(|id| id.as_str())
                        .map(|id| id.to_string()),
                    call_type: Some("function".to_string()),
                    function: FunctionCall {
                        name: call
                            .get("name")
                            .and_then(|name| name.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments: call
                            .get("args")
                            .map(|args| args.to_string())
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                });
            } else if let Some(response) = part.function_response {
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text(
                        response
                            .get("response")
                            .map(|value| value.to_string())
                            .unwrap_or_default(),
                    )),
                    name: response
                        .get("name")
                        .and_then(|name| name.as_str())
                        .map(|name| name.to_string()),
                    ..Default::default()
                });
            }
        }

        if texts.is_empty() && tool_calls.is_empty() {
            continue;
        }
        messages.push(ChatMessage {
            role,
            content: (!texts.is_empty()).then(|| MessageContent::Text(texts.join("\n"))),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..Default::default()
        });
    }

    let config = request.generation_config.unwrap_or_default();
    ChatCompletionRequest {
        messages,
        tools: request.tools.map(map_gemini_tools),
        max_tokens: config.max_output_tokens,
        temperature: config.temperature,
        top_p: config.top_p,
        ..Default::default()
    }
}

fn map_gemini_tools(tools: Vec<JsonValue>) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .flat_map(|tool| {
            tool.get("functionDeclarations")
                .or_else(|| tool.get("function_declarations"))
                .and_then(|decls| decls.as_array().cloned())
                .unwrap_or_default()
        })
        .map(|decl| ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: decl
                    .get("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: decl
                    .get("description")
                    .and_then(|desc| desc.as_str())
                    .map(|desc| desc.to_string()),
                parameters: decl.get("parameters").cloned(),
                strict: None,
            },
            extra: Default::default(),
        })
        .collect()
}

/// Raise the pivot into a Gemini generate-content request.
pub fn untransform_request(request: ChatCompletionRequest) -> GenerateContentRequest {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();

    for message in request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(content) = message.content {
                    system_texts.push(content.text_concat());
                }
            }
            "tool" => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    function_response: Some(json!({
                        "name": message.name.unwrap_or_default(),
                        "response": {"result": message
                            .content
                            .map(|content| content.text_concat())
                            .unwrap_or_default()},
                    })),
                    ..Default::default()
                }],
            }),
            role => {
                let gemini_role = if role == "assistant" { "model" } else { "user" };
                let mut parts = Vec::new();
                if let Some(content) = message.content {
                    let text = content.text_concat();
                    if !text.is_empty() {
                        parts.push(Part {
                            text: Some(text),
                            ..Default::default()
                        });
                    }
                }
                for call in message.tool_calls.unwrap_or_default() {
                    parts.push(Part {
                        function_call: Some(json!({
                            "name": call.function.name,
                            "args": serde_json::from_str::<JsonValue>(&call.function.arguments)
                                .unwrap_or(JsonValue::Object(Default::default())),
                        })),
                        ..Default::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some(gemini_role.to_string()),
                        parts,
                    });
                }
            }
        }
    }

    let max_output_tokens = request.max_tokens.or(request.max_completion_tokens);
    let generation_config = (max_output_tokens.is_some()
        || request.temperature.is_some()
        || request.top_p.is_some())
    .then(|| GenerationConfig {
        max_output_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        ..Default::default()
    });

    GenerateContentRequest {
        contents,
        system_instruction: (!system_texts.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(system_texts.join("\n")),
                ..Default::default()
            }],
        }),
        tools: request.tools.map(|tools| {
            vec![json!({
                "functionDeclarations": tools
                    .into_iter()
                    .map(|tool| {
                        json!({
                            "name": tool.function.name,
                            "description": tool.function.description,
                            "parameters": tool.function.parameters,
                        })
                    })
                    .collect::<Vec<_>>(),
            })]
        }),
        generation_config,
        ..Default::default()
    }
}

/// Lower a Gemini response into the pivot response shape.
pub fn transform_response(response: GenerateContentResponse) -> ChatCompletionResponse {
    let choices = response
        .candidates
        .into_iter()
        .map(map_candidate)
        .collect::<Vec<_>>();

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", response.model_version.as_deref().unwrap_or("gemini")),
        model: response.model_version.unwrap_or_default(),
        choices,
        usage: response.usage_metadata.map(|usage| Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn map_candidate(candidate: Candidate) -> ChatChoice {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            texts.push(text);
        } else if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: None,
                call_type: Some("function".to_string()),
                function: FunctionCall {
                    name: call
                        .get("name")
                        .and_then(|name| name.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call
                        .get("args")
                        .map(|args| args.to_string())
                        .unwrap_or_else(|| "{}".to_string()),
                },
            });
        }
    }

    let finish_reason = candidate.finish_reason.as_deref().map(|reason| match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_ascii_lowercase(),
    });

    ChatChoice {
        index: candidate.index,
        message: ChatMessage {
            role: "assistant".to_string(),
            content: (!texts.is_empty()).then(|| MessageContent::Text(texts.join(""))),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..Default::default()
        },
        finish_reason,
    }
}

/// Raise the pivot response into Gemini candidates.
pub fn untransform_response(response: ChatCompletionResponse) -> GenerateContentResponse {
    let candidates = response
        .choices
        .into_iter()
        .map(|choice| {
            let mut parts = Vec::new();
            if let Some(text) = choice.message.content.map(|content| content.text_concat())
                && !text.is_empty()
            {
                parts.push(Part {
                    text: Some(text),
                    ..Default::default()
                });
            }
            for call in choice.message.tool_calls.unwrap_or_default() {
                parts.push(Part {
                    function_call: Some(json!({
                        "name": call.function.name,
                        "args": serde_json::from_str::<JsonValue>(&call.function.arguments)
                            .unwrap_or(JsonValue::Object(Default::default())),
                    })),
                    ..Default::default()
                });
            }
            Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: choice.finish_reason.as_deref().map(|reason| match reason {
                    "stop" => "STOP".to_string(),
                    "length" => "MAX_TOKENS".to_string(),
                    other => other.to_ascii_uppercase(),
                }),
                index: choice.index,
                ..Default::default()
            }
        })
        .collect();

    GenerateContentResponse {
        candidates,
        usage_metadata: response.usage.map(|usage| UsageMetadata {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens,
            total_token_count: usage.total_tokens,
            ..Default::default()
        }),
        model_version: (!response.model.is_empty()).then_some(response.model),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_declarations_become_pivot_tools_and_back() {
        let request: GenerateContentRequest = serde_json::from_str(
            r#"{
                "contents": [{"role": "user", "parts": [{"text": "search it"}]}],
                "tools": [{"functionDeclarations": [{"name": "web_search", "parameters": {"type": "object"}}]}]
            }"#,
        )
        .unwrap();
        let pivot = transform_request(request);
        let tools = pivot.tools.as_ref().unwrap();
        assert_eq!(tools[0].function.name, "web_search");

        let back = untransform_request(pivot);
        let decls = &back.tools.unwrap()[0]["functionDeclarations"];
        assert_eq!(decls[0]["name"], "web_search");
    }

    #[test]
    fn finish_reasons_map_both_ways() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "x"}]}, "finishReason": "MAX_TOKENS"}]}"#,
        )
        .unwrap();
        let pivot = transform_response(response);
        assert_eq!(pivot.choices[0].finish_reason.as_deref(), Some("length"));
        let back = untransform_response(pivot);
        assert_eq!(back.candidates[0].finish_reason.as_deref(), Some("MAX_TOKENS"));
    }
}
