use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// OpenAI Responses API request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponsesInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<InputItem>),
}

impl ResponsesInput {
    pub fn text_concat(&self) -> String {
        match self {
            ResponsesInput::Text(text) => text.clone(),
            ResponsesInput::Items(items) => items
                .iter()
                .map(InputItem::text_concat)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl InputItem {
    pub fn text_concat(&self) -> String {
        match &self.content {
            Some(JsonValue::String(text)) => text.clone(),
            Some(JsonValue::Array(parts)) => parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .and_then(|text| text.as_str())
                        .map(|text| text.to_string())
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }

    pub fn has_image(&self) -> bool {
        let Some(JsonValue::Array(parts)) = &self.content else {
            return false;
        };
        parts.iter().any(|part| {
            part.get("type")
                .and_then(|value| value.as_str())
                .is_some_and(|value| value.contains("image"))
                || part
                    .get("image_url")
                    .and_then(|value| value.get("url").or(Some(value)))
                    .and_then(|value| value.as_str())
                    .is_some_and(|url| !url.is_empty())
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    #[serde(default = "response_object")]
    pub object: String,
    #[serde(default)]
    pub created_at: i64,
    pub model: String,
    #[serde(default)]
    pub output: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn response_object() -> String {
    "response".to_string()
}
