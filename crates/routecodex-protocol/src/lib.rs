pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;

/// Entry/provider wire protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Proto {
    OpenaiChat,
    OpenaiResponses,
    AnthropicMessages,
    Gemini,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenaiChat => "openai-chat",
            Proto::OpenaiResponses => "openai-responses",
            Proto::AnthropicMessages => "anthropic-messages",
            Proto::Gemini => "gemini",
        }
    }
}
