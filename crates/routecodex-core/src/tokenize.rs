use std::sync::OnceLock;

use serde::Serialize;
use tiktoken_rs::CoreBPE;

/// The accurate counter behind classification. `o200k_base` covers the
/// model families this gateway fronts. There is no approximate fallback:
/// when the encoder cannot load, classification degrades to the default
/// route instead of guessing.
fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::o200k_base().ok()).as_ref()
}

pub fn count_text(text: &str) -> Option<usize> {
    if text.is_empty() {
        return Some(0);
    }
    Some(encoder()?.encode_with_special_tokens(text).len())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenAnalysis {
    pub total_tokens: u64,
    pub message_tokens: u64,
    pub system_tokens: u64,
    pub tool_tokens: u64,
}

/// Count the three request sections. `None` means the counter is
/// unavailable and the caller must fall back.
pub fn analyze_tokens(
    message_text: &str,
    system_text: &str,
    tools_json: &str,
) -> Option<TokenAnalysis> {
    let message_tokens = count_text(message_text)? as u64;
    let system_tokens = count_text(system_text)? as u64;
    let tool_tokens = count_text(tools_json)? as u64;
    Some(TokenAnalysis {
        total_tokens: message_tokens + system_tokens + tool_tokens,
        message_tokens,
        system_tokens,
        tool_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic_and_monotone() {
        let short = count_text("hello world").unwrap();
        let long = count_text(&"hello world ".repeat(100)).unwrap();
        assert!(short > 0);
        assert!(long > short);
        assert_eq!(count_text("hello world").unwrap(), short);
    }

    #[test]
    fn sections_sum_into_total() {
        let analysis = analyze_tokens("user text", "system text", "{\"tools\":[]}").unwrap();
        assert_eq!(
            analysis.total_tokens,
            analysis.message_tokens + analysis.system_tokens + analysis.tool_tokens
        );
    }
}
