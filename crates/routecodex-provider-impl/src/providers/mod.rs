pub mod anthropic;
pub mod antigravity;
pub mod deepseek;
pub mod gemini;
pub mod geminicli;
pub mod glm;
pub mod iflow;
pub mod lmstudio;
pub mod openai;
pub mod qwen;
pub(crate) mod upstream;
