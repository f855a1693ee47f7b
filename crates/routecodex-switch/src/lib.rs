pub mod compat;
pub mod generate;
pub mod shape_filter;

pub use compat::{CompatOptions, apply_compatibility};
pub use generate::{switch_request, switch_response};
pub use shape_filter::ShapeFilter;

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("unsupported protocol pair: {input} -> {output}")]
    UnsupportedPair {
        input: &'static str,
        output: &'static str,
    },
    #[error("malformed {proto} payload: {reason}")]
    Malformed { proto: &'static str, reason: String },
}

impl SwitchError {
    pub(crate) fn malformed(proto: &'static str, err: impl std::fmt::Display) -> Self {
        SwitchError::Malformed {
            proto,
            reason: err.to_string(),
        }
    }
}
