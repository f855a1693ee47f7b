pub mod balance;
pub mod classify;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod tokenize;

pub use balance::LoadBalancer;
pub use classify::{Classification, ClassifyInput, classify};
pub use config::{ClassificationConfig, RouterConfig, RoutingDecision};
pub use engine::{EngineOutput, EngineReply, RouterEngine};
pub use pipeline::{Pipeline, PipelineManager, PipelineOutput};
