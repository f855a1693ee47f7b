use std::collections::BTreeMap;

use routecodex_common::{GatewayError, RouteTarget};
use routecodex_provider_core::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Field locations for one entry protocol, used by the classifier to read
/// protocol-shaped requests without hardcoding shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMapping {
    pub endpoints: Vec<String>,
    #[serde(default = "default_messages_field")]
    pub message_field: String,
    #[serde(default = "default_model_field")]
    pub model_field: String,
    #[serde(default = "default_tools_field")]
    pub tools_field: String,
    #[serde(default = "default_max_tokens_field")]
    pub max_tokens_field: String,
}

fn default_messages_field() -> String {
    "messages".to_string()
}

fn default_model_field() -> String {
    "model".to_string()
}

fn default_tools_field() -> String {
    "tools".to_string()
}

fn default_max_tokens_field() -> String {
    "max_tokens".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierConfig {
    pub models: Vec<String>,
    #[serde(default)]
    pub max_tokens: i64,
    #[serde(default)]
    pub supported_features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTiers {
    #[serde(default)]
    pub basic: TierConfig,
    #[serde(default)]
    pub advanced: TierConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingDecision {
    #[serde(default)]
    pub model_tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_threshold: Option<u64>,
    #[serde(default)]
    pub tool_types: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

pub const DEFAULT_LONG_CONTEXT_THRESHOLD: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub protocol_mapping: BTreeMap<String, ProtocolMapping>,
    #[serde(default)]
    pub model_tiers: ModelTiers,
    #[serde(default)]
    pub routing_decisions: BTreeMap<String, RoutingDecision>,
    #[serde(default)]
    pub thinking_keywords: Vec<String>,
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold_tokens: u64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_long_context_threshold() -> u64 {
    DEFAULT_LONG_CONTEXT_THRESHOLD
}

fn default_confidence_threshold() -> f64 {
    0.5
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            protocol_mapping: BTreeMap::new(),
            model_tiers: ModelTiers::default(),
            routing_decisions: BTreeMap::new(),
            thinking_keywords: Vec::new(),
            long_context_threshold_tokens: DEFAULT_LONG_CONTEXT_THRESHOLD,
            confidence_threshold: 0.5,
        }
    }
}

/// The full router configuration: classification rules, route target pools,
/// and the per-target pipeline table. Read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub route_pools: BTreeMap<String, Vec<RouteTarget>>,
    /// Keyed `<provider>.<model>.<key>`.
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_filter_dir: Option<String>,
}

impl RouterConfig {
    /// Startup validation: unique targets per pool and a pipeline entry for
    /// every target. Violations are fatal configuration errors.
    pub fn validate(&self) -> Result<(), GatewayError> {
        for (route, targets) in &self.route_pools {
            let mut seen = std::collections::BTreeSet::new();
            for target in targets {
                let key = target.key();
                if !seen.insert(key.clone()) {
                    return Err(GatewayError::config(format!(
                        "route {route}: duplicate target {key}"
                    )));
                }
                if !self.pipelines.contains_key(key.as_str()) {
                    return Err(GatewayError::config(format!(
                        "route {route}: target {key} has no pipeline config"
                    )));
                }
            }
        }
        Ok(())
    }
}
