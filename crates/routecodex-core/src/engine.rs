use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::{Value as JsonValue, json};
use tracing::info;

use routecodex_common::{EntryEndpoint, GatewayError, RouteTarget, new_request_id};
use routecodex_protocol::Proto;
use routecodex_provider_core::{ResponseMetadata, SseStream};

use crate::balance::LoadBalancer;
use crate::classify::{ClassifyInput, classify};
use crate::config::RouterConfig;
use crate::pipeline::{PipelineManager, PipelineOutput};

#[derive(Debug)]
pub enum EngineOutput {
    Json(JsonValue),
    Stream(SseStream),
}

#[derive(Debug)]
pub struct EngineReply {
    pub route: String,
    pub target: RouteTarget,
    pub output: EngineOutput,
    pub metadata: ResponseMetadata,
}

/// The request dispatcher: classify → balance → pipeline → postprocess.
pub struct RouterEngine {
    config: RouterConfig,
    balancer: LoadBalancer,
    pipelines: PipelineManager,
    configured_routes: BTreeSet<String>,
    runtime_key: String,
}

impl RouterEngine {
    pub fn new(config: RouterConfig, runtime_key: impl Into<String>) -> Result<Self, GatewayError> {
        config.validate()?;
        let balancer = LoadBalancer::new(&config.route_pools);
        let configured_routes = balancer.configured_routes();
        let pipelines = PipelineManager::new(
            config.pipelines.clone(),
            config.shape_filter_dir.clone().map(PathBuf::from),
        );
        Ok(Self {
            config,
            balancer,
            pipelines,
            configured_routes,
            runtime_key: runtime_key.into(),
        })
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Handle one inbound request end to end.
    ///
    /// `path_model` carries the URL model for Gemini-style endpoints;
    /// `force_stream` marks endpoints that are streaming by construction
    /// (`:streamGenerateContent`).
    pub async fn handle(
        &self,
        entry: Proto,
        entry_endpoint: EntryEndpoint,
        endpoint_path: &str,
        mut body: JsonValue,
        path_model: Option<String>,
        force_stream: bool,
        session_id: Option<String>,
    ) -> Result<EngineReply, GatewayError> {
        let request_id = new_request_id();

        let orig_model = path_model
            .clone()
            .or_else(|| {
                body.get("model")
                    .and_then(|model| model.as_str())
                    .map(|model| model.to_string())
            })
            .unwrap_or_default();
        let wants_stream = force_stream
            || body
                .get("stream")
                .and_then(|stream| stream.as_bool())
                .unwrap_or(false);

        // Server-side envelope: user-supplied metadata is replaced wholesale
        // so nothing downstream trusts caller-controlled routing hints.
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "metadata".to_string(),
                json!({"entryEndpoint": entry_endpoint.bucket()}),
            );
        }

        let classification = classify(
            &self.config.classification,
            &self.configured_routes,
            &ClassifyInput {
                request: &body,
                endpoint: endpoint_path,
            },
        );

        let requested_model = (!orig_model.is_empty()).then_some(orig_model.as_str());
        let (route, target) = self
            .select_target(&classification.route, requested_model)
            .await?;

        info!(
            event = "request_routed",
            request_id = %request_id,
            endpoint = %endpoint_path,
            route = %route,
            reasoning = %classification.reasoning,
            provider = %target.provider_id,
            model = %target.model_id,
            key = %target.key_id,
            tokens = classification.analysis.token_analysis.total_tokens,
        );

        let pipeline = self.pipelines.get_or_create(&target, &self.runtime_key).await?;
        let output = pipeline
            .execute(
                entry,
                entry_endpoint,
                request_id,
                orig_model,
                body,
                wants_stream,
                session_id,
            )
            .await?;

        Ok(match output {
            PipelineOutput::Json { body, metadata } => EngineReply {
                route,
                target,
                output: EngineOutput::Json(body),
                metadata,
            },
            PipelineOutput::Stream { stream, metadata } => EngineReply {
                route,
                target,
                output: EngineOutput::Stream(stream),
                metadata,
            },
        })
    }

    /// Resolve a route to a target, falling back to the first configured
    /// route when the computed one has no targets.
    async fn select_target(
        &self,
        route: &str,
        requested_model: Option<&str>,
    ) -> Result<(String, RouteTarget), GatewayError> {
        if let Some(target) = self.balancer.select(route, requested_model).await {
            return Ok((route.to_string(), target));
        }
        let fallback = self
            .configured_routes
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| GatewayError::config("no route targets configured"))?;
        if fallback != route
            && let Some(target) = self.balancer.select(&fallback, requested_model).await
        {
            info!(event = "route_fallback", from = %route, to = %fallback);
            return Ok((fallback, target));
        }
        Err(GatewayError::config(format!("route {route} has no targets")))
    }

    pub async fn shutdown(&self) {
        self.pipelines.shutdown().await;
    }
}
