use async_trait::async_trait;

use crate::errors::ProviderResult;
use crate::request::{ProviderReply, ProviderRequest};

#[derive(Debug, Clone, Default)]
pub struct ProviderStatus {
    pub provider_type: String,
    pub base_url: String,
    pub initialized: bool,
    pub requests_sent: u64,
    pub last_error: Option<String>,
}

/// The provider capability set. One instance serves one pipeline target and
/// is reused across requests; implementations must be re-entrant.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validate config, build the HTTP client, prepare auth. OAuth-backed
    /// providers acquire a valid token here (opening a browser if the flow
    /// needs one) so the first request does not pay the interactive cost.
    async fn initialize(&self) -> ProviderResult<()>;

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply>;

    /// GET the provider's models endpoint. `2xx` and `404` both count as
    /// healthy: a 404 proves auth worked and only the resource is absent.
    async fn check_health(&self) -> ProviderResult<bool>;

    /// Drop auth context and in-flight resources.
    async fn cleanup(&self) -> ProviderResult<()>;

    fn status(&self) -> ProviderStatus;
}
