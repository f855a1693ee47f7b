use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Error taxonomy shared by every layer that surfaces failures to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Timeout,
    Server,
    Auth,
    Config,
    Sandbox,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Server => "server",
            ErrorKind::Auth => "auth",
            ErrorKind::Config => "config",
            ErrorKind::Sandbox => "sandbox",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Where the failing upstream call was aimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrigin {
    pub vendor: String,
    pub base_url: String,
    pub module_type: String,
}

/// Vendor business-code interpretation attached to an error when known
/// (e.g. GLM codes 1210/1213/1302/1303/1113).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReport {
    pub code: String,
    pub hint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<VendorReport>,
}

/// A surfaced gateway failure.
///
/// Every error that escapes the pipeline carries the full structure from
/// the error-handling contract: kind, optional HTTP status, retryability,
/// an optional machine code (`HTTP_<n>` for status-derived errors), and
/// structured details about the upstream and provider involved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub status_code: Option<u16>,
    pub retryable: bool,
    pub code: Option<String>,
    pub message: String,
    pub details: ErrorDetails,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            retryable: false,
            code: None,
            message: message.into(),
            details: ErrorDetails::default(),
        }
    }

    /// Derive from an upstream HTTP status. Retryable iff 5xx or 429.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            408 | 504 => ErrorKind::Timeout,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Server,
        };
        Self {
            kind,
            status_code: Some(status),
            retryable: status >= 500 || status == 429,
            code: Some(format!("HTTP_{status}")),
            message: message.into(),
            details: ErrorDetails::default(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Network, message);
        err.retryable = true;
        err
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Timeout, message);
        err.status_code = Some(504);
        err
    }

    /// Socket-level failure (connection refused, DNS, closed socket).
    /// Non-retryable 503 with a hint that outbound access may be blocked.
    pub fn sandbox(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Sandbox, message);
        err.status_code = Some(503);
        err.code = Some("SANDBOX_NETWORK".to_string());
        err.details.report = Some(VendorReport {
            code: "sandbox".to_string(),
            hint: "upstream socket failure; grant outbound network access to the gateway process"
                .to_string(),
        });
        err
    }

    pub fn auth(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Auth, message);
        err.status_code = Some(401);
        err
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn with_provider(mut self, origin: ProviderOrigin) -> Self {
        self.details.provider = Some(origin);
        self
    }

    pub fn with_report(mut self, report: VendorReport) -> Self {
        self.details.report = Some(report);
        self
    }

    pub fn with_upstream(mut self, upstream: JsonValue) -> Self {
        self.details.upstream = Some(upstream);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.message.clone(),
                kind: self.kind,
                code: self.code.clone(),
                status_code: self.status_code,
            },
        }
    }
}

/// JSON error body returned to downstream callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_carry_http_code_and_retryability() {
        let err = GatewayError::from_status(503, "bad gateway");
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.code.as_deref(), Some("HTTP_503"));
        assert!(err.retryable);

        let err = GatewayError::from_status(429, "slow down");
        assert!(err.retryable);

        let err = GatewayError::from_status(400, "bad request");
        assert!(!err.retryable);
    }

    #[test]
    fn sandbox_error_is_non_retryable_503() {
        let err = GatewayError::sandbox("connect ECONNREFUSED");
        assert_eq!(err.kind, ErrorKind::Sandbox);
        assert_eq!(err.status_code, Some(503));
        assert!(!err.retryable);
        assert!(err.details.report.is_some());
    }

    #[test]
    fn envelope_serializes_type_and_status_code() {
        let err = GatewayError::from_status(502, "upstream exploded");
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["error"]["type"], "server");
        assert_eq!(json["error"]["statusCode"], 502);
        assert_eq!(json["error"]["code"], "HTTP_502");
    }
}
