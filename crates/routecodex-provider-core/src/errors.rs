use std::error::Error;
use std::fmt;

use routecodex_common::{ErrorKind, GatewayError, ProviderOrigin, VendorReport};
use serde_json::Value as JsonValue;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider-layer failure. Every variant maps onto the surfaced error
/// structure: a kind, an optional HTTP status, and a retryability bit.
#[derive(Debug, Clone)]
pub enum ProviderError {
    Unsupported(&'static str),
    InvalidConfig(String),
    MissingCredential(&'static str),
    /// Upstream returned a non-2xx response.
    Http {
        status: u16,
        message: String,
        body: Option<JsonValue>,
        report: Option<VendorReport>,
    },
    /// Socket-level failure before any HTTP status existed.
    Network(String),
    Timeout(String),
    Auth(String),
    Other(String),
}

impl ProviderError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            ProviderError::Network(_) => Some(503),
            ProviderError::Timeout(_) => Some(504),
            ProviderError::Auth(_) => Some(401),
            _ => None,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unsupported(_) | ProviderError::InvalidConfig(_) => ErrorKind::Config,
            ProviderError::MissingCredential(_) | ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::Http { status, .. } if matches!(status, 401 | 403) => ErrorKind::Auth,
            ProviderError::Http { .. } => ErrorKind::Server,
            ProviderError::Network(_) => ErrorKind::Sandbox,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// True when the upstream signalled an invalid/expired OAuth token and a
    /// refresh-then-retry is worth one attempt.
    pub fn is_invalid_token(&self) -> bool {
        match self {
            ProviderError::Http { status, body, .. } if *status == 401 => {
                let code = body
                    .as_ref()
                    .and_then(|body| body.get("error"))
                    .and_then(|error| error.get("code"))
                    .and_then(|code| code.as_str());
                matches!(code, None | Some("invalid_token") | Some("token_expired"))
            }
            ProviderError::Auth(_) => true,
            _ => false,
        }
    }

    pub fn into_gateway(self, origin: ProviderOrigin) -> GatewayError {
        let mut err = match &self {
            ProviderError::Http {
                status,
                message,
                body,
                report,
            } => {
                let mut err = GatewayError::from_status(*status, message.clone());
                if let Some(body) = body {
                    err = err.with_upstream(body.clone());
                }
                if let Some(report) = report {
                    err = err.with_report(report.clone());
                }
                err
            }
            ProviderError::Network(message) => GatewayError::sandbox(message.clone()),
            ProviderError::Timeout(message) => GatewayError::timeout(message.clone()),
            ProviderError::Auth(message) => GatewayError::auth(message.clone()),
            ProviderError::MissingCredential(field) => {
                GatewayError::auth(format!("missing credential field: {field}"))
            }
            ProviderError::Unsupported(what) => {
                GatewayError::config(format!("unsupported: {what}"))
            }
            ProviderError::InvalidConfig(message) => GatewayError::config(message.clone()),
            ProviderError::Other(message) => {
                GatewayError::new(ErrorKind::Unknown, message.clone())
            }
        };
        err.details.provider = Some(origin);
        err
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Unsupported(what) => write!(f, "unsupported: {what}"),
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::MissingCredential(field) => {
                write!(f, "missing credential field: {field}")
            }
            ProviderError::Http {
                status, message, ..
            } => write!(f, "upstream HTTP {status}: {message}"),
            ProviderError::Network(msg) => write!(f, "network failure: {msg}"),
            ProviderError::Timeout(msg) => write!(f, "timeout: {msg}"),
            ProviderError::Auth(msg) => write!(f, "auth failure: {msg}"),
            ProviderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_variant_exposes_kind_status_retryable() {
        let cases: Vec<(ProviderError, ErrorKind, Option<u16>, bool)> = vec![
            (
                ProviderError::Http {
                    status: 503,
                    message: "x".into(),
                    body: None,
                    report: None,
                },
                ErrorKind::Server,
                Some(503),
                true,
            ),
            (
                ProviderError::Http {
                    status: 429,
                    message: "x".into(),
                    body: None,
                    report: None,
                },
                ErrorKind::Server,
                Some(429),
                true,
            ),
            (
                ProviderError::Network("refused".into()),
                ErrorKind::Sandbox,
                Some(503),
                false,
            ),
            (
                ProviderError::Timeout("abort".into()),
                ErrorKind::Timeout,
                Some(504),
                false,
            ),
            (
                ProviderError::InvalidConfig("bad".into()),
                ErrorKind::Config,
                None,
                false,
            ),
        ];
        for (err, kind, status, retryable) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.status_code(), status);
            assert_eq!(err.retryable(), retryable);
        }
    }

    #[test]
    fn invalid_token_predicate_matches_401_shapes() {
        let err = ProviderError::Http {
            status: 401,
            message: "denied".into(),
            body: Some(json!({"error": {"code": "invalid_token"}})),
            report: None,
        };
        assert!(err.is_invalid_token());

        let err = ProviderError::Http {
            status: 403,
            message: "denied".into(),
            body: None,
            report: None,
        };
        assert!(!err.is_invalid_token());
    }
}
