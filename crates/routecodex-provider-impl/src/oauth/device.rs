use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use routecodex_provider_core::{ProviderError, ProviderResult};
use routecodex_store::token_file::TokenPayload;

use super::pkce::{generate_code_challenge, generate_code_verifier};
use super::{OAuthEndpoints, TokenEndpointResponse};

#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    #[serde(default)]
    verification_uri: Option<String>,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expiry() -> u64 {
    900
}

/// RFC 8628 device flow with PKCE.
///
/// The device-code request walks `endpoints.device_urls` in order and moves
/// to the next candidate on 404 or a non-JSON body (vendors disagree on the
/// path spelling and the serving host).
pub async fn run_device_flow(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    open_browser: bool,
) -> ProviderResult<TokenPayload> {
    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let authorization = request_device_code(client, endpoints, &challenge).await?;

    let verify_url = authorization
        .verification_uri_complete
        .clone()
        .or_else(|| authorization.verification_uri.clone())
        .unwrap_or_default();
    info!(
        event = "oauth_device_code",
        user_code = %authorization.user_code,
        verify_url = %verify_url,
    );
    println!("Visit {verify_url} and enter code: {}", authorization.user_code);
    if open_browser && !verify_url.is_empty() {
        open_in_browser(&verify_url);
    }

    poll_for_tokens(client, endpoints, &authorization, &verifier).await
}

async fn request_device_code(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    challenge: &str,
) -> ProviderResult<DeviceAuthorization> {
    let form = [
        ("client_id", endpoints.client_id.as_str()),
        ("scope", endpoints.scope.as_str()),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
    ];

    let mut last_err = ProviderError::Auth("no device endpoint configured".to_string());
    for url in &endpoints.device_urls {
        let response = match client.post(url).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                last_err = ProviderError::Network(err.to_string());
                continue;
            }
        };
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        if status == 404 {
            warn!(event = "oauth_device_endpoint_404", url = %url);
            last_err = ProviderError::Http {
                status,
                message: format!("device endpoint not found: {url}"),
                body: None,
                report: None,
            };
            continue;
        }
        if !(200..300).contains(&status) {
            return Err(ProviderError::Http {
                status,
                message: "device authorization rejected".to_string(),
                body: serde_json::from_slice(&body).ok(),
                report: None,
            });
        }
        match serde_json::from_slice::<DeviceAuthorization>(&body) {
            Ok(authorization) => return Ok(authorization),
            Err(err) => {
                // An HTML splash page from the wrong host lands here.
                warn!(event = "oauth_device_endpoint_non_json", url = %url, error = %err);
                last_err = ProviderError::Auth(format!("non-JSON device response from {url}"));
                continue;
            }
        }
    }
    Err(last_err)
}

async fn poll_for_tokens(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    authorization: &DeviceAuthorization,
    verifier: &str,
) -> ProviderResult<TokenPayload> {
    let mut interval = authorization.interval.max(1);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(authorization.expires_in);

    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(ProviderError::Timeout(
                "device authorization expired before approval".to_string(),
            ));
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;

        let mut form = vec![
            (
                "grant_type",
                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
            ),
            ("client_id", endpoints.client_id.clone()),
            ("device_code", authorization.device_code.clone()),
            ("code_verifier", verifier.to_string()),
        ];
        if let Some(secret) = &endpoints.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = client
            .post(&endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        if (200..300).contains(&status) {
            let parsed: TokenEndpointResponse = serde_json::from_slice(&body)
                .map_err(|err| ProviderError::Auth(format!("malformed token response: {err}")))?;
            return Ok(parsed.into_payload(None));
        }

        let error_code = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("error")
                    .and_then(|error| error.as_str())
                    .map(|error| error.to_string())
            })
            .unwrap_or_default();
        match error_code.as_str() {
            "authorization_pending" => continue,
            "slow_down" => {
                interval += 5;
                continue;
            }
            _ => {
                return Err(ProviderError::Http {
                    status,
                    message: format!("device token poll failed: {error_code}"),
                    body: serde_json::from_slice(&body).ok(),
                    report: None,
                });
            }
        }
    }
}

pub(crate) fn open_in_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let launcher = "open";
    #[cfg(not(target_os = "macos"))]
    let launcher = "xdg-open";
    if let Err(err) = std::process::Command::new(launcher)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        warn!(event = "oauth_browser_open_failed", error = %err);
    }
}
