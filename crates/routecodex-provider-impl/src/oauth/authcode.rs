use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use routecodex_common::env_keys;
use routecodex_provider_core::{ProviderError, ProviderResult};
use routecodex_store::token_file::TokenPayload;

use super::device::open_in_browser;
use super::pkce::{generate_code_challenge, generate_code_verifier, generate_state};
use super::{OAuthEndpoints, TokenEndpointResponse};

const CALLBACK_HTML: &str =
    "<html><body>Authorization complete. You can close this window.</body></html>";

/// Authorization-code flow against an ephemeral loopback listener.
///
/// The listener binds port 0 on the callback host, the browser is pointed
/// at the vendor auth URL with `state` and a PKCE S256 challenge, and the
/// single callback request carries `code` + `state` back. A state mismatch
/// aborts the flow.
pub async fn run_authcode_flow(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    open_browser: bool,
) -> ProviderResult<TokenPayload> {
    let host = routecodex_common::env_string(env_keys::OAUTH_CALLBACK_HOST)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind((host.as_str(), 0))
        .await
        .map_err(|err| ProviderError::Other(format!("loopback bind failed: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| ProviderError::Other(err.to_string()))?
        .port();
    let redirect_uri = format!("http://{host}:{port}/callback");

    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let state = generate_state();

    let auth_url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        endpoints.auth_url,
        urlencoding::encode(&endpoints.client_id),
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(&endpoints.scope),
        urlencoding::encode(&state),
        urlencoding::encode(&challenge),
    );
    info!(event = "oauth_authcode_start", url = %auth_url);
    println!("Open this URL to authorize: {auth_url}");
    if open_browser {
        open_in_browser(&auth_url);
    }

    let (code, returned_state) = wait_for_callback(&listener).await?;
    if returned_state.as_deref() != Some(state.as_str()) {
        return Err(ProviderError::Auth("oauth state mismatch".to_string()));
    }

    exchange_code(client, endpoints, &code, &verifier, &redirect_uri).await
}

async fn wait_for_callback(
    listener: &tokio::net::TcpListener,
) -> ProviderResult<(String, Option<String>)> {
    let (mut socket, _addr) = listener
        .accept()
        .await
        .map_err(|err| ProviderError::Other(format!("callback accept failed: {err}")))?;

    let mut buffer = vec![0u8; 8192];
    let read = socket
        .read(&mut buffer)
        .await
        .map_err(|err| ProviderError::Other(format!("callback read failed: {err}")))?;
    let request = String::from_utf8_lossy(&buffer[..read]);

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        CALLBACK_HTML.len(),
        CALLBACK_HTML,
    );
    let _ = socket.write_all(response.as_bytes()).await;

    // "GET /callback?code=..&state=.. HTTP/1.1"
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| ProviderError::Auth("malformed callback request".to_string()))?;
    let query = target.split_once('?').map(|(_, query)| query).unwrap_or("");

    let code = query_value(query, "code")
        .ok_or_else(|| ProviderError::Auth("callback missing code".to_string()))?;
    Ok((code, query_value(query, "state")))
}

fn query_value(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        let mut iter = pair.splitn(2, '=');
        if iter.next() != Some(key) {
            continue;
        }
        let raw = iter.next().unwrap_or("");
        return urlencoding::decode(raw).ok().map(|value| value.into_owned());
    }
    None
}

async fn exchange_code(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> ProviderResult<TokenPayload> {
    let mut form = vec![
        ("grant_type", "authorization_code".to_string()),
        ("client_id", endpoints.client_id.clone()),
        ("code", code.to_string()),
        ("code_verifier", verifier.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
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
    if !(200..300).contains(&status) {
        return Err(ProviderError::Http {
            status,
            message: "code exchange rejected".to_string(),
            body: serde_json::from_slice(&body).ok(),
            report: None,
        });
    }

    let parsed: TokenEndpointResponse = serde_json::from_slice(&body)
        .map_err(|err| ProviderError::Auth(format!("malformed token response: {err}")))?;
    Ok(parsed.into_payload(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_decoded() {
        assert_eq!(
            query_value("code=opaque%2Bvalue&state=s1", "code").as_deref(),
            Some("opaque+value")
        );
        assert_eq!(query_value("state=only", "code"), None);
    }
}
