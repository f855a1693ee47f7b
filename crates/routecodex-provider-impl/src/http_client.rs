use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use routecodex_provider_core::{ProviderError, ProviderResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static CLIENTS: OnceLock<Mutex<HashMap<String, wreq::Client>>> = OnceLock::new();

/// Process-wide `wreq` client pool, one client per outbound proxy so
/// providers share connection pools. Request deadlines are enforced per
/// call by the senders; the client itself only carries the connect timeout.
pub fn shared_client(proxy: Option<&str>) -> ProviderResult<wreq::Client> {
    // Empty and unset proxy values collapse onto the same direct-egress
    // client, keyed by the empty string.
    let key = proxy
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("")
        .to_string();

    let pool = CLIENTS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut clients = pool
        .lock()
        .map_err(|_| ProviderError::Other("http client pool lock failed".to_string()))?;
    if let Some(client) = clients.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = wreq::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    if !key.is_empty() {
        builder = builder
            .proxy(wreq::Proxy::all(&key).map_err(|err| ProviderError::Other(err.to_string()))?);
    }
    let client = builder
        .build()
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    clients.insert(key, client.clone());
    Ok(client)
}
