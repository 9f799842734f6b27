//! Legacy protocol generation: the store's HTTP JSON keys API
//! (`/v2/keys`), with long-polling change notification.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ::config::ConfigError;
use serde::Deserialize;
use tonic::async_trait;
use tracing::debug;

use super::LegacyKv;
use super::LegacyNode;
use crate::constants::V2_EVENT_INDEX_CLEARED;
use crate::constants::V2_KEY_NOT_FOUND;
use crate::BackendConfig;
use crate::Error;
use crate::Result;

/// HTTP client for the legacy protocol generation.
///
/// Requests rotate across the configured endpoints. Point reads are
/// bounded by the configured request timeout; `wait` long-polls without a
/// client-side bound, leaving the refresh to the key watcher's timeout.
pub struct HttpKv {
    http: reqwest::Client,
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    request_timeout: Duration,
}

impl HttpKv {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "at least one store endpoint is required".to_string(),
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(Some(config.tcp_keepalive()))
            .build()?;

        Ok(Self {
            http,
            endpoints: config
                .endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            cursor: AtomicUsize::new(0),
            request_timeout: config.request_timeout(),
        })
    }

    fn keys_url(&self, key: &str) -> String {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        let base = &self.endpoints[i % self.endpoints.len()];
        if key.starts_with('/') {
            format!("{base}/v2/keys{key}")
        } else {
            format!("{base}/v2/keys/{key}")
        }
    }
}

#[async_trait]
impl LegacyKv for HttpKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(self.keys_url(key))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            let parsed = parse_keys_response(&body)?;
            return Ok(parsed.node.and_then(|n| n.value));
        }
        match parse_keys_error(&body) {
            Some(err) if err.error_code == V2_KEY_NOT_FOUND => Ok(None),
            Some(err) => Err(keys_error_to_error(status, err)),
            None => Err(Error::InvalidResponse(format!(
                "unexpected status {status} from keys api"
            ))),
        }
    }

    async fn wait(&self, prefix: &str, after_index: Option<u64>) -> Result<LegacyNode> {
        let mut request = self
            .http
            .get(self.keys_url(prefix))
            .query(&[("wait", "true"), ("recursive", "true")]);
        if let Some(index) = after_index {
            request = request.query(&[("waitIndex", index.to_string())]);
        }

        debug!(prefix, ?after_index, "long-polling keys api");
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return match parse_keys_error(&body) {
                Some(err) => Err(keys_error_to_error(status, err)),
                None => Err(Error::InvalidResponse(format!(
                    "unexpected status {status} from keys api"
                ))),
            };
        }

        let parsed = parse_keys_response(&body)?;
        let node = parsed.node.ok_or_else(|| {
            Error::EmptyResponse("change notification without a node".to_string())
        })?;
        // Delete-like actions carry no value; guard against stores that
        // echo the previous value anyway.
        let value = if is_delete_action(&parsed.action) {
            None
        } else {
            node.value
        };
        Ok(LegacyNode {
            key: node.key,
            value,
            modified_index: node.modified_index,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeysResponse {
    #[serde(default)]
    pub action: String,
    pub node: Option<KeysNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeysNode {
    pub key: String,
    pub value: Option<String>,
    #[serde(rename = "modifiedIndex", default)]
    pub modified_index: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeysError {
    #[serde(rename = "errorCode")]
    pub error_code: u64,
    #[serde(default)]
    pub message: String,
    /// Current store index, reported alongside index-cleared errors.
    #[serde(default)]
    pub index: u64,
}

pub(crate) fn parse_keys_response(body: &[u8]) -> Result<KeysResponse> {
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("undecodable keys payload: {e}")))
}

pub(crate) fn parse_keys_error(body: &[u8]) -> Option<KeysError> {
    serde_json::from_slice(body).ok()
}

pub(crate) fn keys_error_to_error(status: reqwest::StatusCode, err: KeysError) -> Error {
    if err.error_code == V2_EVENT_INDEX_CLEARED {
        // The wait index fell out of the store's event history; the key
        // watcher resumes from the reported current index.
        return Error::Compacted(err.index as i64);
    }
    if status.is_server_error() {
        return Error::Unavailable(format!("keys api error {}: {}", err.error_code, err.message));
    }
    Error::InvalidResponse(format!(
        "keys api error {} at index {}: {}",
        err.error_code, err.index, err.message
    ))
}

pub(crate) fn is_delete_action(action: &str) -> bool {
    matches!(action, "delete" | "expire" | "compareAndDelete")
}
