//! Orchestration API client for the fleet's endpoint set
//!
//! Thin reqwest-based client for the Kubernetes Endpoints resource backing
//! the fleet's headless service. Supports a one-shot query and a long-lived
//! watch; reconnect/backoff is deliberately left to [`crate::EndpointWatcher`]
//! so this primitive stays testable.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use vncfleet_core::config::DiscoveryConfig;
use vncfleet_core::{Error, Result};

/// Raw endpoint set object as returned by the orchestration API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    pub metadata: ObjectMeta,
    pub subsets: Vec<EndpointSubset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSubset {
    pub addresses: Vec<EndpointAddress>,
    pub not_ready_addresses: Vec<EndpointAddress>,
    pub ports: Vec<EndpointPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointAddress {
    pub ip: String,
    pub hostname: Option<String>,
    pub node_name: Option<String>,
    pub target_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectReference {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: Option<String>,
}

/// Upper bound on a single buffered watch line. A server that streams bytes
/// without ever sending a newline would otherwise grow the buffer forever.
const MAX_WATCH_LINE_BYTES: usize = 4 * 1024 * 1024;

/// One event from the watch stream
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: serde_json::Value,
}

/// Client for the named service's endpoint set
pub struct EndpointsClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    namespace: String,
    service: String,
}

impl EndpointsClient {
    /// Build a client from configuration. An empty `api_url` derives the
    /// in-cluster address from `KUBERNETES_SERVICE_HOST` / `_PORT`, and the
    /// service account token is loaded from `token_path` when present.
    pub fn from_config(cfg: &DiscoveryConfig) -> Result<Self> {
        let api_url = if cfg.api_url.is_empty() {
            let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
                Error::Configuration(
                    "discovery.api_url is empty and KUBERNETES_SERVICE_HOST is unset".to_string(),
                )
            })?;
            let port = std::env::var("KUBERNETES_SERVICE_PORT")
                .unwrap_or_else(|_| "443".to_string());
            format!("https://{host}:{port}")
        } else {
            cfg.api_url.trim_end_matches('/').to_string()
        };

        let token = std::fs::read_to_string(&cfg.token_path)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure_tls)
            .connect_timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url,
            token,
            namespace: cfg.namespace.clone(),
            service: cfg.service.clone(),
        })
    }

    fn endpoints_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/endpoints/{}",
            self.api_url, self.namespace, self.service
        )
    }

    fn watch_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/endpoints?watch=true&fieldSelector=metadata.name%3D{}",
            self.api_url, self.namespace, self.service
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Query the current endpoint set (ready and not-ready addresses).
    pub async fn get_endpoints(&self) -> Result<Endpoints> {
        let response = self
            .authorize(self.http.get(self.endpoints_url()))
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("Endpoints query failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "Endpoints query returned {} for service '{}'",
                response.status(),
                self.service
            )));
        }

        response
            .json::<Endpoints>()
            .await
            .map_err(|e| Error::Discovery(format!("Endpoints decode failed: {e}")))
    }

    /// Open a long-lived watch on the endpoint set and forward each change
    /// event into `tx`. Returns when the stream terminates for any reason;
    /// the caller owns reconnect-with-backoff.
    pub async fn watch(&self, tx: mpsc::Sender<WatchEvent>) -> Result<()> {
        let response = self
            .authorize(self.http.get(self.watch_url()))
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("Watch open failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "Watch returned {} for service '{}'",
                response.status(),
                self.service
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::Discovery(format!("Watch stream error: {e}")))?;
            buffer.extend_from_slice(&chunk);

            // Watch events arrive as newline-delimited JSON objects.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<WatchEvent>(line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            // Consumer is gone; stop watching.
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed watch event");
                    }
                }
            }

            if buffer.len() > MAX_WATCH_LINE_BYTES {
                return Err(Error::Discovery(format!(
                    "Watch line exceeded {MAX_WATCH_LINE_BYTES} bytes without a newline"
                )));
            }
        }

        tracing::debug!(service = %self.service, "Watch stream ended");
        Ok(())
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
