use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub fallback: FallbackConfig,
    pub bridge: BridgeConfig,
    pub quality: QualityConfig,
    pub recovery: RecoveryConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Base URL of the orchestration API. Empty means derive the in-cluster
    /// address from `KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT`.
    pub api_url: String,
    /// Bearer token file (service account token when running in-cluster).
    pub token_path: String,
    /// Accept the API server certificate without verification. Needed for
    /// in-cluster use unless the cluster CA is installed in the trust store.
    pub insecure_tls: bool,
    pub namespace: String,
    /// Headless service whose endpoint set backs the fleet.
    pub service: String,
    /// Suffix appended when building stable per-instance DNS names.
    pub cluster_suffix: String,
    pub request_timeout_secs: u64,
    /// Periodic out-of-band refresh, independent of watch events.
    pub refresh_interval_secs: u64,
    /// Watch reconnect backoff bounds.
    pub watch_backoff_initial_ms: u64,
    pub watch_backoff_max_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
            insecure_tls: true,
            namespace: "default".to_string(),
            service: "vnc-fleet".to_string(),
            cluster_suffix: "svc.cluster.local".to_string(),
            request_timeout_secs: 10,
            refresh_interval_secs: 30,
            watch_backoff_initial_ms: 500,
            watch_backoff_max_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// JSON document with statically configured instances, loaded once at
    /// startup. Empty path disables the fallback.
    pub path: String,
    /// When set, an empty dynamic discovery result is authoritative and the
    /// static list is never served.
    pub strict: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect_timeout_secs: u64,
    /// Relay chunks at or above this size count toward the coarse frame
    /// counter. Heuristic only.
    pub frame_threshold_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            frame_threshold_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub probe_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Named ports consulted by the probe sub-checks.
    pub vnc_port_name: String,
    pub audio_port_name: String,
    pub controls_port_name: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 5,
            connect_timeout_secs: 3,
            handshake_timeout_secs: 3,
            vnc_port_name: "vnc".to_string(),
            audio_port_name: "audio".to_string(),
            controls_port_name: "controls".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Auto-recovery attempts per instance before flagging for manual
    /// intervention.
    pub max_attempts: u32,
    /// Concurrent recovery tasks across the whole fleet.
    pub worker_concurrency: usize,
    /// Stream-level reconnect attempts for network failures.
    pub network_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            worker_concurrency: 2,
            network_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub call_timeout_secs: u64,
    /// Windowed error rate (percent) that opens a breaker.
    pub error_threshold_pct: f64,
    pub rolling_window_secs: u64,
    pub rolling_buckets: usize,
    /// Cool-down before a half-open trial call is admitted.
    pub reset_timeout_secs: u64,
    /// Minimum calls in the window before the threshold applies.
    pub min_requests: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 3,
            error_threshold_pct: 50.0,
            rolling_window_secs: 10,
            rolling_buckets: 10,
            reset_timeout_secs: 10,
            min_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `VNCFLEET_*` environment
    /// overrides (e.g. `VNCFLEET_DISCOVERY__NAMESPACE=emulators`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(Path::new(path)));
        } else if Path::new("config.toml").exists() {
            builder = builder.add_source(File::from(Path::new("config.toml")));
        }

        builder = builder.add_source(
            Environment::with_prefix("VNCFLEET")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
