//! Probe sub-checks
//!
//! Four independent checks per instance: raw connectivity, protocol
//! handshake, synthetic audio availability and synthetic control
//! responsiveness. Each check is bounded by its own timeout and routed
//! through a named breaker, so a hung instance fails its own checks without
//! stalling the rest of the cycle.

use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use vncfleet_core::config::QualityConfig;
use vncfleet_core::resilience::{BreakerError, BreakerManager};
use vncfleet_core::Error;
use vncfleet_discovery::Instance;

use crate::model::Availability;

/// Probe tuning derived from configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub vnc_port_name: String,
    pub audio_port_name: String,
    pub controls_port_name: String,
}

impl From<&QualityConfig> for ProbeConfig {
    fn from(cfg: &QualityConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
            vnc_port_name: cfg.vnc_port_name.clone(),
            audio_port_name: cfg.audio_port_name.clone(),
            controls_port_name: cfg.controls_port_name.clone(),
        }
    }
}

/// Raw result of one instance's probe cycle
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub availability: Availability,
    pub latency_ms: Option<u64>,
    pub errors: Vec<String>,
}

/// Bounded TCP connect returning the observed latency.
pub(crate) async fn tcp_connect(addr: &str, bound: Duration) -> Result<Duration, Error> {
    let start = Instant::now();
    match tokio::time::timeout(bound, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(Error::Transport(e)),
        Err(_) => Err(Error::ProbeTimeout(bound)),
    }
}

/// Lightweight protocol handshake: connect and read the 12-byte RFB version
/// banner. The payload itself stays opaque; only the magic is checked.
pub(crate) async fn rfb_handshake(addr: &str, bound: Duration) -> Result<(), Error> {
    let check = async {
        let mut stream = TcpStream::connect(addr).await?;
        let mut banner = [0u8; 12];
        stream.read_exact(&mut banner).await?;
        if banner.starts_with(b"RFB ") {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected protocol banner",
            ))
        }
    };
    match tokio::time::timeout(bound, check).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Transport(e)),
        Err(_) => Err(Error::ProbeTimeout(bound)),
    }
}

fn note_failure<E: std::fmt::Display>(
    errors: &mut Vec<String>,
    check: &str,
    err: &BreakerError<E>,
) {
    match err {
        BreakerError::Open => {
            // The sub-check reports unavailable without hitting the instance.
            errors.push(format!("{check}: short-circuited (breaker open)"));
        }
        BreakerError::Timeout => errors.push(format!("{check}: timed out")),
        BreakerError::Inner(e) => errors.push(format!("{check}: {e}")),
    }
}

/// Run the four sub-checks for one instance.
///
/// Connectivity gates the handshake; audio and controls run concurrently with
/// it and never short-circuit each other. Instances without dedicated audio
/// or controls ports fall back to a synthetic check that mirrors raw
/// connectivity.
pub async fn probe_instance(
    instance: &Instance,
    cfg: &ProbeConfig,
    breakers: &BreakerManager,
) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();

    let Some(vnc_addr) = instance.connect_addr(&cfg.vnc_port_name) else {
        outcome
            .errors
            .push(format!("no '{}' port published", cfg.vnc_port_name));
        return outcome;
    };

    // (a) raw connectivity
    let connect_breaker = breakers.breaker(&format!("probe:{}:connect", instance.id), None);
    let addr = vnc_addr.clone();
    let bound = cfg.connect_timeout;
    match connect_breaker
        .fire(move || async move { tcp_connect(&addr, bound).await })
        .await
    {
        Ok(latency) => {
            outcome.availability.vnc = true;
            outcome.latency_ms = Some(latency.as_millis() as u64);
        }
        Err(e) => {
            note_failure(&mut outcome.errors, "connect", &e);
            return outcome;
        }
    }

    // (b) handshake, (c) audio, (d) controls run concurrently and never
    // short-circuit each other.
    let handshake = async {
        let breaker = breakers.breaker(&format!("probe:{}:handshake", instance.id), None);
        let addr = vnc_addr.clone();
        let bound = cfg.handshake_timeout;
        breaker
            .fire(move || async move { rfb_handshake(&addr, bound).await })
            .await
    };
    let audio = synthetic_port_check(
        instance,
        &cfg.audio_port_name,
        cfg.connect_timeout,
        breakers,
        "audio",
    );
    let controls = synthetic_port_check(
        instance,
        &cfg.controls_port_name,
        cfg.connect_timeout,
        breakers,
        "controls",
    );

    let (handshake, audio, controls) = tokio::join!(handshake, audio, controls);

    match handshake {
        Ok(()) => outcome.availability.stream = true,
        Err(e) => note_failure(&mut outcome.errors, "handshake", &e),
    }
    match audio {
        Ok(()) => outcome.availability.audio = true,
        Err(e) => note_failure(&mut outcome.errors, "audio", &e),
    }
    match controls {
        Ok(()) => outcome.availability.controls = true,
        Err(e) => note_failure(&mut outcome.errors, "controls", &e),
    }

    outcome
}

/// Probe a dedicated named port when the instance publishes one; otherwise a
/// synthetic check that passes while the instance is reachable at all.
async fn synthetic_port_check(
    instance: &Instance,
    port_name: &str,
    bound: Duration,
    breakers: &BreakerManager,
    check: &str,
) -> Result<(), BreakerError<Error>> {
    match instance.connect_addr(port_name) {
        Some(addr) => {
            let breaker = breakers.breaker(&format!("probe:{}:{check}", instance.id), None);
            breaker
                .fire(move || async move { tcp_connect(&addr, bound).await.map(|_| ()) })
                .await
        }
        // No dedicated channel published; connectivity already vouched for
        // the instance when we got this far.
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use vncfleet_core::resilience::BreakerOptions;
    use vncfleet_discovery::instance::{
        InstanceAddresses, InstanceHealth, InstanceMeta, InstanceStatus,
    };

    fn local_instance(id: &str, vnc_port: u16) -> Instance {
        let mut ports = BTreeMap::new();
        ports.insert("vnc".to_string(), vnc_port);
        Instance {
            id: id.to_string(),
            display_name: None,
            addresses: InstanceAddresses {
                pod_ip: "127.0.0.1".to_string(),
                hostname: String::new(),
                dns_name: "127.0.0.1".to_string(),
            },
            ports,
            health: InstanceHealth { ready: true },
            status: InstanceStatus::Ready,
            provisioned: true,
            discovered_at: chrono::Utc::now(),
            meta: InstanceMeta::default(),
        }
    }

    fn probe_config() -> ProbeConfig {
        ProbeConfig {
            connect_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(500),
            vnc_port_name: "vnc".to_string(),
            audio_port_name: "audio".to_string(),
            controls_port_name: "controls".to_string(),
        }
    }

    async fn spawn_rfb_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"RFB 003.008\n").await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_probe_healthy_instance() {
        let port = spawn_rfb_server().await;
        let breakers = BreakerManager::new(BreakerOptions::default());
        let outcome =
            probe_instance(&local_instance("instance-0", port), &probe_config(), &breakers).await;

        assert!(outcome.availability.vnc);
        assert!(outcome.availability.stream);
        assert!(outcome.availability.audio, "synthetic audio check passes");
        assert!(outcome.availability.controls);
        assert!(outcome.latency_ms.is_some());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_probe_unreachable_instance() {
        // Port 1 is essentially guaranteed closed.
        let breakers = BreakerManager::new(BreakerOptions::default());
        let outcome =
            probe_instance(&local_instance("instance-1", 1), &probe_config(), &breakers).await;

        assert!(!outcome.availability.vnc);
        assert!(!outcome.availability.stream);
        assert!(outcome.latency_ms.is_none());
        assert!(!outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_probe_wrong_protocol_fails_handshake_only() {
        // A listener that speaks something other than RFB.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"HTTP/1.1 200\r\n").await;
            }
        });

        let breakers = BreakerManager::new(BreakerOptions::default());
        let outcome =
            probe_instance(&local_instance("instance-2", port), &probe_config(), &breakers).await;

        assert!(outcome.availability.vnc);
        assert!(!outcome.availability.stream);
        assert!(outcome.errors.iter().any(|e| e.starts_with("handshake:")));
    }

    #[tokio::test]
    async fn test_probe_without_vnc_port_is_unavailable() {
        let mut inst = local_instance("instance-3", 5900);
        inst.ports.clear();
        let breakers = BreakerManager::new(BreakerOptions::default());
        let outcome = probe_instance(&inst, &probe_config(), &breakers).await;

        assert!(!outcome.availability.vnc);
        assert!(outcome.errors[0].contains("no 'vnc' port"));
    }
}
