//! Normalized instance model
//!
//! The raw orchestration-API shape is parsed into [`Instance`] at the
//! discovery boundary and never leaks into the registry, bridge or monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::endpoints::{EndpointAddress, EndpointPort};

/// Instance lifecycle status as seen by discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    Ready,
    NotReady,
    Booting,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAddresses {
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    pub hostname: String,
    pub dns_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMeta {
    pub namespace: String,
    pub node_name: Option<String>,
    pub target_ref: Option<String>,
}

/// A single interchangeable worker instance behind the fleet service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Short deterministic identifier, `instance-{ordinal}`.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub addresses: InstanceAddresses,
    /// Named ports only; unnamed ports are dropped at the boundary.
    pub ports: BTreeMap<String, u16>,
    pub health: InstanceHealth,
    pub status: InstanceStatus,
    pub provisioned: bool,
    pub discovered_at: DateTime<Utc>,
    pub meta: InstanceMeta,
}

impl Instance {
    /// Normalize one endpoint address into an `Instance`.
    ///
    /// The stable DNS name `{workload}.{service}.{namespace}.{suffix}` is
    /// preferred over the raw pod IP so connections survive pod restarts.
    pub fn from_endpoint_address(
        addr: &EndpointAddress,
        ready: bool,
        ports: &[EndpointPort],
        service: &str,
        namespace: &str,
        cluster_suffix: &str,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        let workload = addr
            .target_ref
            .as_ref()
            .and_then(|r| r.name.clone())
            .or_else(|| addr.hostname.clone())
            .unwrap_or_default();

        let ordinal = extract_ordinal(&workload);
        let dns_name = if workload.is_empty() {
            String::new()
        } else {
            format!("{workload}.{service}.{namespace}.{cluster_suffix}")
        };

        let named_ports: BTreeMap<String, u16> = ports
            .iter()
            .filter_map(|p| p.name.as_ref().map(|name| (name.clone(), p.port)))
            .collect();

        Self {
            id: format!("instance-{ordinal}"),
            display_name: None,
            addresses: InstanceAddresses {
                pod_ip: addr.ip.clone(),
                hostname: addr.hostname.clone().unwrap_or(workload),
                dns_name,
            },
            ports: named_ports,
            health: InstanceHealth { ready },
            status: if ready {
                InstanceStatus::Ready
            } else {
                InstanceStatus::NotReady
            },
            // Ready addresses are fully configured for user-facing use;
            // not-ready ones are still booting or reserved.
            provisioned: ready,
            discovered_at,
            meta: InstanceMeta {
                namespace: namespace.to_string(),
                node_name: addr.node_name.clone(),
                target_ref: addr.target_ref.as_ref().and_then(|r| r.name.clone()),
            },
        }
    }

    /// Build an instance from a static fallback document entry.
    #[must_use]
    pub fn from_static(entry: &StaticInstance, vnc_port_name: &str) -> Self {
        let (host, port) = match entry.connection_target.rsplit_once(':') {
            Some((host, port_str)) => (host.to_string(), port_str.parse::<u16>().ok()),
            None => (entry.connection_target.clone(), None),
        };

        let mut ports = BTreeMap::new();
        if let Some(port) = port {
            ports.insert(vnc_port_name.to_string(), port);
        }

        Self {
            id: entry.id.clone(),
            display_name: Some(entry.display_name.clone()),
            addresses: InstanceAddresses {
                pod_ip: String::new(),
                hostname: host.clone(),
                dns_name: host,
            },
            ports,
            health: InstanceHealth { ready: false },
            status: InstanceStatus::Unknown,
            provisioned: entry.provisioned,
            discovered_at: Utc::now(),
            meta: InstanceMeta::default(),
        }
    }

    /// Numeric ordinal extracted from the instance id, for stable ordering.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        extract_ordinal(&self.id)
    }

    /// Connection address for one of the instance's named ports, preferring
    /// the stable DNS name over the pod IP.
    #[must_use]
    pub fn connect_addr(&self, port_name: &str) -> Option<String> {
        let port = *self.ports.get(port_name)?;
        let host = if self.addresses.dns_name.is_empty() {
            &self.addresses.pod_ip
        } else {
            &self.addresses.dns_name
        };
        if host.is_empty() {
            return None;
        }
        Some(format!("{host}:{port}"))
    }
}

/// Entry in the static fallback document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticInstance {
    pub id: String,
    pub display_name: String,
    /// `host:port` of the instance's protocol endpoint.
    pub connection_target: String,
    pub provisioned: bool,
}

/// Extract the numeric ordinal suffix from a workload name, defaulting to 0.
///
/// `"emulator-3"` yields 3, `"emulator"` yields 0.
#[must_use]
pub fn extract_ordinal(name: &str) -> u32 {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse::<u32>().ok())
        .unwrap_or(0)
}
