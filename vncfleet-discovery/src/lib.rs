//! Fleet instance discovery and registry
//!
//! Watches and queries the orchestration API for the addresses backing the
//! fleet's headless service, normalizes them into [`Instance`] records, and
//! serves them through a registry with a static fallback list.

pub mod discovery;
pub mod endpoints;
pub mod instance;
pub mod registry;
pub mod watcher;

pub use discovery::{DiscoverySnapshot, InstanceDiscovery};
pub use endpoints::{Endpoints, EndpointsClient, WatchEvent};
pub use instance::{Instance, InstanceStatus, StaticInstance};
pub use registry::InstanceRegistry;
pub use watcher::EndpointWatcher;
