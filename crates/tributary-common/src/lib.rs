//! Common types for Tributary: CRDs, errors, events, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the controller and its system resources live in
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "tributary-system";

/// Default cluster DNS domain used for Service sink addresses
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Field manager name used for every write the controller performs
pub const FIELD_MANAGER: &str = "tributary-apiserversource-controller";
