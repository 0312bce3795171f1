//! Custom Resource Definitions for Tributary
//!
//! This module contains all CRD definitions used by the Tributary controller.

mod api_server_source;
mod types;

pub use api_server_source::{
    ApiServerSource, ApiServerSourceSpec, ApiServerSourceStatus, Destination, EventMode,
    KReference, OwnerSelector, ResourceSelector, DEFAULT_SERVICE_ACCOUNT,
};
pub use types::{Condition, ConditionStatus};
