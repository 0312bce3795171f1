//! ApiServerSource reconciler
//!
//! Resolves each source's sink, verifies its service account may watch the
//! selected resources, keeps a receive adapter Deployment running and
//! reports all of it through the source's status conditions.

pub mod adapter;
pub mod client;
pub mod controller;
pub mod permissions;
pub mod sink;
pub mod status;
pub mod workload;

pub use controller::{error_policy, reconcile, AdapterSettings, SourceContext};

pub(crate) use tributary_common::{crd, Error};
