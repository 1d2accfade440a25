//! Workload Applier Library
//!
//! Idempotent application of a workload-and-service pair to a Kubernetes
//! cluster: given a `WorkloadSpec` and a `ServiceSpec`, the `Applier`
//! guarantees that a matching Deployment and Service exist in the target
//! namespace, whether this is the first invocation or a repeat.

pub mod config;
pub mod error;
pub mod k8s;
pub mod models;

pub use error::ApplyError;
pub use k8s::{Applier, ApplyResult, K8sClient, ResourceAction, ResourceOps, RetrySettings};
pub use models::{ServiceKind, ServiceSpec, WorkloadSpec};
