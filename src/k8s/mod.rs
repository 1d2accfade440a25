//! Kubernetes integration module
//!
//! This module handles all interactions with the cluster:
//! - Rendering workload/service specs into API objects
//! - The idempotent create-or-update applier
//! - The kube-backed client implementing the control-plane verbs

mod applier;
mod client;
mod resources;

pub use applier::{Applier, ApplyResult, CreateOutcome, ResourceAction, ResourceOps, RetrySettings};
pub use client::K8sClient;
pub use resources::{build_deployment, build_service, managed_labels, ManagedResource, MANAGED_BY};
