//! Desired-state models for the workload/service pair
//!
//! These are plain data, constructed independently of the submission logic
//! so validation can be unit tested without network access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use crate::error::ApplyError;

/// Desired state of the workload (rendered as an apps/v1 Deployment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub container_port: u16,
}

/// Desired state of the network endpoint (rendered as a v1 Service)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    pub port: u16,
    pub kind: ServiceKind,
}

/// Kubernetes service types, spelled exactly as the API expects them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ServiceKind {
    #[serde(rename = "ClusterIP")]
    #[strum(serialize = "ClusterIP")]
    ClusterIp,
    NodePort,
    LoadBalancer,
}

impl ServiceKind {
    /// The `spec.type` value for this kind.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ServiceKind::ClusterIp => "ClusterIP",
            ServiceKind::NodePort => "NodePort",
            ServiceKind::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Check that a string is a valid RFC 1123 label (namespaces, resource names).
pub fn validate_name(field: &str, value: &str) -> Result<(), ApplyError> {
    if value.is_empty() {
        return Err(ApplyError::validation(field, "must not be empty"));
    }
    if value.len() > 63 {
        return Err(ApplyError::validation(field, "must be at most 63 characters"));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !valid_chars || !valid_ends {
        return Err(ApplyError::validation(
            field,
            "must be lowercase alphanumeric or '-', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

/// Validate a (workload, service) pair against a target namespace.
///
/// Runs entirely locally; the applier calls this before touching the network.
pub fn validate_pair(
    namespace: &str,
    workload: &WorkloadSpec,
    service: &ServiceSpec,
) -> Result<(), ApplyError> {
    validate_name("namespace", namespace)?;
    validate_name("workload.name", &workload.name)?;
    validate_name("service.name", &service.name)?;

    if workload.replicas <= 0 {
        return Err(ApplyError::validation(
            "workload.replicas",
            format!("must be positive, got {}", workload.replicas),
        ));
    }
    if workload.image.is_empty() {
        return Err(ApplyError::validation("workload.image", "must not be empty"));
    }
    if workload.container_port == 0 {
        return Err(ApplyError::validation(
            "workload.container_port",
            "must be in 1-65535",
        ));
    }
    if service.port == 0 {
        return Err(ApplyError::validation("service.port", "must be in 1-65535"));
    }
    if workload.labels.is_empty() {
        return Err(ApplyError::validation("workload.labels", "must not be empty"));
    }
    if service.selector.is_empty() {
        return Err(ApplyError::validation(
            "service.selector",
            "must not be empty",
        ));
    }

    // The selector must be a subset of the workload labels or the service
    // routes to nothing.
    for (key, value) in &service.selector {
        match workload.labels.get(key) {
            Some(v) if v == value => {}
            _ => {
                return Err(ApplyError::validation(
                    "service.selector",
                    format!(
                        "selector entry {key}={value} is not among the workload labels"
                    ),
                ));
            }
        }
    }

    Ok(())
}
