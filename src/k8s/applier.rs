//! Idempotent applier for the workload/service pair
//!
//! Drives each resource through a create-or-update sequence: create first,
//! and on already-exists fetch the live object, check ownership, compare the
//! managed fields, and replace only when they diverge. Re-running with the
//! same inputs converges to the same cluster state without redundant writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use strum::Display;
use tracing::{debug, info, instrument, warn};

use super::resources::{build_deployment, build_service, ManagedResource};
use crate::config::Config;
use crate::error::ApplyError;
use crate::models::{validate_pair, ServiceSpec, WorkloadSpec};

/// Outcome of a single create call against the control plane
pub enum CreateOutcome<K> {
    Created(K),
    AlreadyExists,
}

/// The create/get/replace verbs the applier needs for one resource kind.
///
/// `K8sClient` implements this against a real control plane; tests provide
/// an in-memory implementation with call counting and failure injection.
#[async_trait]
pub trait ResourceOps<K>: Send + Sync {
    async fn create(&self, namespace: &str, desired: &K) -> Result<CreateOutcome<K>, ApplyError>;
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApplyError>;
    async fn replace(&self, namespace: &str, desired: &K) -> Result<K, ApplyError>;
}

/// What happened to one resource during an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Updated,
    Unchanged,
}

/// Per-resource outcome of a completed apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub deployment: ResourceAction,
    pub service: ResourceAction,
}

/// Timeout and backoff policy for control-plane calls
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Upper bound on a single create/get/replace call
    pub call_timeout: Duration,
    /// Total attempts per call for transient failures
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }
}

/// Applies a (WorkloadSpec, ServiceSpec) pair to a cluster, tolerating re-runs
pub struct Applier<C> {
    ops: C,
    settings: RetrySettings,
}

impl<C> Applier<C> {
    pub fn new(ops: C, settings: RetrySettings) -> Self {
        Self { ops, settings }
    }

    /// Get the underlying control-plane handle back
    pub fn into_inner(self) -> C {
        self.ops
    }
}

impl<C> Applier<C>
where
    C: ResourceOps<k8s_openapi::api::apps::v1::Deployment>
        + ResourceOps<k8s_openapi::api::core::v1::Service>,
{
    /// Ensure the Deployment and Service described by the specs exist in the
    /// target namespace, creating or updating as needed.
    ///
    /// Validation runs locally before any network call. The two resources are
    /// applied concurrently; dropping the returned future abandons any
    /// in-flight calls, since no work is spawned in the background.
    #[instrument(skip(self, workload, service), fields(namespace = %namespace, workload = %workload.name, service = %service.name))]
    pub async fn apply(
        &self,
        namespace: &str,
        workload: &WorkloadSpec,
        service: &ServiceSpec,
    ) -> Result<ApplyResult, ApplyError> {
        validate_pair(namespace, workload, service)?;

        let desired_deployment = build_deployment(namespace, workload);
        let desired_service = build_service(namespace, service, workload.container_port);

        let (deployment_action, service_action) = tokio::try_join!(
            self.apply_resource(namespace, desired_deployment),
            self.apply_resource(namespace, desired_service),
        )?;

        info!(deployment = %deployment_action, service = %service_action, "Apply complete");

        Ok(ApplyResult {
            deployment: deployment_action,
            service: service_action,
        })
    }

    /// Drive one resource through the create-or-update sequence.
    async fn apply_resource<K>(
        &self,
        namespace: &str,
        desired: K,
    ) -> Result<ResourceAction, ApplyError>
    where
        K: ManagedResource,
        C: ResourceOps<K>,
    {
        let name = desired.name().to_string();
        let what = format!("{}/{}", K::KIND, name);

        match self
            .with_retries(&what, || self.ops.create(namespace, &desired))
            .await?
        {
            CreateOutcome::Created(_) => {
                info!(resource = %what, "Created");
                return Ok(ResourceAction::Created);
            }
            CreateOutcome::AlreadyExists => {
                debug!(resource = %what, "Already exists, comparing specs");
            }
        }

        // Present already: read, check ownership, compare, and update if the
        // managed fields diverge. One internal retry on a version race.
        let mut version_retried = false;
        loop {
            let live: Option<K> = self
                .with_retries(&what, || self.ops.get(namespace, &name))
                .await?;

            let Some(live) = live else {
                // Deleted between our create and get; try the create once more.
                return match self
                    .with_retries(&what, || self.ops.create(namespace, &desired))
                    .await?
                {
                    CreateOutcome::Created(_) => {
                        info!(resource = %what, "Created");
                        Ok(ResourceAction::Created)
                    }
                    CreateOutcome::AlreadyExists => Err(ApplyError::VersionConflict(what)),
                };
            };

            if !live.is_managed() {
                return Err(ApplyError::Conflict {
                    resource: what,
                    message: format!(
                        "existing object does not carry the {} ownership label",
                        super::resources::MANAGED_BY
                    ),
                });
            }

            if desired.spec_matches(&live) {
                debug!(resource = %what, "Specs match, nothing to do");
                return Ok(ResourceAction::Unchanged);
            }

            let mut to_write = desired.clone();
            to_write.set_resource_version(live.resource_version());

            match self
                .with_retries(&what, || self.ops.replace(namespace, &to_write))
                .await
            {
                Ok(_) => {
                    info!(resource = %what, "Updated");
                    return Ok(ResourceAction::Updated);
                }
                Err(ApplyError::VersionConflict(_)) if !version_retried => {
                    warn!(resource = %what, "Resource version conflict, re-reading");
                    version_retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one control-plane call under the configured timeout, retrying
    /// transient failures with bounded exponential backoff. Non-transient
    /// failures are surfaced immediately.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ApplyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApplyError>>,
    {
        let mut attempt = 1u32;
        loop {
            let outcome = tokio::time::timeout(self.settings.call_timeout, call()).await;
            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => ApplyError::ClusterUnreachable(format!(
                    "{what}: no response within {:?}",
                    self.settings.call_timeout
                )),
            };

            if attempt >= self.settings.max_attempts {
                return Err(error);
            }

            let delay = self.settings.backoff_base * 2u32.saturating_pow(attempt - 1);
            warn!(
                resource = %what,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
