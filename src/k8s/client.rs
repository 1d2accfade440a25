//! Kubernetes client wrapper
//!
//! `K8sClient` is the cluster handle: it owns the `kube::Client` and maps
//! control-plane responses into the apply error taxonomy. It is passed into
//! the applier by the caller and never persisted anywhere else.

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{info, instrument};

use super::applier::{CreateOutcome, ResourceOps};
use crate::error::ApplyError;

/// Cluster handle backed by a real control plane
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8sClient using the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new() -> Result<Self> {
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Create a K8sClient honoring an explicit kubeconfig path when configured
    pub async fn from_settings(settings: &crate::config::Config) -> Result<Self> {
        let config = match &settings.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Check if the cluster is reachable, returning the API server version
    pub async fn health_check(&self) -> Result<String> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(version.git_version)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube error into the apply taxonomy.
///
/// 401/403 are permission failures, 409 is an optimistic-concurrency
/// conflict, other 4xx are server-side rejections of the object, and
/// 5xx plus transport failures mean the control plane did not respond.
fn map_kube_error(what: &str, err: kube::Error) -> ApplyError {
    match err {
        kube::Error::Api(e) => match e.code {
            401 | 403 => ApplyError::PermissionDenied(format!("{what}: {}", e.message)),
            409 => ApplyError::VersionConflict(what.to_string()),
            code if code >= 500 => {
                ApplyError::ClusterUnreachable(format!("{what}: {} ({code})", e.message))
            }
            _ => ApplyError::Validation {
                field: what.to_string(),
                message: e.message,
            },
        },
        other => ApplyError::ClusterUnreachable(format!("{what}: {other}")),
    }
}

#[async_trait]
impl ResourceOps<Deployment> for K8sClient {
    async fn create(
        &self,
        namespace: &str,
        desired: &Deployment,
    ) -> Result<CreateOutcome<Deployment>, ApplyError> {
        let name = desired.metadata.name.as_deref().unwrap_or("unknown");
        match self
            .deployments(namespace)
            .create(&PostParams::default(), desired)
            .await
        {
            Ok(created) => Ok(CreateOutcome::Created(created)),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(map_kube_error(&format!("deployment/{name}"), e)),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ApplyError> {
        self.deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(&format!("deployment/{name}"), e))
    }

    async fn replace(
        &self,
        namespace: &str,
        desired: &Deployment,
    ) -> Result<Deployment, ApplyError> {
        let name = desired.metadata.name.as_deref().unwrap_or("unknown");
        self.deployments(namespace)
            .replace(name, &PostParams::default(), desired)
            .await
            .map_err(|e| map_kube_error(&format!("deployment/{name}"), e))
    }
}

#[async_trait]
impl ResourceOps<Service> for K8sClient {
    async fn create(
        &self,
        namespace: &str,
        desired: &Service,
    ) -> Result<CreateOutcome<Service>, ApplyError> {
        let name = desired.metadata.name.as_deref().unwrap_or("unknown");
        match self
            .services(namespace)
            .create(&PostParams::default(), desired)
            .await
        {
            Ok(created) => Ok(CreateOutcome::Created(created)),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(map_kube_error(&format!("service/{name}"), e)),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApplyError> {
        self.services(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(&format!("service/{name}"), e))
    }

    async fn replace(&self, namespace: &str, desired: &Service) -> Result<Service, ApplyError> {
        let name = desired.metadata.name.as_deref().unwrap_or("unknown");
        self.services(namespace)
            .replace(name, &PostParams::default(), desired)
            .await
            .map_err(|e| map_kube_error(&format!("service/{name}"), e))
    }
}
