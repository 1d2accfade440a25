//! Kubernetes resource builders for the workload/service pair
//!
//! Functions to render WorkloadSpec/ServiceSpec into apps/v1 Deployment and
//! v1 Service objects, plus the managed-field projection the applier uses to
//! decide whether a live object already matches the desired state.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec as KubeServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::models::{ServiceSpec, WorkloadSpec};

/// Value stamped into `app.kubernetes.io/managed-by` on every object we own
pub const MANAGED_BY: &str = "workload-applier";

/// Workload labels plus the ownership label
pub fn managed_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut all = labels.clone();
    all.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    all
}

/// A resource kind the applier knows how to create, compare, and update.
///
/// The comparison only looks at the fields the applier manages, so
/// server-defaulted fields on a live object never register as drift.
pub trait ManagedResource: Clone + Send + Sync {
    const KIND: &'static str;

    fn name(&self) -> &str;
    fn resource_version(&self) -> Option<String>;
    fn set_resource_version(&mut self, version: Option<String>);

    /// Whether the object carries our ownership label.
    fn is_managed(&self) -> bool;

    /// Whether the managed projection of `live` matches this desired state.
    fn spec_matches(&self, live: &Self) -> bool;
}

fn has_ownership_label(metadata: &ObjectMeta) -> bool {
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("app.kubernetes.io/managed-by"))
        .map(|value| value == MANAGED_BY)
        .unwrap_or(false)
}

/// Create a Deployment for a workload spec
pub fn build_deployment(namespace: &str, workload: &WorkloadSpec) -> Deployment {
    let labels = managed_labels(&workload.labels);

    Deployment {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(workload.replicas),
            selector: LabelSelector {
                match_labels: Some(workload.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: format!("{}-container", workload.name),
                        image: Some(workload.image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: i32::from(workload.container_port),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create a Service for a service spec, targeting the workload's container port
pub fn build_service(namespace: &str, service: &ServiceSpec, target_port: u16) -> Service {
    let labels = managed_labels(&service.selector);

    Service {
        metadata: ObjectMeta {
            name: Some(service.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(KubeServiceSpec {
            selector: Some(service.selector.clone()),
            ports: Some(vec![ServicePort {
                port: i32::from(service.port),
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some(service.kind.as_api_str().to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

type DeploymentFields<'a> = (
    Option<i32>,
    Option<&'a BTreeMap<String, String>>,
    Option<&'a BTreeMap<String, String>>,
    Option<&'a str>,
    Vec<i32>,
);

fn deployment_fields(deployment: &Deployment) -> DeploymentFields<'_> {
    let spec = deployment.spec.as_ref();
    let container = spec.and_then(|s| {
        s.template
            .spec
            .as_ref()
            .and_then(|pod| pod.containers.first())
    });

    (
        spec.and_then(|s| s.replicas),
        spec.and_then(|s| s.selector.match_labels.as_ref()),
        spec.and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.as_ref()),
        container.and_then(|c| c.image.as_deref()),
        container
            .and_then(|c| c.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.container_port).collect())
            .unwrap_or_default(),
    )
}

type ServiceFields<'a> = (
    Option<&'a BTreeMap<String, String>>,
    Option<&'a str>,
    Vec<(i32, Option<&'a IntOrString>)>,
);

fn service_fields(service: &Service) -> ServiceFields<'_> {
    let spec = service.spec.as_ref();

    (
        spec.and_then(|s| s.selector.as_ref()),
        spec.and_then(|s| s.type_.as_deref()),
        spec.and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| (p.port, p.target_port.as_ref()))
                    .collect()
            })
            .unwrap_or_default(),
    )
}

impl ManagedResource for Deployment {
    const KIND: &'static str = "deployment";

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    fn resource_version(&self) -> Option<String> {
        self.metadata.resource_version.clone()
    }

    fn set_resource_version(&mut self, version: Option<String>) {
        self.metadata.resource_version = version;
    }

    fn is_managed(&self) -> bool {
        has_ownership_label(&self.metadata)
    }

    fn spec_matches(&self, live: &Self) -> bool {
        deployment_fields(self) == deployment_fields(live)
    }
}

impl ManagedResource for Service {
    const KIND: &'static str = "service";

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    fn resource_version(&self) -> Option<String> {
        self.metadata.resource_version.clone()
    }

    fn set_resource_version(&mut self, version: Option<String>) {
        self.metadata.resource_version = version;
    }

    fn is_managed(&self) -> bool {
        has_ownership_label(&self.metadata)
    }

    fn spec_matches(&self, live: &Self) -> bool {
        service_fields(self) == service_fields(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceKind;

    fn test_workload() -> WorkloadSpec {
        WorkloadSpec {
            name: "system-monitor-app".to_string(),
            replicas: 1,
            labels: [("app".to_string(), "system-monitor-app".to_string())]
                .into_iter()
                .collect(),
            image: "don361/system-monitor:latest".to_string(),
            container_port: 5000,
        }
    }

    fn test_service_spec() -> ServiceSpec {
        ServiceSpec {
            name: "system-monitor-service".to_string(),
            selector: [("app".to_string(), "system-monitor-app".to_string())]
                .into_iter()
                .collect(),
            port: 5000,
            kind: ServiceKind::LoadBalancer,
        }
    }

    #[test]
    fn test_build_deployment() {
        let deployment = build_deployment("default", &test_workload());

        assert_eq!(
            deployment.metadata.name,
            Some("system-monitor-app".to_string())
        );
        assert_eq!(deployment.metadata.namespace, Some("default".to_string()));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get("app"),
            Some(&"system-monitor-app".to_string())
        );

        let containers = &spec.template.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "system-monitor-app-container");
        assert_eq!(
            containers[0].image,
            Some("don361/system-monitor:latest".to_string())
        );
        assert_eq!(
            containers[0].ports.as_ref().unwrap()[0].container_port,
            5000
        );
    }

    #[test]
    fn test_build_deployment_carries_ownership_label() {
        let deployment = build_deployment("default", &test_workload());
        assert!(deployment.is_managed());

        let template_labels = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        assert_eq!(
            template_labels.get("app.kubernetes.io/managed-by"),
            Some(&MANAGED_BY.to_string())
        );
    }

    #[test]
    fn test_build_service() {
        let service = build_service("default", &test_service_spec(), 5000);

        assert_eq!(
            service.metadata.name,
            Some("system-monitor-service".to_string())
        );

        let spec = service.spec.unwrap();
        assert_eq!(spec.type_, Some("LoadBalancer".to_string()));

        let ports = spec.ports.unwrap();
        assert_eq!(ports[0].port, 5000);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(5000)));
    }

    #[test]
    fn test_spec_matches_ignores_server_fields() {
        let desired = build_deployment("default", &test_workload());

        let mut live = desired.clone();
        live.metadata.resource_version = Some("8231".to_string());
        live.metadata.uid = Some("d2c1f7ce".to_string());
        live.status = Some(Default::default());

        assert!(desired.spec_matches(&live));
    }

    #[test]
    fn test_spec_matches_detects_replica_drift() {
        let desired = build_deployment("default", &test_workload());

        let mut workload = test_workload();
        workload.replicas = 3;
        let live = build_deployment("default", &workload);

        assert!(!desired.spec_matches(&live));
    }

    #[test]
    fn test_spec_matches_detects_image_drift() {
        let desired = build_deployment("default", &test_workload());

        let mut workload = test_workload();
        workload.image = "don361/system-monitor:v2".to_string();
        let live = build_deployment("default", &workload);

        assert!(!desired.spec_matches(&live));
    }

    #[test]
    fn test_service_spec_matches_detects_kind_drift() {
        let desired = build_service("default", &test_service_spec(), 5000);

        let mut spec = test_service_spec();
        spec.kind = ServiceKind::ClusterIp;
        let live = build_service("default", &spec, 5000);

        assert!(!desired.spec_matches(&live));
    }

    #[test]
    fn test_unmanaged_object_detected() {
        let mut service = build_service("default", &test_service_spec(), 5000);
        service
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .remove("app.kubernetes.io/managed-by");

        assert!(!service.is_managed());
    }

    #[test]
    fn test_resource_version_roundtrip() {
        let mut deployment = build_deployment("default", &test_workload());
        assert_eq!(deployment.resource_version(), None);

        deployment.set_resource_version(Some("42".to_string()));
        assert_eq!(deployment.resource_version(), Some("42".to_string()));
    }
}
