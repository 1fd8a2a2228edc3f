// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::{ComponentDefaults, OperatorConfig, UNLIMITED_RESOURCE};
use crate::crds::{CommonAppSpec, ImageSpec, PodMetadata, RollingUpdateSpec, ServiceSpecOverride, StorageSpec};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{selector_labels, RolloutPolicy};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

pub const CONFIG_CHECKSUM_ANNOTATION: &str = "operator.victoriametrics.com/config-checksum";

pub fn object_meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..metav1::ObjectMeta::default()
    }
}

/// Full image reference and pull policy. The tag falls back to the intent-wide
/// version, then to the operator default.
pub fn image_for(image: Option<&ImageSpec>, defaults: &ComponentDefaults, version: Option<&str>) -> (String, Option<String>) {
    let repository = image
        .and_then(|i| i.repository.clone())
        .unwrap_or_else(|| defaults.image.clone());
    let tag = image
        .and_then(|i| i.tag.clone())
        .or_else(|| version.map(|v| v.to_string()))
        .unwrap_or_else(|| defaults.version.clone());
    (format!("{}:{}", repository, tag), image.and_then(|i| i.pull_policy.clone()))
}

fn quantity_map(mem: &str, cpu: &str) -> Option<BTreeMap<String, Quantity>> {
    let map: BTreeMap<String, Quantity> = [("memory", mem), ("cpu", cpu)]
        .into_iter()
        .filter(|(_, v)| *v != UNLIMITED_RESOURCE && !v.is_empty())
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

pub fn resources_for(
    resources: Option<&corev1::ResourceRequirements>,
    defaults: &ComponentDefaults,
    config: &OperatorConfig,
) -> Option<corev1::ResourceRequirements> {
    if let Some(resources) = resources {
        return Some(resources.clone());
    }
    if !config.use_default_resources {
        return None;
    }
    let res = &defaults.resource;
    Some(corev1::ResourceRequirements {
        limits: quantity_map(&res.limit.mem, &res.limit.cpu),
        requests: quantity_map(&res.request.mem, &res.request.cpu),
        ..corev1::ResourceRequirements::default()
    })
}

/// Renders `-flag=value` arguments, engine-managed flags first.
pub fn build_args(managed: Vec<(String, String)>, extra: &BTreeMap<String, String>) -> Vec<String> {
    managed
        .into_iter()
        .chain(extra.iter().map(|(k, v)| (k.clone(), v.clone())))
        .map(|(k, v)| {
            if v.is_empty() {
                format!("-{}", k.trim_start_matches('-'))
            } else {
                format!("-{}={}", k.trim_start_matches('-'), v)
            }
        })
        .collect()
}

pub fn port_number(port: Option<&String>, defaults: &ComponentDefaults) -> i32 {
    port.and_then(|p| p.parse::<i32>().ok())
        .or_else(|| defaults.port.parse::<i32>().ok())
        .unwrap_or_default()
}

/// Checks the fields every component shares.
pub fn validate_app(component: &str, app: &CommonAppSpec, managed_flags: &[&str]) -> Result<(), ReconcileError> {
    if app.replica_count < 0 {
        return Err(ReconcileError::FatalConfig(format!(
            "{}: replicaCount must not be negative, got {}",
            component, app.replica_count
        )));
    }
    if let Some(port) = &app.port {
        if port.parse::<u16>().map_or(true, |p| p == 0) {
            return Err(ReconcileError::FatalConfig(format!("{}: invalid port {:?}", component, port)));
        }
    }
    for flag in app.extra_args.keys() {
        let flag = flag.trim_start_matches('-');
        if managed_flags.contains(&flag) {
            return Err(ReconcileError::FatalConfig(format!(
                "{}: extraArgs must not override the managed flag {:?}",
                component, flag
            )));
        }
    }
    Ok(())
}

pub fn service_port(name: &str, port: i32) -> corev1::ServicePort {
    corev1::ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(port)),
        ..corev1::ServicePort::default()
    }
}

pub fn container_port(name: &str, port: i32) -> corev1::ContainerPort {
    corev1::ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..corev1::ContainerPort::default()
    }
}

/// Builds the Service in front of a component. A headless service gets
/// clusterIP None unless the intent overrides the address.
pub fn make_service(
    name: &str,
    namespace: &str,
    component: &str,
    instance: &str,
    mut ports: Vec<corev1::ServicePort>,
    headless: bool,
    overrides: Option<&ServiceSpecOverride>,
) -> corev1::Service {
    let service_type = overrides
        .and_then(|o| o.type_.clone())
        .unwrap_or_else(|| "ClusterIP".to_string());
    let cluster_ip = match overrides.and_then(|o| o.cluster_ip.clone()) {
        Some(ip) => Some(ip),
        None if headless && service_type == "ClusterIP" => Some("None".to_string()),
        None => None,
    };
    if let Some(node_ports) = overrides.map(|o| &o.node_ports) {
        for port in ports.iter_mut() {
            port.node_port = port.name.as_ref().and_then(|n| node_ports.get(n)).copied();
        }
    }
    corev1::Service {
        metadata: object_meta(name, namespace, selector_labels(component, instance)),
        spec: Some(corev1::ServiceSpec {
            type_: Some(service_type),
            cluster_ip,
            selector: Some(selector_labels(component, instance)),
            ports: Some(ports),
            publish_not_ready_addresses: if headless { Some(true) } else { None },
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    }
}

pub fn config_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Pod template metadata: user labels and annotations, then the selector
/// labels which always win.
pub fn pod_template_meta(
    component: &str,
    instance: &str,
    pod_metadata: Option<&PodMetadata>,
    annotations: BTreeMap<String, String>,
) -> metav1::ObjectMeta {
    let mut labels = pod_metadata.map(|m| m.labels.clone()).unwrap_or_default();
    labels.extend(selector_labels(component, instance));
    let mut all_annotations = pod_metadata.map(|m| m.annotations.clone()).unwrap_or_default();
    all_annotations.extend(annotations);
    metav1::ObjectMeta {
        labels: Some(labels),
        annotations: if all_annotations.is_empty() {
            None
        } else {
            Some(all_annotations)
        },
        ..metav1::ObjectMeta::default()
    }
}

pub fn http_readiness_probe(port: i32, path: &str) -> corev1::Probe {
    corev1::Probe {
        http_get: Some(corev1::HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..corev1::HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(5),
        timeout_seconds: Some(5),
        failure_threshold: Some(10),
        ..corev1::Probe::default()
    }
}

pub struct ContainerParams<'a> {
    pub name: &'a str,
    pub app: &'a CommonAppSpec,
    pub defaults: &'a ComponentDefaults,
    pub version: Option<&'a str>,
    pub args: Vec<String>,
    pub ports: Vec<corev1::ContainerPort>,
    pub http_port: i32,
    pub probe_path: &'a str,
    pub volume_mounts: Vec<corev1::VolumeMount>,
}

pub fn make_container(params: ContainerParams<'_>, config: &OperatorConfig) -> corev1::Container {
    let (image, pull_policy) = image_for(params.app.image.as_ref(), params.defaults, params.version);
    corev1::Container {
        name: params.name.to_string(),
        image: Some(image),
        image_pull_policy: pull_policy,
        args: Some(params.args),
        ports: Some(params.ports),
        env: if params.app.extra_envs.is_empty() {
            None
        } else {
            Some(params.app.extra_envs.clone())
        },
        resources: resources_for(params.app.resources.as_ref(), params.defaults, config),
        readiness_probe: Some(http_readiness_probe(params.http_port, params.probe_path)),
        volume_mounts: if params.volume_mounts.is_empty() {
            None
        } else {
            Some(params.volume_mounts)
        },
        ..corev1::Container::default()
    }
}

pub fn volume_mount(name: &str, path: &str) -> corev1::VolumeMount {
    corev1::VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..corev1::VolumeMount::default()
    }
}

pub fn empty_dir_volume(name: &str) -> corev1::Volume {
    corev1::Volume {
        name: name.to_string(),
        empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
        ..corev1::Volume::default()
    }
}

pub struct WorkloadParams<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub component: &'a str,
    pub instance: &'a str,
    pub replicas: i32,
    pub container: corev1::Container,
    pub pod_metadata: Option<&'a PodMetadata>,
    pub volumes: Vec<corev1::Volume>,
    pub template_annotations: BTreeMap<String, String>,
}

/// StatefulSets are rolled out by the engine, so the platform is told not to
/// replace pods on its own.
pub fn make_stateful_set(
    params: WorkloadParams<'_>,
    service_name: &str,
    storage: Option<&StorageSpec>,
    data_volume: &str,
) -> appsv1::StatefulSet {
    let mut volumes = params.volumes;
    let volume_claim_templates = match storage {
        Some(storage) => Some(vec![corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(data_volume.to_string()),
                labels: Some(selector_labels(params.component, params.instance)),
                ..metav1::ObjectMeta::default()
            },
            spec: Some(storage.volume_claim_template.clone()),
            ..corev1::PersistentVolumeClaim::default()
        }]),
        None => {
            volumes.push(empty_dir_volume(data_volume));
            None
        }
    };
    appsv1::StatefulSet {
        metadata: object_meta(
            params.name,
            params.namespace,
            selector_labels(params.component, params.instance),
        ),
        spec: Some(appsv1::StatefulSetSpec {
            replicas: Some(params.replicas),
            service_name: service_name.to_string().into(),
            selector: metav1::LabelSelector {
                match_labels: Some(selector_labels(params.component, params.instance)),
                ..metav1::LabelSelector::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(appsv1::StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..appsv1::StatefulSetUpdateStrategy::default()
            }),
            template: corev1::PodTemplateSpec {
                metadata: Some(pod_template_meta(
                    params.component,
                    params.instance,
                    params.pod_metadata,
                    params.template_annotations,
                )),
                spec: Some(corev1::PodSpec {
                    containers: vec![params.container],
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
                    ..corev1::PodSpec::default()
                }),
            },
            volume_claim_templates,
            ..appsv1::StatefulSetSpec::default()
        }),
        ..appsv1::StatefulSet::default()
    }
}

pub fn make_deployment(params: WorkloadParams<'_>) -> appsv1::Deployment {
    appsv1::Deployment {
        metadata: object_meta(
            params.name,
            params.namespace,
            selector_labels(params.component, params.instance),
        ),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(params.replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(selector_labels(params.component, params.instance)),
                ..metav1::LabelSelector::default()
            },
            template: corev1::PodTemplateSpec {
                metadata: Some(pod_template_meta(
                    params.component,
                    params.instance,
                    params.pod_metadata,
                    params.template_annotations,
                )),
                spec: Some(corev1::PodSpec {
                    containers: vec![params.container],
                    volumes: if params.volumes.is_empty() {
                        None
                    } else {
                        Some(params.volumes)
                    },
                    ..corev1::PodSpec::default()
                }),
            },
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    }
}

pub fn rollout_policy(rolling_update: Option<&RollingUpdateSpec>, config: &OperatorConfig) -> RolloutPolicy {
    RolloutPolicy {
        pod_ready_timeout: rolling_update
            .and_then(|r| r.pod_ready_timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(config.pod_wait_ready_timeout),
    }
}
