// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::controllers::common::*;
use crate::crds::VMAlertmanager;
use crate::reconciler::graph::selector_labels;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const VMALERTMANAGER: &str = "vmalertmanager";
pub const CONFIG_KEY: &str = "alertmanager.yaml";
pub const MESH_PORT: i32 = 9094;

const CONFIG_VOLUME: &str = "config-volume";
const CONFIG_MOUNT_PATH: &str = "/etc/alertmanager/config";
const DATA_VOLUME: &str = "vmalertmanager-db";
const DATA_MOUNT_PATH: &str = "/alertmanager";

pub fn make_name(vmalertmanager: &VMAlertmanager) -> String {
    format!("{}-{}", VMALERTMANAGER, vmalertmanager.name_any())
}

pub fn make_secret_name(vmalertmanager: &VMAlertmanager) -> String {
    format!("{}-config", make_name(vmalertmanager))
}

pub fn make_config_secret(vmalertmanager: &VMAlertmanager, content: &str) -> corev1::Secret {
    corev1::Secret {
        metadata: object_meta(
            &make_secret_name(vmalertmanager),
            &vmalertmanager.namespace().unwrap_or_default(),
            selector_labels(VMALERTMANAGER, &vmalertmanager.name_any()),
        ),
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            ByteString(content.as_bytes().to_vec()),
        )])),
        type_: Some("Opaque".to_string()),
        ..corev1::Secret::default()
    }
}

pub fn make_vmalertmanager_service(vmalertmanager: &VMAlertmanager, config: &OperatorConfig) -> corev1::Service {
    let common = &vmalertmanager.spec.app.common;
    let http = port_number(common.port.as_ref(), &config.vmalertmanager);
    make_service(
        &make_name(vmalertmanager),
        &vmalertmanager.namespace().unwrap_or_default(),
        VMALERTMANAGER,
        &vmalertmanager.name_any(),
        vec![service_port("http", http), service_port("mesh", MESH_PORT)],
        true,
        common.service_spec.as_ref(),
    )
}

/// Alertmanager takes double-dash flags and always needs the `=`, an empty
/// value is meaningful.
fn alertmanager_args(managed: Vec<(String, String)>, extra: &BTreeMap<String, String>) -> Vec<String> {
    managed
        .into_iter()
        .chain(extra.iter().map(|(k, v)| (k.clone(), v.clone())))
        .map(|(k, v)| format!("--{}={}", k.trim_start_matches('-'), v))
        .collect()
}

/// Mesh peers, one per replica. A single replica runs without clustering.
pub fn make_cluster_peers(vmalertmanager: &VMAlertmanager, config: &OperatorConfig) -> Vec<String> {
    let replicas = vmalertmanager.spec.app.common.replica_count;
    if replicas < 2 {
        return Vec::new();
    }
    let name = make_name(vmalertmanager);
    let namespace = vmalertmanager.namespace().unwrap_or_default();
    (0..replicas)
        .map(|i| {
            format!(
                "{}-{}.{}.{}.svc{}:{}",
                name,
                i,
                name,
                namespace,
                config.cluster_domain_suffix(),
                MESH_PORT
            )
        })
        .collect()
}

pub fn make_vmalertmanager_stateful_set(
    vmalertmanager: &VMAlertmanager,
    checksum: String,
    config: &OperatorConfig,
) -> appsv1::StatefulSet {
    let app = &vmalertmanager.spec.app;
    let name = make_name(vmalertmanager);
    let http = port_number(app.common.port.as_ref(), &config.vmalertmanager);
    let mut managed = vec![
        ("config.file".to_string(), format!("{}/{}", CONFIG_MOUNT_PATH, CONFIG_KEY)),
        ("storage.path".to_string(), DATA_MOUNT_PATH.to_string()),
        ("web.listen-address".to_string(), format!(":{}", http)),
    ];
    let peers = make_cluster_peers(vmalertmanager, config);
    // an empty listen address disables the mesh
    if peers.is_empty() {
        managed.push(("cluster.listen-address".to_string(), String::new()));
    } else {
        managed.push(("cluster.listen-address".to_string(), format!("0.0.0.0:{}", MESH_PORT)));
        managed.extend(peers.into_iter().map(|p| ("cluster.peer".to_string(), p)));
    }
    let args = alertmanager_args(managed, &app.common.extra_args);

    let container = make_container(
        ContainerParams {
            name: "alertmanager",
            app: &app.common,
            defaults: &config.vmalertmanager,
            version: None,
            args,
            ports: vec![container_port("http", http), container_port("mesh", MESH_PORT)],
            http_port: http,
            probe_path: "/-/ready",
            volume_mounts: vec![
                volume_mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH),
                volume_mount(DATA_VOLUME, DATA_MOUNT_PATH),
            ],
        },
        config,
    );
    let config_volume = corev1::Volume {
        name: CONFIG_VOLUME.to_string(),
        secret: Some(corev1::SecretVolumeSource {
            secret_name: Some(make_secret_name(vmalertmanager)),
            ..corev1::SecretVolumeSource::default()
        }),
        ..corev1::Volume::default()
    };
    make_stateful_set(
        WorkloadParams {
            name: &name,
            namespace: &vmalertmanager.namespace().unwrap_or_default(),
            component: VMALERTMANAGER,
            instance: &vmalertmanager.name_any(),
            replicas: app.common.replica_count,
            container,
            pod_metadata: app.common.pod_metadata.as_ref(),
            volumes: vec![config_volume],
            template_annotations: BTreeMap::from([(CONFIG_CHECKSUM_ANNOTATION.to_string(), checksum)]),
        },
        &name,
        app.storage.as_ref(),
        DATA_VOLUME,
    )
}
