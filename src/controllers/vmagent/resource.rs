// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::controllers::common::*;
use crate::crds::VMAgent;
use crate::reconciler::graph::selector_labels;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const VMAGENT: &str = "vmagent";
pub const SCRAPE_CONFIG_KEY: &str = "scrape.yaml";

const CONFIG_VOLUME: &str = "config";
const CONFIG_MOUNT_PATH: &str = "/etc/vmagent/config";
const QUEUE_VOLUME: &str = "persistent-queue";
const QUEUE_MOUNT_PATH: &str = "/vmagent_pq";

pub fn make_name(vmagent: &VMAgent) -> String {
    format!("{}-{}", VMAGENT, vmagent.name_any())
}

pub fn make_config_map_name(vmagent: &VMAgent) -> String {
    format!("{}-config", make_name(vmagent))
}

pub fn make_queue_claim_name(vmagent: &VMAgent) -> String {
    format!("{}-queue", make_name(vmagent))
}

/// Scrape configuration rendered into the ConfigMap. An absent fragment is an
/// empty mapping so the agent always starts with a readable file.
pub fn render_scrape_config(vmagent: &VMAgent) -> Result<String, String> {
    let raw = match vmagent.spec.scrape_config.as_deref() {
        None => return Ok("{}\n".to_string()),
        Some(raw) if raw.trim().is_empty() => return Ok("{}\n".to_string()),
        Some(raw) => raw,
    };
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Mapping(map)) => serde_yaml::to_string(&map).map_err(|e| e.to_string()),
        Ok(_) => Err("scrapeConfig must be a YAML mapping".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn make_config_map(vmagent: &VMAgent, content: String) -> corev1::ConfigMap {
    corev1::ConfigMap {
        metadata: object_meta(
            &make_config_map_name(vmagent),
            &vmagent.namespace().unwrap_or_default(),
            selector_labels(VMAGENT, &vmagent.name_any()),
        ),
        data: Some(BTreeMap::from([(SCRAPE_CONFIG_KEY.to_string(), content)])),
        ..corev1::ConfigMap::default()
    }
}

pub fn make_queue_claim(vmagent: &VMAgent) -> Option<corev1::PersistentVolumeClaim> {
    let queue = vmagent.spec.persistent_queue.as_ref()?;
    Some(corev1::PersistentVolumeClaim {
        metadata: object_meta(
            &make_queue_claim_name(vmagent),
            &vmagent.namespace().unwrap_or_default(),
            selector_labels(VMAGENT, &vmagent.name_any()),
        ),
        spec: Some(queue.volume_claim_template.clone()),
        ..corev1::PersistentVolumeClaim::default()
    })
}

pub fn make_vmagent_service(vmagent: &VMAgent, config: &OperatorConfig) -> corev1::Service {
    let http = port_number(vmagent.spec.common.port.as_ref(), &config.vmagent);
    make_service(
        &make_name(vmagent),
        &vmagent.namespace().unwrap_or_default(),
        VMAGENT,
        &vmagent.name_any(),
        vec![service_port("http", http)],
        false,
        vmagent.spec.common.service_spec.as_ref(),
    )
}

/// `checksum` is the digest of the rendered scrape configuration, or None
/// when the configuration could not be rendered this pass.
pub fn make_vmagent_deployment(
    vmagent: &VMAgent,
    checksum: Option<String>,
    config: &OperatorConfig,
) -> appsv1::Deployment {
    let spec = &vmagent.spec.common;
    let http = port_number(spec.port.as_ref(), &config.vmagent);
    let mut managed = vec![
        (
            "promscrape.config".to_string(),
            format!("{}/{}", CONFIG_MOUNT_PATH, SCRAPE_CONFIG_KEY),
        ),
        ("httpListenAddr".to_string(), format!(":{}", http)),
        ("remoteWrite.tmpDataPath".to_string(), QUEUE_MOUNT_PATH.to_string()),
    ];
    managed.extend(
        vmagent
            .spec
            .remote_write
            .iter()
            .map(|rw| ("remoteWrite.url".to_string(), rw.url.clone())),
    );

    let mut volumes = vec![corev1::Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(corev1::ConfigMapVolumeSource {
            name: Some(make_config_map_name(vmagent)),
            ..corev1::ConfigMapVolumeSource::default()
        }),
        ..corev1::Volume::default()
    }];
    if vmagent.spec.persistent_queue.is_some() {
        volumes.push(corev1::Volume {
            name: QUEUE_VOLUME.to_string(),
            persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                claim_name: make_queue_claim_name(vmagent),
                ..corev1::PersistentVolumeClaimVolumeSource::default()
            }),
            ..corev1::Volume::default()
        });
    } else {
        volumes.push(empty_dir_volume(QUEUE_VOLUME));
    }

    let container = make_container(
        ContainerParams {
            name: VMAGENT,
            app: spec,
            defaults: &config.vmagent,
            version: None,
            args: build_args(managed, &spec.extra_args),
            ports: vec![container_port("http", http)],
            http_port: http,
            probe_path: "/health",
            volume_mounts: vec![
                volume_mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH),
                volume_mount(QUEUE_VOLUME, QUEUE_MOUNT_PATH),
            ],
        },
        config,
    );
    make_deployment(WorkloadParams {
        name: &make_name(vmagent),
        namespace: &vmagent.namespace().unwrap_or_default(),
        component: VMAGENT,
        instance: &vmagent.name_any(),
        replicas: spec.replica_count,
        container,
        pod_metadata: spec.pod_metadata.as_ref(),
        volumes,
        template_annotations: checksum
            .map(|c| BTreeMap::from([(CONFIG_CHECKSUM_ANNOTATION.to_string(), c)]))
            .unwrap_or_default(),
    })
}
