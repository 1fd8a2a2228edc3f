// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::controllers::common::*;
use crate::crds::{CommonAppSpec, StatefulAppSpec, VMCluster};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const VMSTORAGE: &str = "vmstorage";
pub const VMSELECT: &str = "vmselect";
pub const VMINSERT: &str = "vminsert";

pub const VMINSERT_PORT: i32 = 8400;
pub const VMSELECT_PORT: i32 = 8401;

const STORAGE_DATA_PATH: &str = "/vmstorage-data";
const SELECT_CACHE_PATH: &str = "/cache";
const DATA_VOLUME: &str = "vmstorage-db";
const CACHE_VOLUME: &str = "vmselect-cachedir";

pub fn make_component_name(component: &str, vmcluster: &VMCluster) -> String {
    format!("{}-{}", component, vmcluster.name_any())
}

/// Stable per-replica addresses of vmstorage, one entry per ordinal.
pub fn make_storage_nodes(vmcluster: &VMCluster, port: i32, config: &OperatorConfig) -> String {
    let name = make_component_name(VMSTORAGE, vmcluster);
    let namespace = vmcluster.namespace().unwrap_or_default();
    let replicas = vmcluster
        .spec
        .vmstorage
        .as_ref()
        .map_or(0, |s| s.common.replica_count);
    (0..replicas)
        .map(|i| {
            format!(
                "{}-{}.{}.{}.svc{}:{}",
                name,
                i,
                name,
                namespace,
                config.cluster_domain_suffix(),
                port
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn replication_arg(vmcluster: &VMCluster) -> Option<(String, String)> {
    vmcluster
        .spec
        .replication_factor
        .map(|rf| ("replicationFactor".to_string(), rf.to_string()))
}

pub fn make_vmstorage_service(vmcluster: &VMCluster, spec: &StatefulAppSpec, config: &OperatorConfig) -> corev1::Service {
    let http = port_number(spec.common.port.as_ref(), &config.vmstorage);
    make_service(
        &make_component_name(VMSTORAGE, vmcluster),
        &vmcluster.namespace().unwrap_or_default(),
        VMSTORAGE,
        &vmcluster.name_any(),
        vec![
            service_port("http", http),
            service_port("vminsert", VMINSERT_PORT),
            service_port("vmselect", VMSELECT_PORT),
        ],
        true,
        spec.common.service_spec.as_ref(),
    )
}

pub fn make_vmstorage_stateful_set(
    vmcluster: &VMCluster,
    spec: &StatefulAppSpec,
    config: &OperatorConfig,
) -> appsv1::StatefulSet {
    let name = make_component_name(VMSTORAGE, vmcluster);
    let http = port_number(spec.common.port.as_ref(), &config.vmstorage);
    let managed = vec![
        ("retentionPeriod".to_string(), vmcluster.spec.retention_period.clone()),
        ("storageDataPath".to_string(), STORAGE_DATA_PATH.to_string()),
        ("httpListenAddr".to_string(), format!(":{}", http)),
        ("vminsertAddr".to_string(), format!(":{}", VMINSERT_PORT)),
        ("vmselectAddr".to_string(), format!(":{}", VMSELECT_PORT)),
    ];
    let container = make_container(
        ContainerParams {
            name: VMSTORAGE,
            app: &spec.common,
            defaults: &config.vmstorage,
            version: vmcluster.spec.cluster_version.as_deref(),
            args: build_args(managed, &spec.common.extra_args),
            ports: vec![
                container_port("http", http),
                container_port("vminsert", VMINSERT_PORT),
                container_port("vmselect", VMSELECT_PORT),
            ],
            http_port: http,
            probe_path: "/health",
            volume_mounts: vec![volume_mount(DATA_VOLUME, STORAGE_DATA_PATH)],
        },
        config,
    );
    make_stateful_set(
        WorkloadParams {
            name: &name,
            namespace: &vmcluster.namespace().unwrap_or_default(),
            component: VMSTORAGE,
            instance: &vmcluster.name_any(),
            replicas: spec.common.replica_count,
            container,
            pod_metadata: spec.common.pod_metadata.as_ref(),
            volumes: Vec::new(),
            template_annotations: BTreeMap::new(),
        },
        &name,
        spec.storage.as_ref(),
        DATA_VOLUME,
    )
}

pub fn make_vmselect_service(vmcluster: &VMCluster, spec: &StatefulAppSpec, config: &OperatorConfig) -> corev1::Service {
    let http = port_number(spec.common.port.as_ref(), &config.vmselect);
    make_service(
        &make_component_name(VMSELECT, vmcluster),
        &vmcluster.namespace().unwrap_or_default(),
        VMSELECT,
        &vmcluster.name_any(),
        vec![service_port("http", http)],
        true,
        spec.common.service_spec.as_ref(),
    )
}

pub fn make_vmselect_stateful_set(
    vmcluster: &VMCluster,
    spec: &StatefulAppSpec,
    config: &OperatorConfig,
) -> appsv1::StatefulSet {
    let name = make_component_name(VMSELECT, vmcluster);
    let http = port_number(spec.common.port.as_ref(), &config.vmselect);
    let mut managed = vec![
        ("cacheDataPath".to_string(), SELECT_CACHE_PATH.to_string()),
        ("httpListenAddr".to_string(), format!(":{}", http)),
        ("storageNode".to_string(), make_storage_nodes(vmcluster, VMSELECT_PORT, config)),
    ];
    managed.extend(replication_arg(vmcluster));
    let container = make_container(
        ContainerParams {
            name: VMSELECT,
            app: &spec.common,
            defaults: &config.vmselect,
            version: vmcluster.spec.cluster_version.as_deref(),
            args: build_args(managed, &spec.common.extra_args),
            ports: vec![container_port("http", http)],
            http_port: http,
            probe_path: "/health",
            volume_mounts: vec![volume_mount(CACHE_VOLUME, SELECT_CACHE_PATH)],
        },
        config,
    );
    make_stateful_set(
        WorkloadParams {
            name: &name,
            namespace: &vmcluster.namespace().unwrap_or_default(),
            component: VMSELECT,
            instance: &vmcluster.name_any(),
            replicas: spec.common.replica_count,
            container,
            pod_metadata: spec.common.pod_metadata.as_ref(),
            volumes: Vec::new(),
            template_annotations: BTreeMap::new(),
        },
        &name,
        spec.storage.as_ref(),
        CACHE_VOLUME,
    )
}

pub fn make_vminsert_service(vmcluster: &VMCluster, spec: &CommonAppSpec, config: &OperatorConfig) -> corev1::Service {
    let http = port_number(spec.port.as_ref(), &config.vminsert);
    make_service(
        &make_component_name(VMINSERT, vmcluster),
        &vmcluster.namespace().unwrap_or_default(),
        VMINSERT,
        &vmcluster.name_any(),
        vec![service_port("http", http)],
        false,
        spec.service_spec.as_ref(),
    )
}

pub fn make_vminsert_deployment(vmcluster: &VMCluster, spec: &CommonAppSpec, config: &OperatorConfig) -> appsv1::Deployment {
    let http = port_number(spec.port.as_ref(), &config.vminsert);
    let mut managed = vec![
        ("httpListenAddr".to_string(), format!(":{}", http)),
        ("storageNode".to_string(), make_storage_nodes(vmcluster, VMINSERT_PORT, config)),
    ];
    managed.extend(replication_arg(vmcluster));
    let container = make_container(
        ContainerParams {
            name: VMINSERT,
            app: spec,
            defaults: &config.vminsert,
            version: vmcluster.spec.cluster_version.as_deref(),
            args: build_args(managed, &spec.extra_args),
            ports: vec![container_port("http", http)],
            http_port: http,
            probe_path: "/health",
            volume_mounts: Vec::new(),
        },
        config,
    );
    make_deployment(WorkloadParams {
        name: &make_component_name(VMINSERT, vmcluster),
        namespace: &vmcluster.namespace().unwrap_or_default(),
        component: VMINSERT,
        instance: &vmcluster.name_any(),
        replicas: spec.replica_count,
        container,
        pod_metadata: spec.pod_metadata.as_ref(),
        volumes: Vec::new(),
        template_annotations: BTreeMap::new(),
    })
}
