// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::harness::*;
use crate::controllers::common::config_checksum;
use crate::controllers::vmagent::resource::*;
use crate::controllers::vmcluster::resource::*;
use crate::crds::{
    ImageSpec, RemoteWriteSpec, ServiceSpecOverride, StorageSpec, VMAgent, VMAgentSpec, VMCluster, VMClusterSpec,
};
use crate::kubernetes_api_objects::{Kind, KubeObject};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::intent::Intent;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaimSpec};
use std::collections::BTreeMap;

fn cluster(spec: VMClusterSpec) -> VMCluster {
    in_namespace(VMCluster::new("c", spec))
}

fn full_cluster() -> VMCluster {
    cluster(VMClusterSpec {
        retention_period: "12".to_string(),
        replication_factor: Some(2),
        cluster_version: Some("v1.100.0-cluster".to_string()),
        vmstorage: Some(stateful_app(2)),
        vmselect: Some(stateful_app(1)),
        vminsert: Some(app(1)),
    })
}

fn containers(obj: &KubeObject) -> Vec<Container> {
    match obj {
        KubeObject::StatefulSet(sts) => sts.spec.clone().unwrap().template.spec.unwrap().containers,
        KubeObject::Deployment(d) => d.spec.clone().unwrap().template.spec.unwrap().containers,
        other => panic!("{:?} has no pod template", other.kind()),
    }
}

fn agent(spec: VMAgentSpec) -> VMAgent {
    in_namespace(VMAgent::new("a", spec))
}

fn agent_spec() -> VMAgentSpec {
    VMAgentSpec {
        common: app(1),
        remote_write: vec![
            RemoteWriteSpec {
                url: "http://one".to_string(),
            },
            RemoteWriteSpec {
                url: "http://two".to_string(),
            },
        ],
        scrape_config: None,
        persistent_queue: None,
    }
}

#[test]
pub fn test_cluster_graph_order() {
    println!("Testing the vmcluster object graph...");
    let synthesis = full_cluster().synthesize(&(), &test_config());
    assert!(synthesis.parse_errors.is_empty());
    let entries: Vec<(String, Kind, String)> = synthesis
        .graph
        .entries()
        .iter()
        .map(|e| (e.component.clone(), e.object.kind(), e.object.metadata().name.clone().unwrap()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (VMSTORAGE.to_string(), Kind::ServiceKind, "vmstorage-c".to_string()),
            (VMSTORAGE.to_string(), Kind::StatefulSetKind, "vmstorage-c".to_string()),
            (VMSELECT.to_string(), Kind::ServiceKind, "vmselect-c".to_string()),
            (VMSELECT.to_string(), Kind::StatefulSetKind, "vmselect-c".to_string()),
            (VMINSERT.to_string(), Kind::ServiceKind, "vminsert-c".to_string()),
            (VMINSERT.to_string(), Kind::DeploymentKind, "vminsert-c".to_string()),
        ]
    );
    let rollouts: Vec<bool> = synthesis.graph.entries().iter().map(|e| e.rollout.is_some()).collect();
    assert_eq!(rollouts, vec![false, true, false, true, false, false]);
}

#[test]
pub fn test_cluster_args() {
    println!("Testing vmcluster container arguments...");
    let synthesis = full_cluster().synthesize(&(), &test_config());
    let entries = synthesis.graph.entries();

    let storage = &containers(&entries[1].object)[0];
    assert_eq!(storage.image.as_deref(), Some("victoriametrics/vmstorage:v1.100.0-cluster"));
    let storage_args = storage.args.clone().unwrap();
    assert_eq!(
        storage_args,
        vec![
            "-retentionPeriod=12",
            "-storageDataPath=/vmstorage-data",
            "-httpListenAddr=:8482",
            "-vminsertAddr=:8400",
            "-vmselectAddr=:8401",
        ]
    );

    let select_args = containers(&entries[3].object)[0].args.clone().unwrap();
    assert!(select_args.contains(
        &"-storageNode=vmstorage-c-0.vmstorage-c.default.svc:8401,vmstorage-c-1.vmstorage-c.default.svc:8401"
            .to_string()
    ));
    assert!(select_args.contains(&"-replicationFactor=2".to_string()));

    let insert_args = containers(&entries[5].object)[0].args.clone().unwrap();
    assert!(insert_args.contains(
        &"-storageNode=vmstorage-c-0.vmstorage-c.default.svc:8400,vmstorage-c-1.vmstorage-c.default.svc:8400"
            .to_string()
    ));
}

#[test]
pub fn test_storage_nodes_use_cluster_domain() {
    println!("Testing storage node addresses with a cluster domain...");
    let mut config = test_config();
    config.cluster_domain_name = "cluster.local".to_string();
    assert_eq!(
        make_storage_nodes(&full_cluster(), VMINSERT_PORT, &config),
        "vmstorage-c-0.vmstorage-c.default.svc.cluster.local:8400,vmstorage-c-1.vmstorage-c.default.svc.cluster.local:8400"
    );
}

#[test]
pub fn test_service_overrides() {
    println!("Testing service type and node port overrides...");
    let mut spec = app(1);
    spec.service_spec = Some(ServiceSpecOverride {
        type_: Some("NodePort".to_string()),
        cluster_ip: None,
        node_ports: BTreeMap::from([("http".to_string(), 30480)]),
    });
    let vmcluster = cluster(VMClusterSpec {
        retention_period: "1".to_string(),
        vmstorage: Some(stateful_app(1)),
        vminsert: Some(spec.clone()),
        ..VMClusterSpec::default()
    });
    let svc = make_vminsert_service(&vmcluster, &spec, &test_config()).spec.unwrap();
    assert_eq!(svc.type_.as_deref(), Some("NodePort"));
    assert_eq!(svc.cluster_ip, None);
    assert_eq!(svc.ports.unwrap()[0].node_port, Some(30480));

    let storage = make_vmstorage_service(&vmcluster, &stateful_app(1), &test_config()).spec.unwrap();
    assert_eq!(storage.cluster_ip.as_deref(), Some("None"));
}

#[test]
pub fn test_cluster_validation() {
    println!("Testing vmcluster spec validation...");
    assert_eq!(full_cluster().validate(), Ok(()));

    let mut no_storage = full_cluster();
    no_storage.spec.vmstorage = None;
    assert!(matches!(no_storage.validate(), Err(ReconcileError::FatalConfig(_))));

    let mut bad_rf = full_cluster();
    bad_rf.spec.replication_factor = Some(0);
    assert!(matches!(bad_rf.validate(), Err(ReconcileError::FatalConfig(_))));

    let mut negative = full_cluster();
    negative.spec.vminsert = Some(app(-1));
    assert!(matches!(negative.validate(), Err(ReconcileError::FatalConfig(_))));

    let mut bad_port = full_cluster();
    if let Some(select) = bad_port.spec.vmselect.as_mut() {
        select.common.port = Some("http".to_string());
    }
    assert!(matches!(bad_port.validate(), Err(ReconcileError::FatalConfig(_))));

    let mut storage_only = full_cluster();
    storage_only.spec.vmselect = None;
    storage_only.spec.vminsert = None;
    assert_eq!(storage_only.validate(), Ok(()));
}

#[test]
pub fn test_image_override() {
    println!("Testing image pinning per component...");
    let mut vmcluster = full_cluster();
    if let Some(storage) = vmcluster.spec.vmstorage.as_mut() {
        storage.common.image = Some(ImageSpec {
            repository: Some("registry.local/vmstorage".to_string()),
            tag: Some("pinned".to_string()),
            pull_policy: Some("Always".to_string()),
        });
    }
    let synthesis = vmcluster.synthesize(&(), &test_config());
    let storage = &containers(&synthesis.graph.entries()[1].object)[0];
    assert_eq!(storage.image.as_deref(), Some("registry.local/vmstorage:pinned"));
    assert_eq!(storage.image_pull_policy.as_deref(), Some("Always"));
    let select = &containers(&synthesis.graph.entries()[3].object)[0];
    assert_eq!(select.image.as_deref(), Some("victoriametrics/vmselect:v1.100.0-cluster"));
}

#[test]
pub fn test_scrape_config_rendering() {
    println!("Testing scrape configuration rendering...");
    let mut spec = agent_spec();
    assert_eq!(render_scrape_config(&agent(spec.clone())), Ok("{}\n".to_string()));
    spec.scrape_config = Some("   ".to_string());
    assert_eq!(render_scrape_config(&agent(spec.clone())), Ok("{}\n".to_string()));
    spec.scrape_config = Some("global:\n  scrape_interval: 30s\n".to_string());
    assert!(render_scrape_config(&agent(spec.clone())).unwrap().contains("scrape_interval: 30s"));
    spec.scrape_config = Some("[1, 2]".to_string());
    assert_eq!(
        render_scrape_config(&agent(spec.clone())),
        Err("scrapeConfig must be a YAML mapping".to_string())
    );
    spec.scrape_config = Some("a: [".to_string());
    assert!(render_scrape_config(&agent(spec)).is_err());
}

#[test]
pub fn test_agent_graph() {
    println!("Testing the vmagent object graph...");
    let mut spec = agent_spec();
    spec.persistent_queue = Some(StorageSpec {
        volume_claim_template: PersistentVolumeClaimSpec::default(),
    });
    let synthesis = agent(spec).synthesize(&(), &test_config());
    let kinds: Vec<Kind> = synthesis.graph.entries().iter().map(|e| e.object.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            Kind::ConfigMapKind,
            Kind::PersistentVolumeClaimKind,
            Kind::ServiceKind,
            Kind::DeploymentKind
        ]
    );
    let args = containers(&synthesis.graph.entries()[3].object)[0].args.clone().unwrap();
    assert_eq!(
        args,
        vec![
            "-promscrape.config=/etc/vmagent/config/scrape.yaml",
            "-httpListenAddr=:8429",
            "-remoteWrite.tmpDataPath=/vmagent_pq",
            "-remoteWrite.url=http://one",
            "-remoteWrite.url=http://two",
        ]
    );
}

#[test]
pub fn test_agent_parse_error_retains_config_map() {
    println!("Testing vmagent synthesis with a broken scrape config...");
    let mut spec = agent_spec();
    spec.scrape_config = Some("- a\n".to_string());
    let vmagent = agent(spec);
    let synthesis = vmagent.synthesize(&(), &test_config());
    assert_eq!(synthesis.parse_errors.len(), 1);
    assert_eq!(synthesis.parse_errors[0].source, "scrapeConfig");
    let kinds: Vec<Kind> = synthesis.graph.entries().iter().map(|e| e.object.kind()).collect();
    assert_eq!(kinds, vec![Kind::ServiceKind, Kind::DeploymentKind]);
    assert!(synthesis
        .graph
        .keys()
        .iter()
        .any(|k| k.kind == Kind::ConfigMapKind && k.name == make_config_map_name(&vmagent)));
}

#[test]
pub fn test_agent_validation() {
    println!("Testing vmagent spec validation...");
    assert_eq!(agent(agent_spec()).validate(), Ok(()));

    let mut none = agent_spec();
    none.remote_write.clear();
    assert!(agent(none).validate().is_err());

    let mut duplicate = agent_spec();
    duplicate.remote_write[1].url = "http://one".to_string();
    assert!(agent(duplicate).validate().is_err());

    let mut empty = agent_spec();
    empty.remote_write[0].url = " ".to_string();
    assert!(agent(empty).validate().is_err());
}

#[test]
pub fn test_config_checksum() {
    println!("Testing the config checksum annotation value...");
    let checksum = config_checksum("global:\n  scrape_interval: 30s\n");
    assert_eq!(checksum.len(), 64);
    assert!(checksum.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(checksum, config_checksum("global:\n  scrape_interval: 30s\n"));
    assert_ne!(checksum, config_checksum("global:\n  scrape_interval: 60s\n"));
    assert_eq!(
        config_checksum(""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
