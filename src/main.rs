// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::{bail, Result};
use kube::CustomResourceExt;
use std::env;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vm_operator::config::OperatorConfig;
use vm_operator::crds::{VMAgent, VMAlertmanager, VMAlertmanagerConfig, VMCluster};
use vm_operator::shim_layer::run_operator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args: Vec<String> = env::args().collect();
    let cmd = match args.get(1) {
        Some(cmd) => cmd.as_str(),
        None => bail!("missing command; please use \"export\", \"run\" or \"print-defaults\""),
    };

    match cmd {
        "export" => {
            let crds = [
                VMCluster::crd(),
                VMAgent::crd(),
                VMAlertmanager::crd(),
                VMAlertmanagerConfig::crd(),
            ];
            for crd in crds {
                println!("---\n{}", serde_yaml::to_string(&crd)?);
            }
        }
        "print-defaults" => {
            print!("{}", OperatorConfig::default().to_yaml()?);
        }
        "run" => {
            let config = OperatorConfig::load(args.get(2).map(Path::new))?;
            info!(
                resync = ?config.force_resync_interval,
                pod_ready_timeout = ?config.pod_wait_ready_timeout,
                "running vm-operator"
            );
            run_operator(config).await?;
        }
        _ => {
            error!(command = cmd, "wrong command; please use \"export\", \"run\" or \"print-defaults\"");
        }
    }
    Ok(())
}
