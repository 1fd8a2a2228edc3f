// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::controllers::vmalertmanager::selects_config;
use crate::crds::{VMAgent, VMAlertmanager, VMAlertmanagerConfig, VMCluster};
use crate::kubernetes_api_objects::KubeResource;
use crate::reconciler::engine::{reconcile_intent, Context};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::intent::Intent;
use crate::reconciler::resync::{backoff, requeue_action};
use crate::shim_layer::kube_store::KubeStore;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef as KubeObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SUPERSEDED_REQUEUE: Duration = Duration::from_secs(1);

/// Runs the VMCluster, VMAgent and VMAlertmanager controllers until a
/// shutdown signal arrives.
pub async fn run_operator(config: OperatorConfig) -> Result<(), kube::Error> {
    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();
    let ctx = Arc::new(Context::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(config),
        cancel.clone(),
    ));
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, cancelling in-flight reconciles");
        cancel.cancel();
    });

    info!("starting controllers");
    futures::join!(
        run_controller::<VMCluster>(client.clone(), ctx.clone(), |c| c),
        run_controller::<VMAgent>(client.clone(), ctx.clone(), |c| c),
        run_controller::<VMAlertmanager>(client.clone(), ctx.clone(), |c| {
            watch_alertmanager_configs(c, client.clone())
        }),
    );
    info!("controllers terminated");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Builds and runs the controller of intent kind `I`. Changes to any object
/// the intent owns trigger a reconcile of the owner; `customize` may add
/// further watches.
pub async fn run_controller<I>(
    client: Client,
    ctx: Arc<Context>,
    customize: impl FnOnce(Controller<I>) -> Controller<I>,
) where
    I: Intent,
{
    let kind = I::KIND;
    let controller = Controller::new(Api::<I>::all(client.clone()), watcher::Config::default())
        .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Secret>::all(client.clone()), watcher::Config::default())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), watcher::Config::default());
    info!(%kind, "starting controller");
    customize(controller)
        .shutdown_on_signal()
        .run(reconcile_with::<I>, error_policy::<I>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(%kind, object = %obj, "reconciled"),
                Err(err) => warn!(%kind, error = %err, "reconcile failed"),
            }
        })
        .await;
    info!(%kind, "controller terminated");
}

/// Re-triggers every alertmanager in the namespace that selects a changed
/// VMAlertmanagerConfig.
fn watch_alertmanager_configs(controller: Controller<VMAlertmanager>, client: Client) -> Controller<VMAlertmanager> {
    let alertmanagers = controller.store();
    controller.watches(
        Api::<VMAlertmanagerConfig>::all(client),
        watcher::Config::default(),
        move |cfg: VMAlertmanagerConfig| {
            alertmanagers
                .state()
                .into_iter()
                .filter(|am| am.namespace() == cfg.namespace() && selects_config(am, &cfg))
                .map(|am| KubeObjectRef::from_obj(&*am))
                .collect::<Vec<_>>()
        },
    )
}

/// The reconcile function handed to the kube-runtime controller.
pub async fn reconcile_with<I: Intent>(obj: Arc<I>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let key = KubeResource::object_ref(obj.as_ref());
    match reconcile_intent::<I>(&ctx, &key).await {
        Ok(report) => {
            let action = requeue_action(&ctx.config);
            info!(intent = %key, update_status = ?report.update_status, action = ?action, "requeue");
            Ok(action)
        }
        Err(ReconcileError::Cancelled) => Ok(Action::await_change()),
        Err(err) => Err(err),
    }
}

pub fn error_policy<I: Intent>(obj: Arc<I>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = KubeResource::object_ref(obj.as_ref());
    let action = match err {
        ReconcileError::Superseded(_) => Action::requeue(SUPERSEDED_REQUEUE),
        err if err.is_retryable() => Action::requeue(backoff(ctx.failure_count(&key).max(1))),
        _ => requeue_action(&ctx.config),
    };
    info!(intent = %key, error = %err, action = ?action, "requeue after error");
    action
}
