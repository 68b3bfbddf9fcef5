//! Main controller implementation.
//!
//! Wires the Kubernetes-backed stores into the reconciler, starts one
//! watcher per kind plus the admission webhook, and runs until any of them
//! exits.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crate::webhook::{self, WebhookState};
use kube::{Api, Client};
use machine_crds::{Machine, MachineDriver, MachineTemplate};
use machine_store::{KubeClusterLookup, KubeStore, ResourceStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for Machine provisioning resources.
#[derive(Debug)]
pub struct Controller {
    machine_watcher: Task,
    template_watcher: Task,
    driver_watcher: Task,
    webhook: Task,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Machine Controller");

        let client = Client::try_default().await?;

        let (machine_api, template_api): (Api<Machine>, Api<MachineTemplate>) = match config.watch_namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
        let driver_api: Api<MachineDriver> = Api::all(client.clone());

        let drivers: Arc<dyn ResourceStore<MachineDriver>> = Arc::new(KubeStore::cluster(client.clone()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeStore::<Machine>::namespaced(client.clone())),
            Arc::new(KubeStore::<MachineTemplate>::namespaced(client.clone())),
            Arc::clone(&drivers),
            Arc::new(KubeClusterLookup::new(client)),
        ));

        let watcher = Arc::new(Watcher::new(reconciler, machine_api, template_api, driver_api));

        let machine_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_machines().await })
        };
        let template_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_machine_templates().await })
        };
        let driver_watcher = tokio::spawn(async move { watcher.watch_machine_drivers().await });

        let state = Arc::new(WebhookState::new(drivers, config.privileged_group.clone()));
        let webhook = tokio::spawn(webhook::serve(config.webhook_addr, config.webhook_tls.clone(), state));

        Ok(Self {
            machine_watcher,
            template_watcher,
            driver_watcher,
            webhook,
        })
    }

    /// Runs the controller until a task exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Machine Controller running");

        // Tasks run forever; the first to finish ends the process.
        tokio::select! {
            result = &mut self.machine_watcher => finished("Machine watcher", result),
            result = &mut self.template_watcher => finished("MachineTemplate watcher", result),
            result = &mut self.driver_watcher => finished("MachineDriver watcher", result),
            result = &mut self.webhook => finished("Admission webhook", result),
        }
    }
}

fn finished(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result.map_err(|e| ControllerError::Watch(format!("{task} panicked: {e}")))??;
    info!("{} exited", task);
    Ok(())
}
