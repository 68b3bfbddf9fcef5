//! Kubernetes resource watchers.
//!
//! Each kind runs under its own `kube_runtime::Controller` through the
//! generic `watch_resource()` helper, which handles reconnection, debouncing
//! and the requeue decision returned by the reconciler.

use crate::error::ControllerError;
use crate::reconciler::{resource_key, resource_key_for, Reconciler, RESYNC_INTERVAL};
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{self, Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use machine_crds::{Machine, MachineDriver, MachineTemplate};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a controller for `K` until its stream ends
///
/// Faults are requeued on the resource's backoff sequence.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource<DynamicType = ()> + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        let (delay, failures) = ctx.next_backoff(&key);
        error!(
            "Reconciliation error for {} (failure {}), retrying in {}s: {}",
            key,
            failures,
            delay.as_secs(),
            error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {}", resource_key(obj.as_ref()));
            reconcile_fn(ctx, obj).await
        }
    };

    // Debounce batches bursts of status updates; concurrency caps each kind.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    let states = Arc::clone(&reconciler);
    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| {
            match res {
                // Deleted before its requeue fired; drop its backoff sequence
                Err(controller::Error::ObjectNotFound(object)) => {
                    debug!("{} {} is gone", resource_name, object.name);
                    states.reset_backoff(&resource_key_for::<K>(object.namespace.as_deref(), &object.name));
                }
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
                Ok(_) => {}
            }
            futures::future::ready(())
        })
        .await;

    Ok(())
}

/// Watches Kubernetes resources for changes.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    machine_api: Api<Machine>,
    template_api: Api<MachineTemplate>,
    driver_api: Api<MachineDriver>,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        machine_api: Api<Machine>,
        template_api: Api<MachineTemplate>,
        driver_api: Api<MachineDriver>,
    ) -> Self {
        Self {
            reconciler,
            machine_api,
            template_api,
            driver_api,
        }
    }

    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler: Arc<Reconciler>, machine: Arc<Machine>| -> ReconcileFuture {
                Box::pin(async move {
                    let outcome = reconciler.reconcile_machine(&machine).await?;
                    Ok(reconciler.action_for(&resource_key(machine.as_ref()), outcome, Some(RESYNC_INTERVAL)))
                })
            },
            "Machine",
        )
        .await
    }

    pub async fn watch_machine_templates(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.template_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler: Arc<Reconciler>, template: Arc<MachineTemplate>| -> ReconcileFuture {
                Box::pin(async move {
                    let outcome = reconciler.reconcile_machine_template(&template).await?;
                    Ok(reconciler.action_for(&resource_key(template.as_ref()), outcome, Some(RESYNC_INTERVAL)))
                })
            },
            "MachineTemplate",
        )
        .await
    }

    pub async fn watch_machine_drivers(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.driver_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler: Arc<Reconciler>, driver: Arc<MachineDriver>| -> ReconcileFuture {
                Box::pin(async move {
                    let outcome = reconciler.reconcile_machine_driver(&driver).await?;
                    Ok(reconciler.action_for(&resource_key(driver.as_ref()), outcome, None))
                })
            },
            "MachineDriver",
        )
        .await
    }
}
