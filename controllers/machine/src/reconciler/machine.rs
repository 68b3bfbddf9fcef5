//! Machine reconciler
//!
//! Walks a machine through `Initialized → Provisioned → Saved → Ready`.
//! Reference resolution runs first and is persisted before any provisioner
//! call, so a crash between the two never loses the snapshot.

use super::{resource_key, Outcome, Reconciler, CONFLICT_ATTEMPTS};
use crate::error::ControllerError;
use crate::provisioner::{ProvisionError, ProvisionRequest, ProvisionedNode, Provisioner};
use crate::resolver::Resolution;
use kube::ResourceExt;
use machine_crds::machine::reason;
use machine_crds::{
    capture_template_snapshot, ensure_condition, is_condition_true, template_drifted, ConditionStatus, Machine,
    MachineConditionType, MachineStatus,
};
use std::ops::ControlFlow;
use tracing::{debug, error, info, warn};

/// Whether the reference stage let the pass continue
enum Progress {
    Continue,
    Stop(Outcome),
}

impl Reconciler {
    pub async fn reconcile_machine(&self, machine: &Machine) -> Result<Outcome, ControllerError> {
        self.retry_on_conflict(self.machines.as_ref(), "Machine", machine.clone(), |machine| {
            self.machine_pass(machine)
        })
        .await
    }

    async fn machine_pass(&self, mut machine: Machine) -> Result<Outcome, ControllerError> {
        let name = machine.name_any();
        let namespace = machine.namespace().unwrap_or_default();

        if machine.metadata.deletion_timestamp.is_some() {
            debug!("Machine {}/{} is being deleted, skipping", namespace, name);
            self.reset_backoff(&resource_key(&machine));
            return Ok(Outcome::Steady);
        }
        if let Some(failure) = machine.permanent_failure() {
            debug!(
                "Machine {}/{} failed permanently ({}), skipping",
                namespace, name, failure.reason
            );
            return Ok(Outcome::Steady);
        }

        info!("Reconciling Machine {}/{}", namespace, name);

        let original = machine.status.clone();
        let progress = self.resolve_machine_references(&mut machine).await?;
        let machine = self.save_machine_status(machine, original.as_ref()).await?;

        match (progress, self.provisioner.as_deref()) {
            (Progress::Stop(outcome), _) => Ok(outcome),
            (Progress::Continue, None) => Ok(Outcome::Steady),
            (Progress::Continue, Some(provisioner)) => self.drive_provisioner(machine, provisioner).await,
        }
    }

    /// Resolve template, cluster and driver; capture the snapshot
    async fn resolve_machine_references(&self, machine: &mut Machine) -> Result<Progress, ControllerError> {
        let resolver = self.resolver();
        let initialized = machine.is_initialized();
        let template_name = machine.spec.machine_template_name.clone();

        let template = match resolver.machine_template(machine).await? {
            Resolution::Found(template) => template,
            Resolution::NotFound if initialized => {
                warn!(
                    "MachineTemplate {:?} of Machine {} was removed",
                    template_name,
                    machine.name_any()
                );
                ensure_condition(
                    machine,
                    MachineConditionType::Ready,
                    ConditionStatus::False,
                    reason::TEMPLATE_REMOVED,
                    Some(format!("machine template {template_name:?} no longer exists")),
                );
                return Ok(Progress::Stop(Outcome::Steady));
            }
            Resolution::NotFound => {
                let message = if template_name.is_empty() {
                    "no machine template named".to_string()
                } else {
                    format!("machine template {template_name:?} not found")
                };
                ensure_condition(
                    machine,
                    MachineConditionType::Initialized,
                    ConditionStatus::Unknown,
                    reason::TEMPLATE_NOT_FOUND,
                    Some(message),
                );
                return Ok(Progress::Stop(Outcome::Waiting));
            }
            Resolution::NotReady(_) if initialized => return Ok(Progress::Stop(Outcome::Waiting)),
            Resolution::NotReady(message) => {
                ensure_condition(
                    machine,
                    MachineConditionType::Initialized,
                    ConditionStatus::Unknown,
                    reason::TEMPLATE_NOT_READY,
                    Some(message),
                );
                return Ok(Progress::Stop(Outcome::Waiting));
            }
        };

        let cluster_name = machine.spec.requested_cluster_name.clone();
        if !cluster_name.is_empty() {
            match resolver.cluster(&cluster_name).await? {
                Resolution::Found(_) => {}
                Resolution::NotFound if initialized => {
                    warn!("Cluster {:?} of Machine {} was removed", cluster_name, machine.name_any());
                    ensure_condition(
                        machine,
                        MachineConditionType::Ready,
                        ConditionStatus::False,
                        reason::CLUSTER_REMOVED,
                        Some(format!("cluster {cluster_name:?} no longer exists")),
                    );
                    return Ok(Progress::Stop(Outcome::Steady));
                }
                Resolution::NotFound => {
                    ensure_condition(
                        machine,
                        MachineConditionType::Initialized,
                        ConditionStatus::Unknown,
                        reason::CLUSTER_NOT_FOUND,
                        Some(format!("cluster {cluster_name:?} not found")),
                    );
                    return Ok(Progress::Stop(Outcome::Waiting));
                }
                Resolution::NotReady(_) if initialized => return Ok(Progress::Stop(Outcome::Waiting)),
                Resolution::NotReady(message) => {
                    ensure_condition(
                        machine,
                        MachineConditionType::Initialized,
                        ConditionStatus::Unknown,
                        reason::CLUSTER_NOT_READY,
                        Some(message),
                    );
                    return Ok(Progress::Stop(Outcome::Waiting));
                }
            }
        }

        ensure_condition(
            machine,
            MachineConditionType::Initialized,
            ConditionStatus::True,
            "",
            None,
        );
        machine.status.get_or_insert_with(Default::default).cluster_name = cluster_name;

        // A provisioned machine keeps the driver it was built with.
        let provisioned = machine.is_provisioned();
        let driver_name = match machine.template_snapshot() {
            Some(snapshot) if provisioned => snapshot.driver.clone(),
            _ => template.spec.driver.clone(),
        };

        // A template that lost its driver stays broken, even if the name is reused.
        if !provisioned && template.driver_lost() {
            ensure_condition(
                machine,
                MachineConditionType::Provisioned,
                ConditionStatus::False,
                reason::TEMPLATE_DRIVER_REMOVED,
                Some(format!("machine template {template_name:?} lost its driver {driver_name:?}")),
            );
            return Ok(Progress::Stop(Outcome::Steady));
        }

        match resolver.driver(&driver_name).await? {
            Resolution::Found(driver) => {
                if !driver.is_active() {
                    debug!(
                        "MachineDriver {} is inactive; Machine {} is not affected",
                        driver_name,
                        machine.name_any()
                    );
                }
            }
            Resolution::NotFound if provisioned => {
                warn!("MachineDriver {:?} of Machine {} was removed", driver_name, machine.name_any());
                ensure_condition(
                    machine,
                    MachineConditionType::Ready,
                    ConditionStatus::False,
                    reason::DRIVER_REMOVED,
                    Some(format!("machine driver {driver_name:?} no longer exists")),
                );
                return Ok(Progress::Stop(Outcome::Steady));
            }
            Resolution::NotFound => {
                ensure_condition(
                    machine,
                    MachineConditionType::Provisioned,
                    ConditionStatus::Unknown,
                    reason::DRIVER_NOT_FOUND,
                    Some(format!("machine driver {driver_name:?} not found")),
                );
                return Ok(Progress::Stop(Outcome::Waiting));
            }
            Resolution::NotReady(_) if provisioned => return Ok(Progress::Stop(Outcome::Waiting)),
            Resolution::NotReady(message) => {
                ensure_condition(
                    machine,
                    MachineConditionType::Provisioned,
                    ConditionStatus::Unknown,
                    reason::DRIVER_NOT_READY,
                    Some(message),
                );
                return Ok(Progress::Stop(Outcome::Waiting));
            }
        }

        if capture_template_snapshot(machine, &template.spec) {
            info!(
                "Captured MachineTemplate {} into Machine {}",
                template.name_any(),
                machine.name_any()
            );
        } else if template_drifted(machine, &template.spec) {
            debug!(
                "MachineTemplate {} changed since Machine {} was provisioned",
                template.name_any(),
                machine.name_any()
            );
        }
        ensure_condition(
            machine,
            MachineConditionType::Provisioned,
            ConditionStatus::True,
            "",
            None,
        );

        Ok(Progress::Continue)
    }

    /// Provision the node if needed, then observe it
    async fn drive_provisioner(
        &self,
        machine: Machine,
        provisioner: &dyn Provisioner,
    ) -> Result<Outcome, ControllerError> {
        let mut machine = if is_condition_true(&machine, &MachineConditionType::Saved) {
            machine
        } else {
            match self.provision_machine(machine, provisioner).await? {
                ControlFlow::Continue(stored) => stored,
                ControlFlow::Break(outcome) => return Ok(outcome),
            }
        };

        let original = machine.status.clone();
        let outcome = observe_node(&mut machine, provisioner).await;
        self.save_machine_status(machine, original.as_ref()).await?;
        Ok(outcome)
    }

    /// Call the provisioner and persist its result before anything else
    ///
    /// A created node is recorded by its own write, so a stale copy never
    /// sends the pass back through `provision()`.
    async fn provision_machine(
        &self,
        mut machine: Machine,
        provisioner: &dyn Provisioner,
    ) -> Result<ControlFlow<Outcome, Machine>, ControllerError> {
        let Some(request) = provision_request(&machine) else {
            return Ok(ControlFlow::Break(Outcome::Waiting));
        };

        match provisioner.provision(&request).await {
            Ok(node) => {
                info!("Provisioned node {} for Machine {}", node.node_name, request.machine_name);
                match self.record_provisioned(machine, &node).await? {
                    Some(stored) => Ok(ControlFlow::Continue(stored)),
                    None => Ok(ControlFlow::Break(Outcome::Steady)),
                }
            }
            Err(e) => {
                warn!("Provisioning Machine {} failed: {}", request.machine_name, e);
                let original = machine.status.clone();
                let (status, why) = provision_failure(&e);
                ensure_condition(&mut machine, MachineConditionType::Saved, status, why, Some(e.to_string()));
                self.save_machine_status(machine, original.as_ref()).await?;
                Ok(ControlFlow::Break(Outcome::Waiting))
            }
        }
    }

    /// Write `Saved=True` and the node details, re-reading on conflict
    ///
    /// Returns `None` when the machine was deleted while provisioning.
    async fn record_provisioned(
        &self,
        mut machine: Machine,
        node: &ProvisionedNode,
    ) -> Result<Option<Machine>, ControllerError> {
        let namespace = machine.namespace();
        let name = machine.name_any();

        let mut attempt = 1;
        loop {
            apply_provisioned(&mut machine, node);
            match self.machines.replace_status(&machine).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(e) if e.is_not_found() => {
                    warn!("Machine {} was removed after node {} was provisioned", name, node.node_name);
                    self.reset_backoff(&resource_key(&machine));
                    return Ok(None);
                }
                Err(e) if e.is_retryable() && attempt < CONFLICT_ATTEMPTS => {
                    warn!(
                        "Conflict recording node {} on Machine {} (attempt {}/{}): {}",
                        node.node_name, name, attempt, CONFLICT_ATTEMPTS, e
                    );
                    attempt += 1;
                    match self.machines.get(namespace.as_deref(), &name).await? {
                        Some(latest) => machine = latest,
                        None => {
                            warn!("Machine {} was removed after node {} was provisioned", name, node.node_name);
                            self.reset_backoff(&resource_key(&machine));
                            return Ok(None);
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    error!("Node {} of Machine {} could not be recorded: {}", node.node_name, name, e);
                    return Err(ControllerError::ConflictRetriesExhausted {
                        kind: "Machine",
                        name,
                        attempts: CONFLICT_ATTEMPTS,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write status if the pass changed it; returns the stored machine
    async fn save_machine_status(
        &self,
        machine: Machine,
        original: Option<&MachineStatus>,
    ) -> Result<Machine, ControllerError> {
        if machine.status.as_ref() == original {
            return Ok(machine);
        }
        debug!("Updating status of Machine {}", machine.name_any());
        Ok(self.machines.replace_status(&machine).await?)
    }
}

/// Copy a provisioned node onto the machine and mark it `Saved`
fn apply_provisioned(machine: &mut Machine, node: &ProvisionedNode) {
    let status = machine.status.get_or_insert_with(Default::default);
    status.node_name = node.node_name.clone();
    status.node_config = Some(node.node_config.clone());
    status.ssh_user = node.ssh_user.clone();
    status.machine_driver_config = node.driver_config.clone();
    ensure_condition(machine, MachineConditionType::Saved, ConditionStatus::True, "", None);
}

/// Record the observed node state; `Ready` follows the observation
async fn observe_node(machine: &mut Machine, provisioner: &dyn Provisioner) -> Outcome {
    let node_name = machine
        .status
        .as_ref()
        .map(|status| status.node_name.clone())
        .unwrap_or_default();
    match provisioner.observe(&node_name).await {
        Ok(Some(observation)) => {
            let status = machine.status.get_or_insert_with(Default::default);
            status.node_status = Some(observation.node_status);
            status.requested = observation.requested;
            status.limits = observation.limits;
            if observation.ready {
                ensure_condition(machine, MachineConditionType::Ready, ConditionStatus::True, "", None);
                Outcome::Steady
            } else {
                ensure_condition(
                    machine,
                    MachineConditionType::Ready,
                    ConditionStatus::False,
                    reason::NODE_NOT_READY,
                    observation.message,
                );
                Outcome::Waiting
            }
        }
        Ok(None) => {
            ensure_condition(
                machine,
                MachineConditionType::Ready,
                ConditionStatus::Unknown,
                reason::NODE_NOT_FOUND,
                Some(format!("node {node_name:?} not found")),
            );
            Outcome::Waiting
        }
        Err(e) => {
            warn!("Observing node {} failed: {}", node_name, e);
            let (status, why) = match e {
                ProvisionError::Timeout(_) => (ConditionStatus::Unknown, reason::DRIVER_TIMEOUT),
                ProvisionError::Failed(_) => (ConditionStatus::False, reason::NODE_NOT_READY),
            };
            ensure_condition(machine, MachineConditionType::Ready, status, why, Some(e.to_string()));
            Outcome::Waiting
        }
    }
}

/// Condition status and reason recorded for a failed provisioning call
fn provision_failure(error: &ProvisionError) -> (ConditionStatus, &'static str) {
    match error {
        ProvisionError::Timeout(_) => (ConditionStatus::Unknown, reason::DRIVER_TIMEOUT),
        ProvisionError::Failed(_) => (ConditionStatus::False, reason::PROVISION_FAILED),
    }
}

/// Build the provisioner request from the machine's spec and snapshot
fn provision_request(machine: &Machine) -> Option<ProvisionRequest> {
    let template = machine.template_snapshot()?.clone();
    let hostname = if machine.spec.requested_hostname.is_empty() {
        machine.name_any()
    } else {
        machine.spec.requested_hostname.clone()
    };
    Some(ProvisionRequest {
        namespace: machine.namespace(),
        machine_name: machine.name_any(),
        hostname,
        roles: machine.spec.requested_roles.clone(),
        driver: template.driver.clone(),
        template,
    })
}
