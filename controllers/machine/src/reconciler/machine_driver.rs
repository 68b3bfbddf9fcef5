//! MachineDriver reconciler

use super::{resource_key, Outcome, Reconciler};
use crate::error::ControllerError;
use kube::ResourceExt;
use machine_crds::machine_driver::reason;
use machine_crds::{ensure_condition, ConditionStatus, MachineDriver, MachineDriverConditionType};
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_machine_driver(&self, driver: &MachineDriver) -> Result<Outcome, ControllerError> {
        self.retry_on_conflict(self.drivers.as_ref(), "MachineDriver", driver.clone(), |driver| {
            self.driver_pass(driver)
        })
        .await
    }

    async fn driver_pass(&self, mut driver: MachineDriver) -> Result<Outcome, ControllerError> {
        let name = driver.name_any();
        if driver.metadata.deletion_timestamp.is_some() {
            debug!("MachineDriver {} is being deleted, skipping", name);
            self.reset_backoff(&resource_key(&driver));
            return Ok(Outcome::Steady);
        }

        info!("Reconciling MachineDriver {}", name);
        let original = driver.status.clone();

        match driver.spec.source_problem() {
            None => {
                ensure_condition(&mut driver, MachineDriverConditionType::Validated, ConditionStatus::True, "", None);
            }
            Some(problem) => {
                warn!("MachineDriver {} has an invalid source: {}", name, problem);
                ensure_condition(
                    &mut driver,
                    MachineDriverConditionType::Validated,
                    ConditionStatus::False,
                    reason::INVALID_SOURCE,
                    Some(problem),
                );
            }
        }

        if driver.spec.active {
            ensure_condition(&mut driver, MachineDriverConditionType::Active, ConditionStatus::True, "", None);
        } else {
            ensure_condition(
                &mut driver,
                MachineDriverConditionType::Active,
                ConditionStatus::False,
                reason::DEACTIVATED,
                Some("driver is not offered for new templates".to_string()),
            );
        }

        if driver.status != original {
            debug!("Updating status of MachineDriver {}", name);
            self.drivers.replace_status(&driver).await?;
        }
        Ok(Outcome::Steady)
    }
}
