//! MachineTemplate reconciler

use super::{resource_key, Outcome, Reconciler};
use crate::error::ControllerError;
use crate::resolver::Resolution;
use kube::ResourceExt;
use machine_crds::machine_template::reason;
use machine_crds::{
    ensure_condition, is_condition_true, ConditionStatus, MachineTemplate,
    MachineTemplateConditionType,
};
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_machine_template(&self, template: &MachineTemplate) -> Result<Outcome, ControllerError> {
        self.retry_on_conflict(self.templates.as_ref(), "MachineTemplate", template.clone(), |template| {
            self.template_pass(template)
        })
        .await
    }

    async fn template_pass(&self, mut template: MachineTemplate) -> Result<Outcome, ControllerError> {
        let name = template.name_any();
        let namespace = template.namespace().unwrap_or_default();

        if template.metadata.deletion_timestamp.is_some() {
            debug!("MachineTemplate {}/{} is being deleted, skipping", namespace, name);
            self.reset_backoff(&resource_key(&template));
            return Ok(Outcome::Steady);
        }
        if template.driver_lost() {
            debug!("MachineTemplate {}/{} lost its driver, skipping", namespace, name);
            return Ok(Outcome::Steady);
        }

        info!("Reconciling MachineTemplate {}/{}", namespace, name);

        let original = template.status.clone();
        let resolved_before = is_condition_true(&template, &MachineTemplateConditionType::DriverResolved);
        let driver_name = template.spec.driver.clone();

        let outcome = match self.resolver().driver(&driver_name).await? {
            Resolution::Found(_) => {
                ensure_condition(
                    &mut template,
                    MachineTemplateConditionType::DriverResolved,
                    ConditionStatus::True,
                    "",
                    None,
                );
                Outcome::Steady
            }
            Resolution::NotFound if resolved_before => {
                warn!("MachineDriver {:?} of MachineTemplate {}/{} was removed", driver_name, namespace, name);
                ensure_condition(
                    &mut template,
                    MachineTemplateConditionType::DriverResolved,
                    ConditionStatus::False,
                    reason::DRIVER_REMOVED,
                    Some(format!("machine driver {driver_name:?} no longer exists")),
                );
                Outcome::Steady
            }
            Resolution::NotFound => {
                ensure_condition(
                    &mut template,
                    MachineTemplateConditionType::DriverResolved,
                    ConditionStatus::Unknown,
                    reason::DRIVER_NOT_FOUND,
                    Some(format!("machine driver {driver_name:?} not found")),
                );
                Outcome::Waiting
            }
            Resolution::NotReady(_) if resolved_before => Outcome::Waiting,
            Resolution::NotReady(message) => {
                ensure_condition(
                    &mut template,
                    MachineTemplateConditionType::DriverResolved,
                    ConditionStatus::Unknown,
                    reason::DRIVER_NOT_READY,
                    Some(message),
                );
                Outcome::Waiting
            }
        };

        if template.status != original {
            debug!("Updating status of MachineTemplate {}/{}", namespace, name);
            self.templates.replace_status(&template).await?;
        }
        Ok(outcome)
    }
}
