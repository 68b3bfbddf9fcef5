//! Template snapshot capture
//!
//! When a machine is provisioned, the spec of its template is copied into
//! `status.machineTemplateSpec`. The copy is owned by the machine, so later
//! edits to the template, or its deletion, never change what the machine was
//! built from.

use crate::machine::Machine;
use crate::machine_template::MachineTemplateSpec;

/// Capture `template` into the machine's status unless already captured
///
/// Returns `true` when a snapshot was written. An existing snapshot is never
/// overwritten.
pub fn capture_template_snapshot(machine: &mut Machine, template: &MachineTemplateSpec) -> bool {
    let status = machine.status.get_or_insert_with(Default::default);
    if status.machine_template_spec.is_some() {
        return false;
    }
    status.machine_template_spec = Some(template.clone());
    true
}

/// Whether the live template differs from what the machine was built from
///
/// `false` when nothing was captured yet.
pub fn template_drifted(machine: &Machine, live: &MachineTemplateSpec) -> bool {
    machine
        .template_snapshot()
        .is_some_and(|snapshot| snapshot != live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineSpec;
    use crate::machine_template::MachineTemplate;

    fn tpl_a() -> MachineTemplate {
        MachineTemplate::new(
            "tpl-a",
            MachineTemplateSpec {
                display_name: "Small".to_string(),
                description: "2 vCPU".to_string(),
                driver: "amazonec2".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_snapshot_isolated_from_template_edits() {
        let mut template = tpl_a();
        let mut machine = Machine::new("m-1", MachineSpec::default());

        assert!(capture_template_snapshot(&mut machine, &template.spec));
        template.spec.description = "4 vCPU".to_string();

        let snapshot = machine.template_snapshot().unwrap();
        assert_eq!(snapshot.description, "2 vCPU");
        assert!(template_drifted(&machine, &template.spec));
    }

    #[test]
    fn test_snapshot_never_overwritten() {
        let template = tpl_a();
        let mut machine = Machine::new("m-1", MachineSpec::default());
        capture_template_snapshot(&mut machine, &template.spec);

        let mut edited = template.spec.clone();
        edited.driver = "vmwarevsphere".to_string();
        assert!(!capture_template_snapshot(&mut machine, &edited));
        assert_eq!(machine.template_snapshot().unwrap().driver, "amazonec2");
    }

    #[test]
    fn test_no_drift_without_snapshot() {
        let machine = Machine::new("m-1", MachineSpec::default());
        assert!(!template_drifted(&machine, &tpl_a().spec));
    }
}
