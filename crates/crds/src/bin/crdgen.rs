//! Print the Machine, MachineTemplate and MachineDriver CRD manifests as YAML

use anyhow::Context;
use kube::CustomResourceExt;
use machine_crds::{Machine, MachineDriver, MachineTemplate};

fn main() -> anyhow::Result<()> {
    let crds = [
        ("MachineDriver", MachineDriver::crd()),
        ("MachineTemplate", MachineTemplate::crd()),
        ("Machine", Machine::crd()),
    ];

    for (kind, crd) in crds {
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("Failed to serialize {kind} CRD"))?;
        println!("---");
        print!("{yaml}");
    }
    Ok(())
}
