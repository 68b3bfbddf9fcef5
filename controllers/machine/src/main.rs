//! Machine Controller
//!
//! Reconciles the machine provisioning CRDs (`management.cattle.io/v3`):
//! - Machine: resolves its template, cluster and driver, captures the
//!   template snapshot and records progress as conditions
//! - MachineTemplate: tracks whether its driver exists
//! - MachineDriver: validates the driver source and mirrors activation
//!
//! Serves a validating admission webhook that enforces immutable fields,
//! reference syntax and builtin-driver protection at write time.

mod backoff;
mod config;
mod controller;
mod error;
mod provisioner;
mod reconciler;
mod resolver;
#[cfg(test)]
mod test_utils;
mod watcher;
mod webhook;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("a rustls crypto provider is already installed".to_string()))?;

    info!("Starting Machine Controller");

    let config = ControllerConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
