//! Controller configuration from environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `WATCH_NAMESPACE` | all namespaces | Namespace for Machines and MachineTemplates |
//! | `WEBHOOK_ADDR` | `0.0.0.0:8443` | Admission webhook listen address |
//! | `WEBHOOK_TLS_CERT` / `WEBHOOK_TLS_KEY` | unset | PEM files; plain HTTP when missing |
//! | `PRIVILEGED_GROUP` | `system:masters` | Group exempt from builtin-driver protection |

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:8443";
const DEFAULT_PRIVILEGED_GROUP: &str = "system:masters";

/// Certificate and key served by the webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Runtime configuration for the controller binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Listen address of the admission webhook
    pub webhook_addr: SocketAddr,
    /// `None` serves plain HTTP
    pub webhook_tls: Option<TlsFiles>,
    /// Group exempt from builtin-driver protection
    pub privileged_group: String,
}

impl ControllerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup` (variable name → value)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let webhook_addr = non_empty("WEBHOOK_ADDR")
            .unwrap_or_else(|| DEFAULT_WEBHOOK_ADDR.to_string())
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("WEBHOOK_ADDR: {e}")))?;

        let webhook_tls = match (non_empty("WEBHOOK_TLS_CERT"), non_empty("WEBHOOK_TLS_KEY")) {
            (Some(cert), Some(key)) => {
                let files = TlsFiles {
                    cert: PathBuf::from(cert),
                    key: PathBuf::from(key),
                };
                if files_exist(&files.cert, &files.key) {
                    Some(files)
                } else {
                    warn!(
                        "TLS files {} / {} not found, serving webhook over plain HTTP",
                        files.cert.display(),
                        files.key.display()
                    );
                    None
                }
            }
            (None, None) => {
                warn!("WEBHOOK_TLS_CERT/WEBHOOK_TLS_KEY not set, serving webhook over plain HTTP");
                None
            }
            _ => {
                return Err(ControllerError::InvalidConfig(
                    "WEBHOOK_TLS_CERT and WEBHOOK_TLS_KEY must be set together".to_string(),
                ));
            }
        };

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            webhook_addr,
            webhook_tls,
            privileged_group: non_empty("PRIVILEGED_GROUP")
                .unwrap_or_else(|| DEFAULT_PRIVILEGED_GROUP.to_string()),
        })
    }

    /// Log the effective configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "  Namespace: {}",
            self.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
        info!("  Webhook address: {}", self.webhook_addr);
        info!("  Webhook TLS: {}", if self.webhook_tls.is_some() { "enabled" } else { "disabled" });
        info!("  Privileged group: {}", self.privileged_group);
    }
}

fn files_exist(cert: &Path, key: &Path) -> bool {
    cert.is_file() && key.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.webhook_addr, "0.0.0.0:8443".parse().unwrap());
        assert_eq!(config.webhook_tls, None);
        assert_eq!(config.privileged_group, "system:masters");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("WATCH_NAMESPACE", "fleet"),
            ("WEBHOOK_ADDR", "127.0.0.1:9443"),
            ("PRIVILEGED_GROUP", "platform-admins"),
        ])
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("fleet"));
        assert_eq!(config.webhook_addr.port(), 9443);
        assert_eq!(config.privileged_group, "platform-admins");
    }

    #[test]
    fn test_empty_namespace_means_all() {
        let config = config(&[("WATCH_NAMESPACE", "  ")]).unwrap();
        assert_eq!(config.watch_namespace, None);
    }

    #[test]
    fn test_invalid_addr_rejected() {
        assert!(matches!(
            config(&[("WEBHOOK_ADDR", "not-an-addr")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_tls_files_fall_back_to_http() {
        let config = config(&[
            ("WEBHOOK_TLS_CERT", "/nonexistent/tls.crt"),
            ("WEBHOOK_TLS_KEY", "/nonexistent/tls.key"),
        ])
        .unwrap();
        assert_eq!(config.webhook_tls, None);
    }

    #[test]
    fn test_half_tls_config_rejected() {
        assert!(matches!(
            config(&[("WEBHOOK_TLS_CERT", "/etc/webhook/tls.crt")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
