//! Validating admission webhook
//!
//! Applies the write-time guards to every Machine, MachineTemplate and
//! MachineDriver write before the API server persists it.
//!
//! Routes:
//! - `GET /healthz`
//! - `POST /validate/machines`
//! - `POST /validate/machinetemplates`
//! - `POST /validate/machinedrivers`

mod validate;

use crate::config::TlsFiles;
use crate::error::ControllerError;
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use machine_crds::MachineDriver;
use machine_store::ResourceStore;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the webhook handlers
pub struct WebhookState {
    /// Looked up when a template selects a driver
    pub drivers: Arc<dyn ResourceStore<MachineDriver>>,
    /// Members may modify and delete builtin drivers
    pub privileged_group: String,
}

impl fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookState")
            .field("privileged_group", &self.privileged_group)
            .finish_non_exhaustive()
    }
}

impl WebhookState {
    pub fn new(drivers: Arc<dyn ResourceStore<MachineDriver>>, privileged_group: impl Into<String>) -> Self {
        Self {
            drivers,
            privileged_group: privileged_group.into(),
        }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/validate/machines", post(validate::validate_machines))
        .route("/validate/machinetemplates", post(validate::validate_machine_templates))
        .route("/validate/machinedrivers", post(validate::validate_machine_drivers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve the webhook on `addr` until the server fails
///
/// Without TLS files the router is served over plain HTTP, which the API
/// server only accepts behind a TLS-terminating proxy.
pub async fn serve(addr: SocketAddr, tls: Option<TlsFiles>, state: Arc<WebhookState>) -> Result<(), ControllerError> {
    let app = webhook_router(state);

    match tls {
        Some(files) => {
            let tls_config = RustlsConfig::from_pem_file(&files.cert, &files.key)
                .await
                .map_err(|e| ControllerError::Webhook(format!("TLS config error: {e}")))?;
            info!(addr = %addr, "Starting admission webhook (TLS)");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| ControllerError::Webhook(format!("Server error: {e}")))
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| ControllerError::Webhook(format!("Failed to bind {addr}: {e}")))?;
            info!(addr = %addr, "Starting admission webhook (plain HTTP)");
            axum::serve(listener, app)
                .await
                .map_err(|e| ControllerError::Webhook(format!("Server error: {e}")))
        }
    }
}
