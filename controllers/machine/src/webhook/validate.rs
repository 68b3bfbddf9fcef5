//! Admission handlers
//!
//! Each handler decodes the review, applies the matching guard and answers
//! allowed or denied. A malformed review is answered as invalid; only a
//! failed driver lookup denies for reasons other than the guards.

use super::WebhookState;
use axum::extract::State;
use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Resource;
use machine_crds::{
    validate_driver_delete, validate_driver_update, validate_machine, validate_machine_update, validate_template,
    ClientClass, Machine, MachineDriver, MachineTemplate, ValidationError,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ReviewResponse = Json<AdmissionReview<DynamicObject>>;

/// Decode a review into its request, or answer it as invalid
fn decode<T: Resource>(body: AdmissionReview<T>) -> Result<AdmissionRequest<T>, ReviewResponse> {
    let converted: Result<AdmissionRequest<T>, _> = body.try_into();
    match converted {
        Ok(request) => Ok(request),
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            Err(Json(AdmissionResponse::invalid(e.to_string()).into_review()))
        }
    }
}

/// Turn a guard verdict into an admission response
fn respond<T: Resource>(request: &AdmissionRequest<T>, verdict: Result<(), ValidationError>) -> ReviewResponse {
    let response = AdmissionResponse::from(request);
    let response = match verdict {
        Ok(()) => {
            debug!(uid = %request.uid, name = %request.name, operation = ?request.operation, "Allowed");
            response
        }
        Err(e) => {
            info!(uid = %request.uid, name = %request.name, operation = ?request.operation, "Denied: {}", e);
            response.deny(e.to_string())
        }
    };
    Json(response.into_review())
}

/// Reference syntax on create; immutable fields once initialized
pub async fn validate_machines(Json(body): Json<AdmissionReview<Machine>>) -> ReviewResponse {
    let request = match decode(body) {
        Ok(request) => request,
        Err(invalid) => return invalid,
    };

    let verdict = match (&request.operation, &request.object, &request.old_object) {
        (Operation::Create, Some(new), _) => validate_machine(new),
        (Operation::Update, Some(new), Some(old)) => validate_machine_update(old, new),
        _ => Ok(()),
    };
    respond(&request, verdict)
}

/// Reference syntax and driver selectability
pub async fn validate_machine_templates(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<MachineTemplate>>,
) -> ReviewResponse {
    let request = match decode(body) {
        Ok(request) => request,
        Err(invalid) => return invalid,
    };

    let new = match (&request.operation, &request.object) {
        (Operation::Create | Operation::Update, Some(new)) => new,
        _ => return respond(&request, Ok(())),
    };

    let driver = if new.spec.driver.is_empty() {
        None
    } else {
        match state.drivers.get(None, &new.spec.driver).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!(uid = %request.uid, driver = %new.spec.driver, "Driver lookup failed: {}", e);
                let response = AdmissionResponse::from(&request)
                    .deny(format!("could not look up MachineDriver {}: {e}", new.spec.driver));
                return Json(response.into_review());
            }
        }
    };

    let verdict = validate_template(new, driver.as_ref(), request.old_object.as_ref());
    respond(&request, verdict)
}

/// Builtin driver protection
pub async fn validate_machine_drivers(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<MachineDriver>>,
) -> ReviewResponse {
    let request = match decode(body) {
        Ok(request) => request,
        Err(invalid) => return invalid,
    };

    let groups = request.user_info.groups.as_deref().unwrap_or_default();
    let client = ClientClass::from_groups(groups, &state.privileged_group);

    let verdict = match (&request.operation, &request.object, &request.old_object) {
        (Operation::Update, Some(new), Some(old)) => validate_driver_update(old, new, client),
        (Operation::Delete, _, Some(old)) => validate_driver_delete(old, client),
        _ => Ok(()),
    };
    respond(&request, verdict)
}
