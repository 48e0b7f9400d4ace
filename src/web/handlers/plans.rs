//! Plan ingestion and status-query endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::super::AppState;
use crate::core::ingest::{IngestError, IngestOutcome, ingest_plan};
use crate::core::plan::{FieldError, PlanIn};
use crate::core::projection::project_plan;
use crate::core::trigger::TriggerRequest;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct PlanCreateResponse {
    pub plan_id: String,
    pub status: &'static str,
}

fn validation_response(errors: Vec<FieldError>) -> Response {
    let detail: Vec<_> = errors
        .into_iter()
        .map(|err| json!({ "loc": err.loc, "msg": err.msg, "type": "value_error" }))
        .collect();
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

fn store_error_response(err: &StoreError) -> Response {
    let status = if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "detail": "internal server error" }))).into_response()
}

pub async fn create_plan(State(state): State<AppState>, body: Bytes) -> Response {
    // The body is parsed by hand so schema problems map to 422 with a
    // locatable error structure instead of the extractor's defaults.
    let plan_in: PlanIn = match serde_json::from_slice(&body) {
        Ok(plan_in) => plan_in,
        Err(err) => {
            return validation_response(vec![FieldError {
                loc: vec!["body".to_string()],
                msg: err.to_string(),
            }]);
        }
    };
    if let Err(errors) = plan_in.validate() {
        return validation_response(errors);
    }

    info!(
        plan_id = %plan_in.id,
        spec_count = plan_in.specs.len(),
        "plan ingestion request received"
    );

    match ingest_plan(&state.store, &plan_in).await {
        Ok(IngestOutcome::Created { first_spec }) => {
            info!(event_type = "plan_created", plan_id = %plan_in.id, "plan created");
            // The fleet discovers the initial spec through the same
            // trigger path as every later one.
            state.trigger.fire(TriggerRequest {
                plan_id: plan_in.id.clone(),
                spec_index: 0,
                spec: first_spec,
            });
            (
                StatusCode::CREATED,
                Json(PlanCreateResponse {
                    plan_id: plan_in.id,
                    status: "running",
                }),
            )
                .into_response()
        }
        Ok(IngestOutcome::Idempotent) => {
            info!(event_type = "plan_idempotent", plan_id = %plan_in.id, "idempotent ingestion");
            (
                StatusCode::OK,
                Json(PlanCreateResponse {
                    plan_id: plan_in.id,
                    status: "running",
                }),
            )
                .into_response()
        }
        Err(IngestError::Conflict {
            plan_id,
            stored_digest,
            incoming_digest,
        }) => {
            warn!(
                event_type = "plan_conflict",
                plan_id = %plan_id,
                stored_digest = %stored_digest,
                incoming_digest = %incoming_digest,
                "plan ingestion conflict"
            );
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "detail": format!("plan {plan_id} already exists with different body")
                })),
            )
                .into_response()
        }
        Err(IngestError::EmptyPlan) => validation_response(vec![FieldError {
            loc: vec!["specs".to_string()],
            msg: "at least one specification must be provided".to_string(),
        }]),
        Err(IngestError::Store(err)) => {
            error!(plan_id = %plan_in.id, error = %err, "plan ingestion failed");
            store_error_response(&err)
        }
    }
}

fn default_include_stage() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default = "default_include_stage")]
    pub include_stage: bool,
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match project_plan(&state.store, &plan_id, query.include_stage).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("plan {plan_id} not found") })),
        )
            .into_response(),
        Err(err) => {
            error!(plan_id = %plan_id, error = %err, "plan status query failed");
            store_error_response(&err)
        }
    }
}
