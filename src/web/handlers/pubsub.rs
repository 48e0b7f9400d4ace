//! Status-event webhook: authenticate, decode, run the kernel, fire the
//! deferred trigger.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{Level, error, info, warn};

use super::super::AppState;
use crate::core::envelope::decode_push_envelope;
use crate::core::kernel::{KernelError, apply_status_event};

pub async fn spec_status_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Authentication comes before any parsing of the payload.
    if !state.auth.authenticate(&headers) {
        warn!("unauthenticated status event rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "invalid or missing authentication" })),
        )
            .into_response();
    }

    let event = match decode_push_envelope(&body) {
        Ok(event) => event,
        Err(err) => {
            info!(error = %err, "undecodable status event rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "invalid message payload" })),
            )
                .into_response();
        }
    };

    match apply_status_event(&state.store, &event).await {
        Ok(result) => {
            let (event_type, level) = result.outcome.log_event(&event, result.plan_terminal);
            let outcome = result.outcome.as_str();
            if level == Level::ERROR {
                error!(
                    event_type,
                    outcome,
                    plan_id = %event.plan_id,
                    spec_index = event.spec_index,
                    message_id = %event.message_id,
                    status = event.status.as_str(),
                    "status event processed"
                );
            } else if level == Level::WARN {
                warn!(
                    event_type,
                    outcome,
                    plan_id = %event.plan_id,
                    spec_index = event.spec_index,
                    message_id = %event.message_id,
                    status = event.status.as_str(),
                    "status event processed"
                );
            } else {
                info!(
                    event_type,
                    outcome,
                    plan_id = %event.plan_id,
                    spec_index = event.spec_index,
                    message_id = %event.message_id,
                    status = event.status.as_str(),
                    "status event processed"
                );
            }

            // The transition is committed; trigger failures can only be
            // logged, never surfaced.
            if let Some(request) = result.trigger {
                state.trigger.fire(request);
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(KernelError::Invariant(message)) => {
            error!(
                plan_id = %event.plan_id,
                spec_index = event.spec_index,
                message_id = %event.message_id,
                error = %message,
                "invariant violation while applying status event"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "internal server error" })),
            )
                .into_response()
        }
        Err(KernelError::Store(err)) => {
            error!(
                plan_id = %event.plan_id,
                spec_index = event.spec_index,
                message_id = %event.message_id,
                error = %err,
                "store failure while applying status event"
            );
            let status = if err.is_transient() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(json!({ "detail": "internal server error" }))).into_response()
        }
    }
}
