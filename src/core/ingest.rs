//! Idempotent plan ingestion: create-or-match keyed on the canonical
//! request digest.

use chrono::Utc;
use thiserror::Error;

use super::canonical::request_digest;
use super::plan::{PlanIn, SpecRecord, SpecStatus, initial_plan_record, initial_spec_record};
use crate::store::{Store, StoreError};

/// How an ingestion request resolved.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A new plan was persisted; the caller should trigger spec 0.
    Created { first_spec: SpecRecord },
    /// The plan already exists with a byte-identical canonical payload.
    Idempotent,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("plan {plan_id} already exists with different body")]
    Conflict {
        plan_id: String,
        stored_digest: String,
        incoming_digest: String,
    },
    #[error("plan has no specs")]
    EmptyPlan,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persist a validated plan, or match it against an existing one.
///
/// The digest covers the canonical form of the normalized input, so a
/// retry that only reorders JSON keys or spells an empty list differently
/// still lands on the idempotent path.
pub async fn ingest_plan(store: &Store, plan_in: &PlanIn) -> Result<IngestOutcome, IngestError> {
    let raw_request = serde_json::to_value(plan_in).map_err(StoreError::from)?;
    let digest = request_digest(&raw_request);
    let now = Utc::now();

    let plan = initial_plan_record(plan_in, digest.clone(), raw_request, now);
    let specs: Vec<SpecRecord> = plan_in
        .specs
        .iter()
        .enumerate()
        .map(|(idx, spec_in)| {
            let status = if idx == 0 {
                SpecStatus::Running
            } else {
                SpecStatus::Blocked
            };
            initial_spec_record(spec_in, idx as u32, status, now)
        })
        .collect();
    let Some(first_spec) = specs.first().cloned() else {
        return Err(IngestError::EmptyPlan);
    };

    match store.create_plan_atomic(&plan, &specs).await {
        Ok(()) => Ok(IngestOutcome::Created { first_spec }),
        Err(StoreError::AlreadyExists) => {
            let existing = store.load_plan(&plan_in.id).await?;
            match existing {
                Some(stored) if stored.request_digest == digest => Ok(IngestOutcome::Idempotent),
                Some(stored) => Err(IngestError::Conflict {
                    plan_id: plan_in.id.clone(),
                    stored_digest: stored.request_digest,
                    incoming_digest: digest,
                }),
                // The core never deletes plans, so a vanished document is
                // a store anomaly, not a race we can resolve.
                None => Err(IngestError::Store(StoreError::Unavailable(format!(
                    "plan {} disappeared during ingestion",
                    plan_in.id
                )))),
            }
        }
        Err(err) => Err(err.into()),
    }
}
