//! The orchestration kernel: one status event in, one atomic lifecycle
//! transition out.
//!
//! Everything here runs inside a single store transaction. The decision
//! logic is a closed match over {terminal, intermediate} x {current spec,
//! not} x {last spec, not}; the only state the kernel trusts is what it
//! reads through the transaction, so concurrent deliveries serialize on
//! the store's optimistic commit, not on in-process locks.

use chrono::Utc;
use thiserror::Error;
use tracing::Level;

use super::envelope::StatusEvent;
use super::plan::{HistoryEntry, OverallStatus, SpecStatus};
use super::trigger::TriggerRequest;
use crate::store::{Store, StoreError, Txn};

/// Graceful outcomes of applying one event. All of these map to 204 at
/// the HTTP layer; only errors surface as 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
    OutOfOrder,
    TerminalIgnored,
    MissingPlan,
    MissingSpec,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::OutOfOrder => "out_of_order",
            ApplyOutcome::TerminalIgnored => "terminal_ignored",
            ApplyOutcome::MissingPlan => "missing_plan",
            ApplyOutcome::MissingSpec => "missing_spec",
        }
    }

    /// The structured-log tag and level operators alert on. Ignored
    /// terminal repeats share the `out_of_order` tag but stay
    /// distinguishable through the `outcome` field.
    pub fn log_event(self, event: &StatusEvent, plan_terminal: bool) -> (&'static str, Level) {
        match self {
            ApplyOutcome::Applied => match event.status {
                SpecStatus::Finished if plan_terminal => ("terminal_plan_finished", Level::INFO),
                SpecStatus::Finished => ("terminal_spec_finished", Level::INFO),
                SpecStatus::Failed => ("terminal_spec_failed", Level::WARN),
                SpecStatus::Blocked | SpecStatus::Running => ("non_terminal_update", Level::INFO),
            },
            ApplyOutcome::Duplicate => ("duplicate_message", Level::INFO),
            ApplyOutcome::OutOfOrder => ("out_of_order", Level::ERROR),
            ApplyOutcome::TerminalIgnored => ("out_of_order", Level::WARN),
            ApplyOutcome::MissingPlan => ("missing_plan", Level::WARN),
            ApplyOutcome::MissingSpec => ("missing_spec", Level::WARN),
        }
    }
}

/// What one committed event produced: the outcome, whether the plan
/// reached a terminal state, and at most one deferred trigger to fire
/// after commit.
#[derive(Debug)]
pub struct KernelResult {
    pub outcome: ApplyOutcome,
    pub plan_terminal: bool,
    pub trigger: Option<TriggerRequest>,
}

impl KernelResult {
    fn graceful(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            plan_terminal: false,
            trigger: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Stored state contradicts the lifecycle invariants (e.g. the next
    /// spec was not blocked). The transaction is aborted without commit.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// Apply one decoded status event to its plan, atomically.
pub async fn apply_status_event(
    store: &Store,
    event: &StatusEvent,
) -> Result<KernelResult, KernelError> {
    let event = event.clone();
    store
        .run_transaction(async move |txn: &mut Txn<'_>| apply_in_txn(txn, &event).await)
        .await
}

async fn apply_in_txn(
    txn: &mut Txn<'_>,
    event: &StatusEvent,
) -> Result<KernelResult, KernelError> {
    let now = Utc::now();

    let Some(mut plan) = txn.read_plan(&event.plan_id).await? else {
        return Ok(KernelResult::graceful(ApplyOutcome::MissingPlan));
    };
    let Some(mut spec) = txn.read_spec(&event.plan_id, event.spec_index).await? else {
        return Ok(KernelResult::graceful(ApplyOutcome::MissingSpec));
    };

    // At-least-once delivery: the history inside this transaction is the
    // only dedup authority. Empty ids are exempt by design.
    if !event.message_id.is_empty()
        && spec
            .history
            .iter()
            .any(|entry| entry.message_id == event.message_id)
    {
        return Ok(KernelResult::graceful(ApplyOutcome::Duplicate));
    }

    spec.history.push(HistoryEntry {
        timestamp: event.timestamp.unwrap_or(now),
        received_status: event.status,
        stage: event.stage.clone(),
        details: event.details.clone(),
        correlation_id: event.correlation_id.clone(),
        message_id: event.message_id.clone(),
        raw_snippet: event.raw_snippet.clone(),
    });

    match event.status {
        SpecStatus::Blocked | SpecStatus::Running => {
            // Progress report: stage and timestamps only, never statuses
            // or counters.
            if let Some(stage) = &event.stage {
                spec.current_stage = Some(stage.clone());
            }
            spec.updated_at = now;
            plan.updated_at = now;
            plan.last_event_at = now;
            txn.write_spec(&plan.plan_id, &spec)?;
            txn.write_plan(&plan)?;
            Ok(KernelResult {
                outcome: ApplyOutcome::Applied,
                plan_terminal: false,
                trigger: None,
            })
        }
        SpecStatus::Failed | SpecStatus::Finished => {
            if spec.status.is_terminal() {
                // Terminal transitions are one-way; record the repeat in
                // history and move on.
                txn.write_spec(&plan.plan_id, &spec)?;
                return Ok(KernelResult::graceful(ApplyOutcome::TerminalIgnored));
            }
            if plan.current_spec_index != Some(event.spec_index) {
                // A non-current spec reporting terminal is an error signal
                // about the fleet, not a race to smooth over: audit it,
                // change nothing.
                txn.write_spec(&plan.plan_id, &spec)?;
                return Ok(KernelResult::graceful(ApplyOutcome::OutOfOrder));
            }

            spec.updated_at = now;
            plan.updated_at = now;
            plan.last_event_at = now;

            if event.status == SpecStatus::Failed {
                spec.status = SpecStatus::Failed;
                plan.overall_status = OverallStatus::Failed;
                plan.current_spec_index = None;
                txn.write_spec(&plan.plan_id, &spec)?;
                txn.write_plan(&plan)?;
                return Ok(KernelResult {
                    outcome: ApplyOutcome::Applied,
                    plan_terminal: true,
                    trigger: None,
                });
            }

            spec.status = SpecStatus::Finished;
            plan.completed_specs += 1;

            if event.spec_index + 1 == plan.total_specs {
                plan.overall_status = OverallStatus::Finished;
                plan.current_spec_index = None;
                txn.write_spec(&plan.plan_id, &spec)?;
                txn.write_plan(&plan)?;
                return Ok(KernelResult {
                    outcome: ApplyOutcome::Applied,
                    plan_terminal: true,
                    trigger: None,
                });
            }

            let next_index = event.spec_index + 1;
            let Some(mut next) = txn.read_spec(&plan.plan_id, next_index).await? else {
                return Err(KernelError::Invariant(format!(
                    "spec {next_index} missing while advancing plan {}",
                    plan.plan_id
                )));
            };
            if next.status != SpecStatus::Blocked {
                return Err(KernelError::Invariant(format!(
                    "spec {next_index} of plan {} should be blocked, found {}",
                    plan.plan_id,
                    next.status.as_str()
                )));
            }
            next.status = SpecStatus::Running;
            next.updated_at = now;
            plan.current_spec_index = Some(next_index);

            txn.write_spec(&plan.plan_id, &spec)?;
            txn.write_spec(&plan.plan_id, &next)?;
            txn.write_plan(&plan)?;
            Ok(KernelResult {
                outcome: ApplyOutcome::Applied,
                plan_terminal: false,
                trigger: Some(TriggerRequest {
                    plan_id: plan.plan_id.clone(),
                    spec_index: next_index,
                    spec: next,
                }),
            })
        }
    }
}
