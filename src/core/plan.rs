//! Plan and spec records, status enums, and ingestion input models.
//!
//! Records are what the store persists; input models are what the HTTP
//! surface accepts. Specs never exist without their plan and are immutable
//! after creation apart from `status`, `current_stage`, timestamps, and the
//! append-only `history`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a single spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    Blocked,
    Running,
    Finished,
    Failed,
}

impl SpecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecStatus::Blocked => "blocked",
            SpecStatus::Running => "running",
            SpecStatus::Finished => "finished",
            SpecStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "blocked" => Some(SpecStatus::Blocked),
            "running" => Some(SpecStatus::Running),
            "finished" => Some(SpecStatus::Finished),
            "failed" => Some(SpecStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses advance the plan state machine; the rest only
    /// update stage and history.
    pub fn is_terminal(self) -> bool {
        matches!(self, SpecStatus::Finished | SpecStatus::Failed)
    }
}

/// Lifecycle state of a whole plan. Plans are never `blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Running,
    Finished,
    Failed,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Running => "running",
            OverallStatus::Finished => "finished",
            OverallStatus::Failed => "failed",
        }
    }
}

/// One append-only audit entry on a spec. Entries are never modified or
/// removed once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub received_status: SpecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Sender-assigned delivery id. Empty when the sender did not assign
    /// one; empty ids are exempt from deduplication.
    #[serde(default)]
    pub message_id: String,
    /// Decoded inbound payload, truncated to [`RAW_SNIPPET_MAX_BYTES`].
    pub raw_snippet: String,
}

/// Upper bound on the payload snippet recorded in history entries.
pub const RAW_SNIPPET_MAX_BYTES: usize = 1000;

/// Persistent record for one spec, keyed by (plan_id, spec_index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRecord {
    pub spec_index: u32,
    pub purpose: String,
    pub vision: String,
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub dont: Vec<String>,
    #[serde(default)]
    pub nice: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub status: SpecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Persistent record for one plan, keyed by plan_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan_id: String,
    pub overall_status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_specs: u32,
    pub completed_specs: u32,
    pub current_spec_index: Option<u32>,
    pub last_event_at: DateTime<Utc>,
    /// Hex SHA-256 of the canonicalized creation payload.
    pub request_digest: String,
    /// Canonical creation payload, retained for audit and idempotency
    /// comparison.
    pub raw_request: serde_json::Value,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One spec in an ingestion request. The four list fields accept `null`,
/// an empty list, or omission interchangeably and normalize to `[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecIn {
    pub purpose: String,
    pub vision: String,
    #[serde(default, deserialize_with = "nullable_list")]
    pub must: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub dont: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub nice: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub assumptions: Vec<String>,
}

/// An ingestion request: a plan id plus at least one spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanIn {
    pub id: String,
    pub specs: Vec<SpecIn>,
}

/// A single field-level validation failure, locatable in the request body.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
}

impl FieldError {
    fn new(loc: Vec<String>, msg: impl Into<String>) -> Self {
        Self {
            loc,
            msg: msg.into(),
        }
    }
}

impl PlanIn {
    /// Validate the ingestion contract: UUID id, at least one spec, and
    /// non-empty purpose/vision on every spec.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if Uuid::parse_str(&self.id).is_err() {
            errors.push(FieldError::new(
                vec!["id".into()],
                format!("invalid UUID string: {}", self.id),
            ));
        }

        if self.specs.is_empty() {
            errors.push(FieldError::new(
                vec!["specs".into()],
                "at least one specification must be provided",
            ));
        }

        for (idx, spec) in self.specs.iter().enumerate() {
            if spec.purpose.trim().is_empty() {
                errors.push(FieldError::new(
                    vec!["specs".into(), idx.to_string(), "purpose".into()],
                    "purpose must be a non-empty string",
                ));
            }
            if spec.vision.trim().is_empty() {
                errors.push(FieldError::new(
                    vec!["specs".into(), idx.to_string(), "vision".into()],
                    "vision must be a non-empty string",
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Build the initial spec record for a freshly ingested plan. Spec 0
/// starts `running`; later specs start `blocked`.
pub fn initial_spec_record(
    spec_in: &SpecIn,
    spec_index: u32,
    status: SpecStatus,
    now: DateTime<Utc>,
) -> SpecRecord {
    SpecRecord {
        spec_index,
        purpose: spec_in.purpose.clone(),
        vision: spec_in.vision.clone(),
        must: spec_in.must.clone(),
        dont: spec_in.dont.clone(),
        nice: spec_in.nice.clone(),
        assumptions: spec_in.assumptions.clone(),
        status,
        current_stage: None,
        created_at: now,
        updated_at: now,
        history: Vec::new(),
    }
}

/// Build the initial plan record: `running`, zero completed, spec 0 current.
pub fn initial_plan_record(
    plan_in: &PlanIn,
    request_digest: String,
    raw_request: serde_json::Value,
    now: DateTime<Utc>,
) -> PlanRecord {
    PlanRecord {
        plan_id: plan_in.id.clone(),
        overall_status: OverallStatus::Running,
        created_at: now,
        updated_at: now,
        total_specs: plan_in.specs.len() as u32,
        completed_specs: 0,
        current_spec_index: Some(0),
        last_event_at: now,
        request_digest,
        raw_request,
    }
}
