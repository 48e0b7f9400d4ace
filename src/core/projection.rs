//! Lightweight external status view of a plan.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::plan::{OverallStatus, SpecStatus};
use crate::store::{Store, StoreError};

#[derive(Debug, Serialize)]
pub struct SpecStatusView {
    pub spec_index: u32,
    pub status: SpecStatus,
    /// Present (possibly null) when the caller asked for stages, omitted
    /// otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PlanStatusView {
    pub plan_id: String,
    pub overall_status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_specs: u32,
    pub completed_specs: u32,
    pub current_spec_index: Option<u32>,
    pub specs: Vec<SpecStatusView>,
}

/// Build the status view for a plan, or `None` when it does not exist.
///
/// `completed_specs` and `current_spec_index` are recomputed from the spec
/// list rather than read off the plan record, so a desynchronized counter
/// can never reach a caller.
pub async fn project_plan(
    store: &Store,
    plan_id: &str,
    include_stage: bool,
) -> Result<Option<PlanStatusView>, StoreError> {
    let Some(plan) = store.load_plan(plan_id).await? else {
        return Ok(None);
    };
    let specs = store.load_specs(plan_id).await?;

    let completed_specs = specs
        .iter()
        .filter(|spec| spec.status == SpecStatus::Finished)
        .count() as u32;
    let current_spec_index = specs
        .iter()
        .find(|spec| spec.status == SpecStatus::Running)
        .map(|spec| spec.spec_index);

    let spec_views = specs
        .into_iter()
        .map(|spec| SpecStatusView {
            spec_index: spec.spec_index,
            status: spec.status,
            stage: include_stage.then_some(spec.current_stage),
            updated_at: spec.updated_at,
        })
        .collect();

    Ok(Some(PlanStatusView {
        plan_id: plan.plan_id,
        overall_status: plan.overall_status,
        created_at: plan.created_at,
        updated_at: plan.updated_at,
        total_specs: plan.total_specs,
        completed_specs,
        current_spec_index,
        specs: spec_views,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::StatusEvent;
    use crate::core::ingest::ingest_plan;
    use crate::core::kernel::apply_status_event;
    use crate::core::plan::{PlanIn, SpecIn};

    const PID: &str = "55555555-5555-5555-5555-555555555555";

    async fn seeded_store(spec_count: usize) -> Store {
        let store = Store::in_memory();
        let plan_in = PlanIn {
            id: PID.to_string(),
            specs: (0..spec_count)
                .map(|i| SpecIn {
                    purpose: format!("p{i}"),
                    vision: format!("v{i}"),
                    must: Vec::new(),
                    dont: Vec::new(),
                    nice: Vec::new(),
                    assumptions: Vec::new(),
                })
                .collect(),
        };
        ingest_plan(&store, &plan_in).await.unwrap();
        store
    }

    fn stage_event(stage: &str) -> StatusEvent {
        StatusEvent {
            plan_id: PID.to_string(),
            spec_index: 0,
            status: SpecStatus::Running,
            stage: Some(stage.to_string()),
            details: None,
            correlation_id: None,
            timestamp: None,
            message_id: "m-stage".to_string(),
            raw_snippet: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_plan_projects_to_none() {
        let store = Store::in_memory();
        assert!(project_plan(&store, PID, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_plan_projects_initial_state() {
        let store = seeded_store(3).await;
        let view = project_plan(&store, PID, true).await.unwrap().unwrap();
        assert_eq!(view.overall_status, OverallStatus::Running);
        assert_eq!(view.total_specs, 3);
        assert_eq!(view.completed_specs, 0);
        assert_eq!(view.current_spec_index, Some(0));
        assert_eq!(view.specs.len(), 3);
        assert_eq!(view.specs[0].status, SpecStatus::Running);
        assert_eq!(view.specs[0].stage, Some(None));
    }

    #[tokio::test]
    async fn counters_are_recomputed_from_specs() {
        let store = seeded_store(2).await;
        // Corrupt the stored counter; the projection must not trust it.
        let mut plan = store.load_plan(PID).await.unwrap().unwrap();
        plan.completed_specs = 9;
        plan.current_spec_index = Some(7);
        store
            .run_transaction::<_, StoreError, _>(async |txn: &mut crate::store::Txn<'_>| {
                let _ = txn.read_plan(PID).await?;
                txn.write_plan(&plan)?;
                Ok(())
            })
            .await
            .unwrap();

        let view = project_plan(&store, PID, false).await.unwrap().unwrap();
        assert_eq!(view.completed_specs, 0);
        assert_eq!(view.current_spec_index, Some(0));
    }

    #[tokio::test]
    async fn include_stage_controls_stage_emission() {
        let store = seeded_store(1).await;
        apply_status_event(&store, &stage_event("implementing"))
            .await
            .unwrap();

        let with_stage = project_plan(&store, PID, true).await.unwrap().unwrap();
        assert_eq!(
            with_stage.specs[0].stage,
            Some(Some("implementing".to_string()))
        );
        let json = serde_json::to_value(&with_stage).unwrap();
        assert_eq!(json["specs"][0]["stage"], "implementing");

        let without_stage = project_plan(&store, PID, false).await.unwrap().unwrap();
        assert_eq!(without_stage.specs[0].stage, None);
        let json = serde_json::to_value(&without_stage).unwrap();
        assert!(json["specs"][0].get("stage").is_none());
    }
}
