//! Fire-and-forget notifier toward the execution fleet.
//!
//! The kernel returns at most one trigger request per committed event; the
//! HTTP layer hands it here after the transaction has committed. Nothing
//! in this module can roll state back: delivery failures are logged and
//! swallowed, and the receiver is expected to tolerate repeats.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use super::plan::SpecRecord;
use crate::config::Config;

const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

/// A request to start the execution fleet on a newly runnable spec.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub plan_id: String,
    pub spec_index: u32,
    pub spec: SpecRecord,
}

pub struct ExecutionTrigger {
    enabled: bool,
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl ExecutionTrigger {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TRIGGER_TIMEOUT)
            .build()?;
        Ok(Self {
            enabled: config.execution_enabled,
            endpoint: config.execution_endpoint.clone(),
            client,
        })
    }

    /// A trigger that never notifies anyone. Used by tests.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            client: reqwest::Client::new(),
        }
    }

    /// Dispatch a trigger without blocking the caller. The spawned task
    /// may outlive the HTTP response that caused it.
    pub fn fire(&self, request: TriggerRequest) {
        if !self.enabled {
            debug!(
                plan_id = %request.plan_id,
                spec_index = request.spec_index,
                "execution disabled, skipping trigger"
            );
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            // No fleet endpoint configured: record the hand-off so the
            // fleet can be driven from logs in development.
            info!(
                plan_id = %request.plan_id,
                spec_index = request.spec_index,
                status = request.spec.status.as_str(),
                "execution trigger (no endpoint configured, log only)"
            );
            return;
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            let body = json!({
                "plan_id": request.plan_id,
                "spec_index": request.spec_index,
                "spec": request.spec,
            });
            match client.post(&endpoint).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        plan_id = %request.plan_id,
                        spec_index = request.spec_index,
                        "execution fleet notified"
                    );
                }
                Ok(response) => {
                    warn!(
                        plan_id = %request.plan_id,
                        spec_index = request.spec_index,
                        status = %response.status(),
                        "execution trigger rejected by fleet"
                    );
                }
                Err(err) => {
                    warn!(
                        plan_id = %request.plan_id,
                        spec_index = request.spec_index,
                        error = %err,
                        "execution trigger delivery failed"
                    );
                }
            }
        });
    }
}
