use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::*;

/// In-memory execution store backing the local environment.
///
/// Durable storage is owned by the external service in production
/// deployments; this store keeps the same operation set over process-local
/// state and is safe to share across tasks.
#[derive(Clone, Default)]
pub struct ExecutionStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<String, Execution>,
    // Creation order, for oldest-first claiming
    order: Vec<String>,
    histories: HashMap<String, Vec<HistoryEvent>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new execution in pending state.
    pub async fn create(&self, params: CreateExecutionParams) -> Result<String> {
        let id = format!(
            "{}_{}",
            match params.exec_type {
                ExecutionType::Workflow => "wf",
                ExecutionType::Activity => "act",
            },
            Uuid::new_v4()
        );

        let execution = Execution {
            id: id.clone(),
            exec_type: params.exec_type,
            function_name: params.function_name,
            queue: params.queue,
            status: ExecutionStatus::Pending,
            input: params.input,
            result: None,
            failure: None,
            attempt: 0,
            max_retries: params.max_retries,
            parent_workflow_id: params.parent_workflow_id,
            created_at: Utc::now(),
            completed_at: None,
        };

        let mut inner = self.inner.lock().await;
        inner.order.push(id.clone());
        inner.executions.insert(id.clone(), execution);
        Ok(id)
    }

    /// Claim the oldest pending execution on a queue, marking it running and
    /// bumping its attempt counter.
    pub async fn claim_next(&self, queue: &str) -> Result<Option<Execution>> {
        let mut inner = self.inner.lock().await;

        let candidate = inner
            .order
            .iter()
            .find(|id| {
                inner
                    .executions
                    .get(*id)
                    .map_or(false, |e| e.queue == queue && e.status == ExecutionStatus::Pending)
            })
            .cloned();

        match candidate {
            Some(id) => {
                let execution = inner
                    .executions
                    .get_mut(&id)
                    .expect("claimed id is present");
                execution.status = ExecutionStatus::Running;
                execution.attempt += 1;
                Ok(Some(execution.clone()))
            }
            None => Ok(None),
        }
    }

    /// Claim a specific pending execution (used for inline activity runs).
    pub async fn claim_specific(&self, execution_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| anyhow!("execution not found: {}", execution_id))?;
        if execution.status != ExecutionStatus::Pending {
            return Err(anyhow!(
                "execution {} is not pending (status: {:?})",
                execution_id,
                execution.status
            ));
        }
        execution.status = ExecutionStatus::Running;
        execution.attempt += 1;
        Ok(())
    }

    /// Complete an execution successfully.
    pub async fn complete(&self, execution_id: &str, result: JsonValue) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| anyhow!("execution not found: {}", execution_id))?;
        execution.status = ExecutionStatus::Completed;
        execution.result = Some(result);
        execution.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark an execution permanently failed with its converted failure.
    pub async fn fail(&self, execution_id: &str, failure: Failure) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| anyhow!("execution not found: {}", execution_id))?;
        execution.status = ExecutionStatus::Failed;
        execution.failure = Some(failure);
        execution.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Reset a failed attempt back to pending for retry.
    pub async fn reset_for_retry(&self, execution_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| anyhow!("execution not found: {}", execution_id))?;
        execution.status = ExecutionStatus::Pending;
        Ok(())
    }

    /// Get execution by ID.
    pub async fn get(&self, execution_id: &str) -> Result<Option<Execution>> {
        let inner = self.inner.lock().await;
        Ok(inner.executions.get(execution_id).cloned())
    }

    /// Append a history event to a workflow's execution history. Event ids
    /// are monotonic per workflow, starting at 1.
    pub async fn append_event(&self, workflow_id: &str, attributes: EventAttributes) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let events = inner.histories.entry(workflow_id.to_string()).or_default();
        let event = HistoryEvent {
            event_id: events.len() as i64 + 1,
            event_time: Utc::now(),
            attributes,
        };
        events.push(event);
        Ok(())
    }

    /// Fetch the persisted history for a workflow.
    pub async fn history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner.histories.get(workflow_id).cloned().unwrap_or_default())
    }
}
