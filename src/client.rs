//! Client - submits workflows and observes their results.

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::config::ClientConfig;
use crate::converter::DataConverter;
use crate::errors::{ClientError, ConversionError};
use crate::executions::ExecutionStore;
use crate::types::{
    CreateExecutionParams, ExecutionStatus, ExecutionType, HistoryEvent,
};

#[derive(Clone)]
pub struct Client {
    store: ExecutionStore,
    data_converter: DataConverter,
    config: ClientConfig,
    queue: String,
}

impl Client {
    pub fn new(
        store: ExecutionStore,
        data_converter: DataConverter,
        config: ClientConfig,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            data_converter,
            config,
            queue: queue.into(),
        }
    }

    pub fn data_converter(&self) -> &DataConverter {
        &self.data_converter
    }

    /// Start a workflow execution, returning its id.
    pub async fn start_workflow(&self, workflow_type: &str, input: JsonValue) -> Result<String> {
        let id = self
            .store
            .create(CreateExecutionParams {
                exec_type: ExecutionType::Workflow,
                function_name: workflow_type.to_string(),
                queue: self.queue.clone(),
                input,
                max_retries: 0,
                parent_workflow_id: None,
            })
            .await
            .context("Failed to create workflow execution")?;
        debug!(workflow_id = %id, workflow_type, "started workflow");
        Ok(id)
    }

    /// Await a workflow result, polling until the execution closes.
    ///
    /// Polling is bounded; exhausting the configured attempts surfaces
    /// [`ClientError::ResultTimeout`]. A failed execution reconstructs the
    /// native error chain from the persisted failure record - encoded
    /// attributes are decoded on the way out, never shown raw.
    pub async fn result(&self, workflow_id: &str) -> Result<JsonValue, ClientError> {
        for _ in 0..self.config.result_poll_attempts {
            let execution = match self.store.get(workflow_id).await {
                Ok(Some(execution)) => execution,
                _ => return Err(ClientError::NotFound(workflow_id.to_string())),
            };

            match execution.status {
                ExecutionStatus::Completed => {
                    return Ok(execution.result.unwrap_or(JsonValue::Null));
                }
                ExecutionStatus::Failed => {
                    let failure = execution.failure.ok_or_else(|| {
                        ClientError::Conversion(ConversionError::MalformedFailure {
                            reason: "failed execution carries no failure record".to_string(),
                        })
                    })?;
                    let cause = self.data_converter.failure_to_error(&failure).await?;
                    return Err(ClientError::WorkflowFailed {
                        workflow_id: workflow_id.to_string(),
                        cause,
                    });
                }
                _ => sleep(Duration::from_millis(self.config.result_poll_interval_ms)).await,
            }
        }
        Err(ClientError::ResultTimeout {
            workflow_id: workflow_id.to_string(),
        })
    }

    /// Fetch the persisted execution history for a workflow.
    pub async fn fetch_history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>> {
        self.store
            .history(workflow_id)
            .await
            .context("Failed to fetch workflow history")
    }
}
