//! Worker - claims executions and runs registered workflow and activity
//! functions, converting terminal errors into portable failures before they
//! are persisted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::converter::DataConverter;
use crate::errors::ExecutionError;
use crate::executions::ExecutionStore;
use crate::types::{
    CreateExecutionParams, EventAttributes, Execution, ExecutionStatus, ExecutionType,
};

type ActivityFn =
    Arc<dyn Fn(JsonValue) -> BoxFuture<'static, Result<JsonValue, ExecutionError>> + Send + Sync>;
type WorkflowFn = Arc<
    dyn Fn(WorkflowContext, JsonValue) -> BoxFuture<'static, Result<JsonValue, ExecutionError>>
        + Send
        + Sync,
>;

pub struct Worker {
    store: ExecutionStore,
    data_converter: DataConverter,
    config: WorkerConfig,
    activities: HashMap<String, ActivityFn>,
    workflows: HashMap<String, WorkflowFn>,
}

impl Worker {
    pub fn new(store: ExecutionStore, data_converter: DataConverter, config: WorkerConfig) -> Self {
        Self {
            store,
            data_converter,
            config,
            activities: HashMap::new(),
            workflows: HashMap::new(),
        }
    }

    /// Register an activity function under a name.
    pub fn register_activity<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, ExecutionError>> + Send + 'static,
    {
        self.activities
            .insert(name.into(), Arc::new(move |input| Box::pin(f(input))));
    }

    /// Register a workflow function under a name.
    pub fn register_workflow<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(WorkflowContext, JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, ExecutionError>> + Send + 'static,
    {
        self.workflows
            .insert(name.into(), Arc::new(move |ctx, input| Box::pin(f(ctx, input))));
    }

    /// Claim and run executions until the given workflow reaches a terminal
    /// status.
    pub async fn run_until_closed(&self, workflow_id: &str) -> Result<()> {
        loop {
            let execution = self
                .store
                .get(workflow_id)
                .await?
                .ok_or_else(|| anyhow!("execution not found: {}", workflow_id))?;
            if matches!(
                execution.status,
                ExecutionStatus::Completed | ExecutionStatus::Failed
            ) {
                return Ok(());
            }

            match self.store.claim_next(&self.config.queue).await? {
                Some(execution) if execution.exec_type == ExecutionType::Workflow => {
                    self.run_workflow(execution).await?;
                }
                Some(_) => {} // activities run inline within their workflow
                None => sleep(Duration::from_millis(self.config.poll_interval_ms)).await,
            }
        }
    }

    async fn run_workflow(&self, execution: Execution) -> Result<()> {
        info!(
            workflow_id = %execution.id,
            function = %execution.function_name,
            "running workflow"
        );
        self.store
            .append_event(
                &execution.id,
                EventAttributes::WorkflowExecutionStarted {
                    workflow_type: execution.function_name.clone(),
                    input: execution.input.clone(),
                },
            )
            .await?;

        let outcome = match self.workflows.get(&execution.function_name) {
            Some(workflow) => {
                let ctx = WorkflowContext {
                    workflow_id: execution.id.clone(),
                    queue: self.config.queue.clone(),
                    max_retries: self.config.max_retries,
                    store: self.store.clone(),
                    data_converter: self.data_converter.clone(),
                    activities: Arc::new(self.activities.clone()),
                };
                workflow(ctx, execution.input.clone()).await
            }
            None => Err(ExecutionError::Generic {
                message: format!("workflow not registered: {}", execution.function_name),
                stack: String::new(),
                cause: None,
            }),
        };

        match outcome {
            Ok(result) => {
                self.store
                    .append_event(
                        &execution.id,
                        EventAttributes::WorkflowExecutionCompleted {
                            result: result.clone(),
                        },
                    )
                    .await?;
                self.store.complete(&execution.id, result).await?;
            }
            Err(error) => {
                info!(workflow_id = %execution.id, error = %error, "workflow failed");
                let failure = self
                    .data_converter
                    .error_to_failure(&error)
                    .await
                    .context("Failed to convert workflow failure")?;
                self.store
                    .append_event(
                        &execution.id,
                        EventAttributes::WorkflowExecutionFailed {
                            failure: failure.clone(),
                        },
                    )
                    .await?;
                self.store.fail(&execution.id, failure).await?;
            }
        }

        Ok(())
    }
}

/// Handed to workflow functions; schedules activities on the shared store.
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    queue: String,
    max_retries: i32,
    store: ExecutionStore,
    data_converter: DataConverter,
    activities: Arc<HashMap<String, ActivityFn>>,
}

impl WorkflowContext {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Execute a registered activity to completion.
    ///
    /// Retries per policy: a non-retryable application error fails
    /// immediately, anything else is retried up to the configured maximum.
    /// The terminal failure is converted and persisted before the native
    /// error is returned to the workflow.
    pub async fn execute_activity(
        &self,
        name: &str,
        input: JsonValue,
    ) -> Result<JsonValue, ExecutionError> {
        let child_id = self
            .store
            .create(CreateExecutionParams {
                exec_type: ExecutionType::Activity,
                function_name: name.to_string(),
                queue: self.queue.clone(),
                input: input.clone(),
                max_retries: self.max_retries,
                parent_workflow_id: Some(self.workflow_id.clone()),
            })
            .await
            .map_err(internal_error)?;
        self.store
            .append_event(
                &self.workflow_id,
                EventAttributes::ActivityTaskScheduled {
                    activity_type: name.to_string(),
                    execution_id: child_id.clone(),
                },
            )
            .await
            .map_err(internal_error)?;

        let activity = match self.activities.get(name) {
            Some(activity) => activity.clone(),
            None => {
                let error = ExecutionError::Generic {
                    message: format!("activity not registered: {}", name),
                    stack: String::new(),
                    cause: None,
                };
                return Err(self.finish_failed(&child_id, name, error).await);
            }
        };

        loop {
            self.store
                .claim_specific(&child_id)
                .await
                .map_err(internal_error)?;

            match activity(input.clone()).await {
                Ok(result) => {
                    self.store
                        .complete(&child_id, result.clone())
                        .await
                        .map_err(internal_error)?;
                    return Ok(result);
                }
                Err(error) => {
                    let execution = self
                        .store
                        .get(&child_id)
                        .await
                        .map_err(internal_error)?
                        .ok_or_else(|| internal_error(anyhow!("activity record vanished")))?;

                    if !error.non_retryable() && execution.attempt <= self.max_retries {
                        debug!(
                            activity = name,
                            attempt = execution.attempt,
                            "retrying failed activity"
                        );
                        self.store
                            .reset_for_retry(&child_id)
                            .await
                            .map_err(internal_error)?;
                        continue;
                    }

                    return Err(self.finish_failed(&child_id, name, error).await);
                }
            }
        }
    }

    /// Convert and persist a terminal activity failure, returning the
    /// wrapped native error the workflow sees.
    async fn finish_failed(
        &self,
        child_id: &str,
        activity_type: &str,
        error: ExecutionError,
    ) -> ExecutionError {
        match self.data_converter.error_to_failure(&error).await {
            Ok(failure) => {
                self.store
                    .append_event(
                        &self.workflow_id,
                        EventAttributes::ActivityTaskFailed {
                            failure: failure.clone(),
                        },
                    )
                    .await
                    .ok(); // Don't lose the failure over a history write
                self.store.fail(child_id, failure).await.ok();

                ExecutionError::Activity {
                    activity_type: activity_type.to_string(),
                    cause: Some(Box::new(error)),
                }
            }
            Err(conversion) => ExecutionError::Generic {
                message: format!("failed to convert activity failure: {}", conversion),
                stack: String::new(),
                cause: Some(Box::new(error)),
            },
        }
    }
}

fn internal_error(error: anyhow::Error) -> ExecutionError {
    ExecutionError::Generic {
        message: format!("{:#}", error),
        stack: String::new(),
        cause: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::errors::ApplicationError;
    use crate::types::ExecutionStatus;

    fn worker_with(config: WorkerConfig) -> Worker {
        Worker::new(ExecutionStore::new(), DataConverter::plain(), config)
    }

    async fn start(worker: &Worker, workflow_type: &str) -> String {
        worker
            .store
            .create(CreateExecutionParams {
                exec_type: ExecutionType::Workflow,
                function_name: workflow_type.to_string(),
                queue: worker.config.queue.clone(),
                input: json!({}),
                max_retries: 0,
                parent_workflow_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_workflow_completes_with_activity_result() {
        let mut worker = worker_with(WorkerConfig::default());
        worker.register_activity("double", |input| async move {
            let n = input["n"].as_i64().unwrap_or(0);
            Ok(json!({"n": n * 2}))
        });
        worker.register_workflow("doubler", |ctx, _input| async move {
            ctx.execute_activity("double", json!({"n": 21})).await
        });

        let workflow_id = start(&worker, "doubler").await;
        worker.run_until_closed(&workflow_id).await.unwrap();

        let execution = worker.store.get(&workflow_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.result, Some(json!({"n": 42})));
    }

    #[tokio::test]
    async fn test_retryable_activity_is_retried() {
        let mut worker = worker_with(WorkerConfig {
            max_retries: 2,
            ..WorkerConfig::default()
        });

        static CALLS: AtomicU32 = AtomicU32::new(0);
        worker.register_activity("flaky", |_input| async move {
            if CALLS.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApplicationError::retryable("not yet").into())
            } else {
                Ok(json!("done"))
            }
        });
        worker.register_workflow("persistent", |ctx, _input| async move {
            ctx.execute_activity("flaky", json!(null)).await
        });

        let workflow_id = start(&worker, "persistent").await;
        worker.run_until_closed(&workflow_id).await.unwrap();

        let execution = worker.store.get(&workflow_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_activity_fails_on_first_attempt() {
        let mut worker = worker_with(WorkerConfig {
            max_retries: 5,
            ..WorkerConfig::default()
        });

        static CALLS: AtomicU32 = AtomicU32::new(0);
        worker.register_activity("raise", |_input| async move {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Err(ApplicationError::non_retryable("error message").into())
        });
        worker.register_workflow("failing", |ctx, _input| async move {
            ctx.execute_activity("raise", json!(null)).await
        });

        let workflow_id = start(&worker, "failing").await;
        worker.run_until_closed(&workflow_id).await.unwrap();

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        let execution = worker.store.get(&workflow_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);

        let failure = execution.failure.unwrap();
        assert_eq!(failure.message, "Activity task failed");
        assert_eq!(failure.cause.as_deref().unwrap().message, "error message");
    }

    #[tokio::test]
    async fn test_unregistered_workflow_fails_execution() {
        let worker = worker_with(WorkerConfig::default());
        let workflow_id = start(&worker, "missing").await;
        worker.run_until_closed(&workflow_id).await.unwrap();

        let execution = worker.store.get(&workflow_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let failure = execution.failure.unwrap();
        assert!(failure.message.contains("workflow not registered"));
    }

    #[tokio::test]
    async fn test_unregistered_activity_fails_workflow() {
        let mut worker = worker_with(WorkerConfig::default());
        worker.register_workflow("calls_missing", |ctx, _input| async move {
            ctx.execute_activity("missing", json!(null)).await
        });

        let workflow_id = start(&worker, "calls_missing").await;
        worker.run_until_closed(&workflow_id).await.unwrap();

        let execution = worker.store.get(&workflow_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let failure = execution.failure.unwrap();
        assert_eq!(failure.message, "Activity task failed");
        assert!(failure
            .cause
            .as_deref()
            .unwrap()
            .message
            .contains("activity not registered"));
    }
}
