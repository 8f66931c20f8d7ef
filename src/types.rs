use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Placeholder message carried by a failure whose real attributes were moved
/// into an encoded payload.
pub const ENCODED_FAILURE_MESSAGE: &str = "Encoded failure";

/// Record message for an activity failure as persisted in history.
pub const ACTIVITY_TASK_FAILED_MESSAGE: &str = "Activity task failed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Workflow,
    Activity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Opaque datum plus metadata. Codecs transform the bytes and may rewrite
/// the metadata; nothing else inspects the contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub metadata: HashMap<String, String>,
    pub data: Vec<u8>,
}

/// Discriminant recovered from a failure record, used to reconstruct the
/// matching native error variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FailureInfo {
    #[serde(rename_all = "camelCase")]
    Application {
        error_type: String,
        non_retryable: bool,
    },
    #[serde(rename_all = "camelCase")]
    Activity { activity_type: String },
    #[default]
    Generic,
}

/// One node of a portable error chain.
///
/// The chain is singly linked through `cause`, outermost first, acyclic and
/// terminated by `None`. When `encoded_attributes` is present, `message` and
/// `stack_trace` hold fixed placeholder values and the real attributes are
/// recoverable only by decoding the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_attributes: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
    #[serde(default)]
    pub info: FailureInfo,
}

impl Failure {
    /// Number of nodes in the chain, this one included.
    pub fn chain_depth(&self) -> usize {
        1 + self.cause.as_deref().map_or(0, Failure::chain_depth)
    }
}

/// Decoded shape of [`Failure::encoded_attributes`]. Field names are part of
/// the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodedFailureAttributes {
    pub message: String,
    pub stack_trace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    #[serde(rename = "type")]
    pub exec_type: ExecutionType,
    pub function_name: String,
    pub queue: String,
    pub status: ExecutionStatus,

    pub input: JsonValue,
    pub result: Option<JsonValue>,
    pub failure: Option<Failure>,

    pub attempt: i32,
    pub max_retries: i32,

    pub parent_workflow_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateExecutionParams {
    pub exec_type: ExecutionType,
    pub function_name: String,
    pub queue: String,
    pub input: JsonValue,
    pub max_retries: i32,
    pub parent_workflow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_time: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: EventAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum EventAttributes {
    #[serde(rename_all = "camelCase")]
    WorkflowExecutionStarted {
        workflow_type: String,
        input: JsonValue,
    },
    #[serde(rename_all = "camelCase")]
    ActivityTaskScheduled {
        activity_type: String,
        execution_id: String,
    },
    ActivityTaskFailed { failure: Failure },
    WorkflowExecutionCompleted { result: JsonValue },
    WorkflowExecutionFailed { failure: Failure },
}
