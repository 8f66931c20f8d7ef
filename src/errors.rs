//! Error types for the conversion pipeline and the client surface.
//!
//! - [`ExecutionError`] — Native error chain raised by activities and
//!   workflows and reconstructed from portable failure records.
//! - [`ConversionError`] — Failures of the conversion pipeline itself.
//! - [`ClientError`] — Errors surfaced to callers awaiting a workflow result.

use std::backtrace::{Backtrace, BacktraceStatus};

use thiserror::Error;

/// Message surfaced for a reconstructed activity failure, regardless of what
/// the persisted record carried.
pub const ACTIVITY_EXECUTION_FAILED_MESSAGE: &str = "Activity execution failed";

/// Application-level error raised by activity or workflow code.
///
/// The synthesized stack trace always starts with
/// `"{error_type}: {message}\n"`; captured backtrace frames follow when
/// backtraces are enabled for the process.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApplicationError {
    pub message: String,
    pub error_type: String,
    pub non_retryable: bool,
    pub stack: String,
    #[source]
    pub cause: Option<Box<ExecutionError>>,
}

impl ApplicationError {
    /// Build an application error the runtime must not retry.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    /// Build an application error eligible for retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }

    fn new(message: impl Into<String>, non_retryable: bool) -> Self {
        let message = message.into();
        let error_type = "ApplicationFailure".to_string();
        let stack = render_stack(&error_type, &message);
        Self {
            message,
            error_type,
            non_retryable,
            stack,
            cause: None,
        }
    }

    /// Attach a nested cause.
    pub fn with_cause(mut self, cause: ExecutionError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Native error chain produced by application code and reconstructed from
/// portable [`Failure`](crate::types::Failure) records.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Application(ApplicationError),

    /// Wrapper for an activity that exhausted its attempts.
    #[error("Activity execution failed")]
    Activity {
        activity_type: String,
        #[source]
        cause: Option<Box<ExecutionError>>,
    },

    #[error("{message}")]
    Generic {
        message: String,
        stack: String,
        #[source]
        cause: Option<Box<ExecutionError>>,
    },
}

impl ExecutionError {
    pub fn message(&self) -> &str {
        match self {
            ExecutionError::Application(app) => &app.message,
            ExecutionError::Activity { .. } => ACTIVITY_EXECUTION_FAILED_MESSAGE,
            ExecutionError::Generic { message, .. } => message,
        }
    }

    pub fn stack(&self) -> &str {
        match self {
            ExecutionError::Application(app) => &app.stack,
            ExecutionError::Activity { .. } => "",
            ExecutionError::Generic { stack, .. } => stack,
        }
    }

    pub fn cause(&self) -> Option<&ExecutionError> {
        match self {
            ExecutionError::Application(app) => app.cause.as_deref(),
            ExecutionError::Activity { cause, .. } | ExecutionError::Generic { cause, .. } => {
                cause.as_deref()
            }
        }
    }

    /// Number of errors in the chain, this one included.
    pub fn chain_depth(&self) -> usize {
        1 + self.cause().map_or(0, ExecutionError::chain_depth)
    }

    /// Whether the runtime must not retry the failed call.
    pub fn non_retryable(&self) -> bool {
        match self {
            ExecutionError::Application(app) => app.non_retryable,
            _ => false,
        }
    }
}

impl From<ApplicationError> for ExecutionError {
    fn from(value: ApplicationError) -> Self {
        ExecutionError::Application(value)
    }
}

fn render_stack(error_type: &str, message: &str) -> String {
    let mut stack = format!("{}: {}\n", error_type, message);
    let backtrace = Backtrace::capture();
    if matches!(backtrace.status(), BacktraceStatus::Captured) {
        stack.push_str(&backtrace.to_string());
    }
    stack
}

/// Errors raised by the conversion pipeline. Codec errors are propagated
/// unchanged and never retried here.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("attribute encoding requested but no payload codec is configured")]
    CodecRequired,

    #[error("payload codec error: {source}")]
    Codec {
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed failure: {reason}")]
    MalformedFailure { reason: String },

    #[error("failed to decode failure attributes: {source}")]
    MalformedEncodedAttributes {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize failure attributes: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced to callers observing workflow results.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Workflow execution failed")]
    WorkflowFailed {
        workflow_id: String,
        #[source]
        cause: ExecutionError,
    },

    #[error("timed out waiting for result of workflow {workflow_id}")]
    ResultTimeout { workflow_id: String },

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_application_error_stack_header() {
        let err = ApplicationError::non_retryable("error message");
        assert!(err.stack.starts_with("ApplicationFailure: error message\n"));
        assert!(err.non_retryable);
        assert_eq!(err.to_string(), "error message");
    }

    #[test]
    fn test_activity_error_fixed_message() {
        let err = ExecutionError::Activity {
            activity_type: "raise".to_string(),
            cause: Some(Box::new(ApplicationError::retryable("inner").into())),
        };
        assert_eq!(err.message(), "Activity execution failed");
        assert_eq!(err.to_string(), "Activity execution failed");
        assert_eq!(err.cause().unwrap().message(), "inner");
    }

    #[test]
    fn test_chain_depth_and_source() {
        let inner: ExecutionError = ApplicationError::non_retryable("inner").into();
        let outer = ExecutionError::Activity {
            activity_type: "raise".to_string(),
            cause: Some(Box::new(inner)),
        };
        assert_eq!(outer.chain_depth(), 2);

        // std source chain lines up with cause()
        let source = outer.source().expect("activity error has a source");
        assert_eq!(source.to_string(), "inner");
    }

    #[test]
    fn test_non_retryable_only_for_flagged_application_errors() {
        let retryable: ExecutionError = ApplicationError::retryable("x").into();
        let fatal: ExecutionError = ApplicationError::non_retryable("x").into();
        let generic = ExecutionError::Generic {
            message: "x".to_string(),
            stack: String::new(),
            cause: None,
        };
        assert!(!retryable.non_retryable());
        assert!(fatal.non_retryable());
        assert!(!generic.non_retryable());
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::WorkflowFailed {
            workflow_id: "wf_1".to_string(),
            cause: ApplicationError::retryable("inner").into(),
        };
        assert_eq!(err.to_string(), "Workflow execution failed");
    }
}
