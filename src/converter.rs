//! Conversion between native error chains and portable failure records.
//!
//! A [`FailureConverter`] walks a cause chain outer-to-inner, producing one
//! [`Failure`] node per level. With `encode_common_attributes` enabled, each
//! node's message and stack trace are moved into a codec-encoded payload and
//! replaced by fixed placeholders; the inverse walk decodes them back.
//!
//! The converter is stateless aside from its options and may be called
//! concurrently; every invocation operates on an independently owned chain.

use tracing::debug;

use crate::codec::CodecPipeline;
use crate::errors::{ApplicationError, ConversionError, ExecutionError};
use crate::payload::{from_payload, to_payload};
use crate::types::{
    EncodedFailureAttributes, Failure, FailureInfo, Payload, ACTIVITY_TASK_FAILED_MESSAGE,
    ENCODED_FAILURE_MESSAGE,
};

/// Options recognized by [`FailureConverter`].
#[derive(Debug, Clone, Default)]
pub struct FailureConverterOptions {
    /// Replace `message` and `stack_trace` on every converted failure with
    /// fixed placeholders and move the real values into an encoded payload.
    pub encode_common_attributes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FailureConverter {
    encode_common_attributes: bool,
}

impl FailureConverter {
    pub fn new(options: FailureConverterOptions) -> Self {
        Self {
            encode_common_attributes: options.encode_common_attributes,
        }
    }

    /// Convert a native error chain into a portable failure chain,
    /// outermost first, preserving depth and order.
    ///
    /// Requesting attribute encoding without a codec is a configuration
    /// error, not a silent skip: the attributes would otherwise leave the
    /// process unprotected.
    pub async fn error_to_failure(
        &self,
        error: &ExecutionError,
        codecs: &CodecPipeline,
    ) -> Result<Failure, ConversionError> {
        if self.encode_common_attributes && codecs.is_empty() {
            return Err(ConversionError::CodecRequired);
        }

        let mut nodes = Vec::new();
        let mut current = Some(error);
        while let Some(err) = current {
            nodes.push(self.convert_node(err, codecs).await?);
            current = err.cause();
        }
        debug!(
            depth = nodes.len(),
            encoded = self.encode_common_attributes,
            "converted error chain"
        );

        // Relink innermost-first.
        let mut failure: Option<Failure> = None;
        for mut node in nodes.into_iter().rev() {
            node.cause = failure.map(Box::new);
            failure = Some(node);
        }
        Ok(failure.expect("chain has at least one node"))
    }

    /// Reconstruct a native error chain from a portable failure chain,
    /// decoding encoded attributes where present.
    pub async fn failure_to_error(
        &self,
        failure: &Failure,
        codecs: &CodecPipeline,
    ) -> Result<ExecutionError, ConversionError> {
        let mut nodes = Vec::new();
        let mut current = Some(failure);
        while let Some(node) = current {
            nodes.push(self.reconstruct_node(node, codecs).await?);
            current = node.cause.as_deref();
        }

        let mut error: Option<ExecutionError> = None;
        for node in nodes.into_iter().rev() {
            error = Some(attach_cause(node, error));
        }
        Ok(error.expect("chain has at least one node"))
    }

    async fn convert_node(
        &self,
        error: &ExecutionError,
        codecs: &CodecPipeline,
    ) -> Result<Failure, ConversionError> {
        let mut failure = match error {
            ExecutionError::Application(app) => Failure {
                message: app.message.clone(),
                stack_trace: app.stack.clone(),
                encoded_attributes: None,
                cause: None,
                info: FailureInfo::Application {
                    error_type: app.error_type.clone(),
                    non_retryable: app.non_retryable,
                },
            },
            ExecutionError::Activity { activity_type, .. } => Failure {
                message: ACTIVITY_TASK_FAILED_MESSAGE.to_string(),
                stack_trace: String::new(),
                encoded_attributes: None,
                cause: None,
                info: FailureInfo::Activity {
                    activity_type: activity_type.clone(),
                },
            },
            ExecutionError::Generic { message, stack, .. } => Failure {
                message: message.clone(),
                stack_trace: stack.clone(),
                encoded_attributes: None,
                cause: None,
                info: FailureInfo::Generic,
            },
        };

        // Each node is encoded on its own, never as one blob for the chain.
        if self.encode_common_attributes {
            let attrs = EncodedFailureAttributes {
                message: failure.message.clone(),
                stack_trace: failure.stack_trace.clone(),
            };
            let payload = to_payload(&attrs)?;
            let payload = codecs
                .encode(payload)
                .await
                .map_err(|source| ConversionError::Codec { source })?;
            failure.encoded_attributes = Some(payload);
            failure.message = ENCODED_FAILURE_MESSAGE.to_string();
            failure.stack_trace = String::new();
        }
        Ok(failure)
    }

    async fn reconstruct_node(
        &self,
        failure: &Failure,
        codecs: &CodecPipeline,
    ) -> Result<ExecutionError, ConversionError> {
        let attrs = match &failure.encoded_attributes {
            Some(payload) => {
                let decoded = codecs
                    .decode(payload.clone())
                    .await
                    .map_err(|source| ConversionError::Codec { source })?;
                from_payload::<EncodedFailureAttributes>(&decoded)?
            }
            None => {
                if failure.message == ENCODED_FAILURE_MESSAGE {
                    return Err(ConversionError::MalformedFailure {
                        reason: "failure claims encoded attributes but carries none".to_string(),
                    });
                }
                EncodedFailureAttributes {
                    message: failure.message.clone(),
                    stack_trace: failure.stack_trace.clone(),
                }
            }
        };

        Ok(match &failure.info {
            FailureInfo::Application {
                error_type,
                non_retryable,
            } => ExecutionError::Application(ApplicationError {
                message: attrs.message,
                error_type: error_type.clone(),
                non_retryable: *non_retryable,
                stack: attrs.stack_trace,
                cause: None,
            }),
            FailureInfo::Activity { activity_type } => ExecutionError::Activity {
                activity_type: activity_type.clone(),
                cause: None,
            },
            FailureInfo::Generic => ExecutionError::Generic {
                message: attrs.message,
                stack: attrs.stack_trace,
                cause: None,
            },
        })
    }
}

fn attach_cause(node: ExecutionError, cause: Option<ExecutionError>) -> ExecutionError {
    let boxed = cause.map(Box::new);
    match node {
        ExecutionError::Application(mut app) => {
            app.cause = boxed;
            ExecutionError::Application(app)
        }
        ExecutionError::Activity { activity_type, .. } => ExecutionError::Activity {
            activity_type,
            cause: boxed,
        },
        ExecutionError::Generic { message, stack, .. } => ExecutionError::Generic {
            message,
            stack,
            cause: boxed,
        },
    }
}

/// Bundles failure-converter options with a codec pipeline.
///
/// The invalid combination (encoding requested, no codec) is rejected at
/// construction so misconfiguration surfaces before any failure is handled.
#[derive(Debug, Clone)]
pub struct DataConverter {
    failure_converter: FailureConverter,
    codecs: CodecPipeline,
}

impl DataConverter {
    pub fn new(
        options: FailureConverterOptions,
        codecs: CodecPipeline,
    ) -> Result<Self, ConversionError> {
        if options.encode_common_attributes && codecs.is_empty() {
            return Err(ConversionError::CodecRequired);
        }
        Ok(Self {
            failure_converter: FailureConverter::new(options),
            codecs,
        })
    }

    /// Converter with no attribute encoding and no codecs.
    pub fn plain() -> Self {
        Self {
            failure_converter: FailureConverter::default(),
            codecs: CodecPipeline::new(),
        }
    }

    pub fn codecs(&self) -> &CodecPipeline {
        &self.codecs
    }

    pub async fn error_to_failure(
        &self,
        error: &ExecutionError,
    ) -> Result<Failure, ConversionError> {
        self.failure_converter.error_to_failure(error, &self.codecs).await
    }

    pub async fn failure_to_error(
        &self,
        failure: &Failure,
    ) -> Result<ExecutionError, ConversionError> {
        self.failure_converter.failure_to_error(failure, &self.codecs).await
    }

    /// Decode an encoded-attributes payload through the codec pipeline.
    pub async fn decode_failure_attributes(
        &self,
        payload: &Payload,
    ) -> Result<EncodedFailureAttributes, ConversionError> {
        let decoded = self
            .codecs
            .decode(payload.clone())
            .await
            .map_err(|source| ConversionError::Codec { source })?;
        from_payload(&decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{ByteShiftCodec, FailingCodec};

    fn encoding_converter() -> (FailureConverter, CodecPipeline) {
        let converter = FailureConverter::new(FailureConverterOptions {
            encode_common_attributes: true,
        });
        let codecs = CodecPipeline::new().with(Arc::new(ByteShiftCodec::default()));
        (converter, codecs)
    }

    fn app_chain() -> ExecutionError {
        let inner = ApplicationError::non_retryable("error message");
        let middle = ApplicationError::retryable("middle").with_cause(inner.into());
        ExecutionError::Activity {
            activity_type: "raise".to_string(),
            cause: Some(Box::new(middle.into())),
        }
    }

    #[tokio::test]
    async fn test_plain_conversion_preserves_attributes() {
        let converter = FailureConverter::default();
        let codecs = CodecPipeline::new();

        let failure = converter
            .error_to_failure(&app_chain(), &codecs)
            .await
            .unwrap();
        assert_eq!(failure.chain_depth(), 3);
        assert_eq!(failure.message, "Activity task failed");
        assert!(failure.encoded_attributes.is_none());

        let middle = failure.cause.as_deref().unwrap();
        assert_eq!(middle.message, "middle");
        let inner = middle.cause.as_deref().unwrap();
        assert_eq!(inner.message, "error message");
        assert!(inner
            .stack_trace
            .starts_with("ApplicationFailure: error message\n"));
    }

    #[tokio::test]
    async fn test_encoding_activates_placeholders_on_every_node() {
        let (converter, codecs) = encoding_converter();

        let failure = converter
            .error_to_failure(&app_chain(), &codecs)
            .await
            .unwrap();

        let mut node = Some(&failure);
        while let Some(current) = node {
            assert_eq!(current.message, ENCODED_FAILURE_MESSAGE);
            assert_eq!(current.stack_trace, "");
            assert!(current.encoded_attributes.is_some());
            node = current.cause.as_deref();
        }
    }

    #[tokio::test]
    async fn test_nodes_are_encoded_independently() {
        let (converter, codecs) = encoding_converter();

        let failure = converter
            .error_to_failure(&app_chain(), &codecs)
            .await
            .unwrap();

        // Decoding one node must yield that node's attributes only.
        let outer_attrs: EncodedFailureAttributes = from_payload(
            &codecs
                .decode(failure.encoded_attributes.clone().unwrap())
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(outer_attrs.message, "Activity task failed");
        assert_eq!(outer_attrs.stack_trace, "");

        let inner = failure.cause.as_deref().unwrap().cause.as_deref().unwrap();
        let inner_attrs: EncodedFailureAttributes = from_payload(
            &codecs
                .decode(inner.encoded_attributes.clone().unwrap())
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(inner_attrs.message, "error message");
        assert!(inner_attrs
            .stack_trace
            .starts_with("ApplicationFailure: error message\n"));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_depth_and_attributes() {
        let (converter, codecs) = encoding_converter();

        let original = app_chain();
        let failure = converter
            .error_to_failure(&original, &codecs)
            .await
            .unwrap();
        let reconstructed = converter
            .failure_to_error(&failure, &codecs)
            .await
            .unwrap();

        assert_eq!(reconstructed.chain_depth(), original.chain_depth());
        assert_eq!(reconstructed.message(), "Activity execution failed");
        let middle = reconstructed.cause().unwrap();
        assert_eq!(middle.message(), "middle");
        let inner = middle.cause().unwrap();
        assert_eq!(inner.message(), "error message");
        assert!(inner
            .stack()
            .starts_with("ApplicationFailure: error message\n"));
        assert!(inner.non_retryable());
    }

    #[tokio::test]
    async fn test_deep_chain_depth_preserved() {
        let converter = FailureConverter::default();
        let codecs = CodecPipeline::new();

        let mut error: ExecutionError = ApplicationError::retryable("level 0").into();
        for level in 1..7 {
            error = ApplicationError::retryable(format!("level {}", level))
                .with_cause(error)
                .into();
        }
        assert_eq!(error.chain_depth(), 7);

        let failure = converter.error_to_failure(&error, &codecs).await.unwrap();
        assert_eq!(failure.chain_depth(), 7);
        let back = converter.failure_to_error(&failure, &codecs).await.unwrap();
        assert_eq!(back.chain_depth(), 7);
    }

    #[tokio::test]
    async fn test_encoding_without_codec_is_a_configuration_error() {
        let converter = FailureConverter::new(FailureConverterOptions {
            encode_common_attributes: true,
        });
        let result = converter
            .error_to_failure(&app_chain(), &CodecPipeline::new())
            .await;
        assert!(matches!(result, Err(ConversionError::CodecRequired)));

        let result = DataConverter::new(
            FailureConverterOptions {
                encode_common_attributes: true,
            },
            CodecPipeline::new(),
        );
        assert!(matches!(result, Err(ConversionError::CodecRequired)));
    }

    #[tokio::test]
    async fn test_codec_errors_propagate_unchanged() {
        let converter = FailureConverter::new(FailureConverterOptions {
            encode_common_attributes: true,
        });
        let failing = CodecPipeline::new().with(Arc::new(FailingCodec));

        let result = converter.error_to_failure(&app_chain(), &failing).await;
        assert!(matches!(result, Err(ConversionError::Codec { .. })));

        // Same on the decode side.
        let (encoding, codecs) = encoding_converter();
        let failure = encoding
            .error_to_failure(&app_chain(), &codecs)
            .await
            .unwrap();
        let result = encoding.failure_to_error(&failure, &failing).await;
        assert!(matches!(result, Err(ConversionError::Codec { .. })));
    }

    #[tokio::test]
    async fn test_placeholder_without_attributes_is_malformed() {
        let converter = FailureConverter::default();
        let failure = Failure {
            message: ENCODED_FAILURE_MESSAGE.to_string(),
            stack_trace: String::new(),
            encoded_attributes: None,
            cause: None,
            info: FailureInfo::Generic,
        };
        let result = converter
            .failure_to_error(&failure, &CodecPipeline::new())
            .await;
        assert!(matches!(
            result,
            Err(ConversionError::MalformedFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_data_converter_decode_helper() {
        let codecs = CodecPipeline::new().with(Arc::new(ByteShiftCodec::default()));
        let dc = DataConverter::new(
            FailureConverterOptions {
                encode_common_attributes: true,
            },
            codecs,
        )
        .unwrap();

        let failure = dc.error_to_failure(&app_chain()).await.unwrap();
        let attrs = dc
            .decode_failure_attributes(failure.encoded_attributes.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(attrs.message, "Activity task failed");
    }
}
