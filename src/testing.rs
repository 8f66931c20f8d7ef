//! Test support: deterministic codecs and an in-process local environment.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::client::Client;
use crate::codec::{CodecPipeline, PayloadCodec};
use crate::config::Config;
use crate::converter::{DataConverter, FailureConverterOptions};
use crate::errors::ConversionError;
use crate::executions::ExecutionStore;
use crate::types::Payload;
use crate::worker::Worker;

/// Adds a fixed offset to every payload byte on encode and subtracts it on
/// decode. Useful to prove that a codec actually ran over a payload.
#[derive(Debug, Clone)]
pub struct ByteShiftCodec {
    offset: u8,
}

impl ByteShiftCodec {
    pub fn new(offset: u8) -> Self {
        Self { offset }
    }
}

impl Default for ByteShiftCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl PayloadCodec for ByteShiftCodec {
    async fn encode(&self, mut payload: Payload) -> Result<Payload> {
        for byte in &mut payload.data {
            *byte = byte.wrapping_add(self.offset);
        }
        Ok(payload)
    }

    async fn decode(&self, mut payload: Payload) -> Result<Payload> {
        for byte in &mut payload.data {
            *byte = byte.wrapping_sub(self.offset);
        }
        Ok(payload)
    }
}

/// Refuses every payload; for codec-error propagation tests.
#[derive(Debug, Clone, Default)]
pub struct FailingCodec;

#[async_trait]
impl PayloadCodec for FailingCodec {
    async fn encode(&self, _payload: Payload) -> Result<Payload> {
        Err(anyhow!("codec refused payload"))
    }

    async fn decode(&self, _payload: Payload) -> Result<Payload> {
        Err(anyhow!("codec refused payload"))
    }
}

/// One store wired to a client and a worker sharing a data converter - the
/// in-process analogue of a local deployment.
pub struct LocalEnvironment {
    pub store: ExecutionStore,
    pub client: Client,
    pub worker: Worker,
}

impl LocalEnvironment {
    /// Build a local environment from a config and a codec pipeline.
    pub fn create(config: &Config, codecs: CodecPipeline) -> Result<Self, ConversionError> {
        let data_converter = DataConverter::new(
            FailureConverterOptions {
                encode_common_attributes: config.converter.encode_common_attributes,
            },
            codecs,
        )?;
        Ok(Self::with_data_converter(config, data_converter))
    }

    /// Build a local environment around an existing data converter.
    pub fn with_data_converter(config: &Config, data_converter: DataConverter) -> Self {
        let store = ExecutionStore::new();
        let client = Client::new(
            store.clone(),
            data_converter.clone(),
            config.client.clone(),
            config.worker.queue.clone(),
        );
        let worker = Worker::new(store.clone(), data_converter, config.worker.clone());
        Self {
            store,
            client,
            worker,
        }
    }
}

/// Install a fmt subscriber for tests; repeated calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
