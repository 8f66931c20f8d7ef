use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Payload;

/// Pluggable payload transformation (encryption, compression, ...).
///
/// Implementations must be reversible: `decode(encode(p)) == p`. Codecs may
/// perform I/O; callers await the result before using the payload.
#[async_trait]
pub trait PayloadCodec: Send + Sync {
    async fn encode(&self, payload: Payload) -> Result<Payload>;
    async fn decode(&self, payload: Payload) -> Result<Payload>;
}

/// Ordered codec stack.
///
/// Encoding applies codecs in registration order, decoding applies them in
/// reverse. Codec errors propagate unchanged.
#[derive(Clone, Default)]
pub struct CodecPipeline {
    codecs: Vec<Arc<dyn PayloadCodec>>,
}

impl CodecPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub async fn encode(&self, mut payload: Payload) -> Result<Payload> {
        for codec in &self.codecs {
            payload = codec.encode(payload).await?;
        }
        Ok(payload)
    }

    pub async fn decode(&self, mut payload: Payload) -> Result<Payload> {
        for codec in self.codecs.iter().rev() {
            payload = codec.decode(payload).await?;
        }
        Ok(payload)
    }
}

impl fmt::Debug for CodecPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecPipeline({} codecs)", self.codecs.len())
    }
}
