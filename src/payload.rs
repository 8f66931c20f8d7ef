use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::ConversionError;
use crate::types::Payload;

/// Metadata key naming the payload encoding.
pub const ENCODING_METADATA_KEY: &str = "encoding";

/// Encoding value for JSON payloads.
pub const JSON_ENCODING: &str = "json/plain";

/// Serialize a value into a JSON payload.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, ConversionError> {
    let data =
        serde_json::to_vec(value).map_err(|source| ConversionError::Serialization { source })?;
    let mut metadata = HashMap::new();
    metadata.insert(ENCODING_METADATA_KEY.to_string(), JSON_ENCODING.to_string());
    Ok(Payload { metadata, data })
}

/// Deserialize a JSON payload back into a value.
pub fn from_payload<T: DeserializeOwned>(payload: &Payload) -> Result<T, ConversionError> {
    serde_json::from_slice(&payload.data)
        .map_err(|source| ConversionError::MalformedEncodedAttributes { source })
}
