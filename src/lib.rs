pub mod client;
pub mod codec;
pub mod config;
pub mod converter;
pub mod errors;
pub mod executions;
pub mod payload;
pub mod testing;
pub mod types;
pub mod worker;


// Re-export main types
pub use converter::{DataConverter, FailureConverter, FailureConverterOptions};
pub use errors::{ApplicationError, ClientError, ConversionError, ExecutionError};
pub use types::*;
