use bulkstream_bulk::ServiceError;
use bulkstream_computation::{ProcessorError, TopologyError};
use bulkstream_config::ConfigError;
use bulkstream_types::{CodecError, CommandError};

pub type Result<T> = std::result::Result<T, BulkstreamError>;

#[derive(thiserror::Error, Debug)]
pub enum BulkstreamError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
