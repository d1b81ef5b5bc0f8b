//! # bulkstream-types: Core types for `Bulkstream`
//!
//! This crate contains the shared data model used across the system:
//! - Log primitives ([`Record`], [`Watermark`], [`StreamName`])
//! - Bulk commands ([`Command`], [`CommandId`], [`Params`])
//! - Units of work ([`Bucket`])
//! - Progress accounting ([`StatusDelta`], [`CommandStatus`], [`CommandState`])
//!
//! Every type that travels on a stream knows how to encode itself into a
//! record payload and back. Commands, buckets and statuses carry free-form
//! JSON values and are encoded as JSON; status deltas have a fixed shape and
//! use `postcard`.

use std::fmt::{Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod bucket;
mod command;
mod status;

pub use bucket::{Bucket, Properties};
pub use command::{
    Command, CommandBuilder, CommandError, DEFAULT_BATCH_SIZE, DEFAULT_BUCKET_SIZE, Params,
};
pub use status::{CommandState, CommandStatus, MAX_REPORTED_FAILED_IDS, StatusDelta};

// ============================================================================
// Codec errors
// ============================================================================

/// Failure to turn a record payload back into a typed value (or the reverse).
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
}

// ============================================================================
// Stream names
// ============================================================================

/// Name of a logical stream (queue) in the log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for StreamName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<StreamName> for String {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Command identifiers
// ============================================================================

/// Unique identifier of a submitted bulk command.
///
/// Generated ids are random UUIDv4 strings; any string is accepted when
/// decoding so ids assigned by another submitter survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommandId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CommandId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Watermark - Copy (8-byte ordered token)
// ============================================================================

const SEQUENCE_MASK: u64 = 0x7fff;

/// Ordered progress token attached to every record.
///
/// **Bit Layout**:
/// - Upper 48 bits: timestamp in milliseconds
/// - Next 15 bits: sequence within the millisecond
/// - Lowest bit: completed flag
///
/// Comparing raw values orders watermarks by timestamp, then sequence, and a
/// completed watermark sorts just after its uncompleted twin.
///
/// # Examples
///
/// ```
/// # use bulkstream_types::Watermark;
/// let w = Watermark::of_sequence(1_000, 3);
/// assert_eq!(w.timestamp_ms(), 1_000);
/// assert_eq!(w.sequence(), 3);
/// assert!(!w.is_completed());
/// assert!(Watermark::completed_of(w) > w);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Watermark(u64);

impl Watermark {
    /// The lowest possible watermark.
    pub const LOW: Watermark = Watermark(0);

    /// The largest sequence that fits in the 15 sequence bits.
    pub const MAX_SEQUENCE: u16 = SEQUENCE_MASK as u16;

    pub fn of_timestamp(timestamp_ms: u64) -> Self {
        Self::of_parts(timestamp_ms, 0, false)
    }

    pub fn of_sequence(timestamp_ms: u64, sequence: u16) -> Self {
        Self::of_parts(timestamp_ms, sequence, false)
    }

    pub fn of_parts(timestamp_ms: u64, sequence: u16, completed: bool) -> Self {
        Self(
            (timestamp_ms << 16)
                | ((u64::from(sequence) & SEQUENCE_MASK) << 1)
                | u64::from(completed),
        )
    }

    /// Returns the same position flagged as completed.
    pub fn completed_of(watermark: Watermark) -> Self {
        Self(watermark.0 | 1)
    }

    pub fn of_value(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.0 >> 16
    }

    pub fn sequence(&self) -> u16 {
        ((self.0 >> 1) & SEQUENCE_MASK) as u16
    }

    pub fn is_completed(&self) -> bool {
        self.0 & 1 == 1
    }

    /// True when everything up to and including `timestamp_ms` has been
    /// processed.
    pub fn is_done(&self, timestamp_ms: u64) -> bool {
        Watermark::of_timestamp(timestamp_ms).0 < self.0
    }
}

impl Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.timestamp_ms(),
            self.sequence(),
            if self.is_completed() { " (completed)" } else { "" }
        )
    }
}

impl From<u64> for Watermark {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Watermark> for u64 {
    fn from(w: Watermark) -> Self {
        w.0
    }
}

// ============================================================================
// Record - immutable keyed message
// ============================================================================

/// An immutable, keyed, byte-payload message.
///
/// Keys are not unique across the log. They select the partition a record
/// lands in, so all records sharing a key are delivered in append order.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    key: Bytes,
    data: Bytes,
    watermark: Watermark,
}

impl Record {
    pub fn new(key: impl Into<Bytes>, data: impl Into<Bytes>, watermark: Watermark) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            watermark,
        }
    }

    /// Creates a record with a string key and the lowest watermark.
    pub fn of(key: &str, data: impl Into<Bytes>) -> Self {
        Self::new(Bytes::copy_from_slice(key.as_bytes()), data, Watermark::LOW)
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Returns the key as UTF-8 if it is valid UTF-8.
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("data_len", &self.data.len())
            .field("watermark", &self.watermark)
            .finish()
    }
}
