//! Buckets: bounded batches of record ids produced by the scroller.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CodecError, CommandId};

/// Extra values the scroller attaches to a bucket.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A keyed slice of the ids selected by a command.
///
/// Keys are `<command-id>:<sequence>` with the sequence zero-padded to ten
/// digits, so the lexical order of keys is the scroll order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    command_id: CommandId,
    bucket_key: String,
    ids: Vec<String>,
    #[serde(default)]
    properties: Properties,
}

impl Bucket {
    pub fn new(command_id: CommandId, sequence: u64, ids: Vec<String>) -> Self {
        let bucket_key = Self::key_for(&command_id, sequence);
        Self {
            command_id,
            bucket_key,
            ids,
            properties: Properties::new(),
        }
    }

    /// Formats the bucket key for the `sequence`-th bucket of a command.
    pub fn key_for(command_id: &CommandId, sequence: u64) -> String {
        format!("{command_id}:{sequence:010}")
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn command_id(&self) -> &CommandId {
        &self.command_id
    }

    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}
