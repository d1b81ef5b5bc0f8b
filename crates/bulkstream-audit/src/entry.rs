use std::collections::BTreeMap;

use bulkstream_types::{CodecError, Record, Watermark};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audited event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub event_id: String,
    pub category: String,
    pub principal: String,
    pub event_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(event_id: impl Into<String>, category: impl Into<String>, principal: impl Into<String>, event_date: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.into(),
            category: category.into(),
            principal: principal.into(),
            event_date,
            document_id: None,
            repository: None,
            comment: None,
            extended: BTreeMap::new(),
        }
    }

    pub fn with_document(mut self, repository: impl Into<String>, document_id: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_extended(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extended.insert(key.into(), value.into());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The entry as a record keyed by its event id and stamped with its
    /// event date.
    pub fn to_record(&self) -> Result<Record, CodecError> {
        let millis = u64::try_from(self.event_date.timestamp_millis()).unwrap_or_default();
        Ok(Record::new(
            self.event_id.clone(),
            self.encode()?,
            Watermark::of_timestamp(millis),
        ))
    }
}
