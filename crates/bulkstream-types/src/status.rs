//! Progress accounting for bulk commands.
//!
//! Workers never see the aggregate status of a command. They emit
//! [`StatusDelta`] values that the aggregator folds into a [`CommandStatus`].
//! Deltas form a commutative monoid per command: buckets processed on
//! different partitions can be merged in any order and yield the same total.

use std::ops::{Add, AddAssign};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CodecError, Command, CommandId};

/// Upper bound on failing ids kept in a status, so a command failing on
/// millions of records does not produce an unbounded status document.
pub const MAX_REPORTED_FAILED_IDS: usize = 100;

// ============================================================================
// StatusDelta
// ============================================================================

/// An incremental, summable contribution to a command's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDelta {
    pub command_id: CommandId,
    /// Records the action was applied to successfully.
    pub processed: u64,
    /// Records the action failed on, isolated from the rest.
    pub errors: u64,
    /// Records never attempted because their bucket was misconfigured.
    pub skipped: u64,
    /// Total number of scrolled ids, reported once when scrolling ends.
    pub total: Option<u64>,
    pub error_message: Option<String>,
    /// Ids implicated in errors, sorted and deduplicated.
    pub failed_ids: Vec<String>,
    /// Set when the command must be aborted.
    pub fatal: bool,
}

impl StatusDelta {
    /// The neutral delta for a command.
    pub fn empty(command_id: CommandId) -> Self {
        Self {
            command_id,
            processed: 0,
            errors: 0,
            skipped: 0,
            total: None,
            error_message: None,
            failed_ids: Vec::new(),
            fatal: false,
        }
    }

    pub fn processed(command_id: CommandId, processed: u64) -> Self {
        Self {
            processed,
            ..Self::empty(command_id)
        }
    }

    /// The delta reporting the end of scrolling.
    pub fn scrolled(command_id: CommandId, total: u64) -> Self {
        Self {
            total: Some(total),
            ..Self::empty(command_id)
        }
    }

    /// The delta of a bucket skipped because of a configuration error.
    pub fn skipped(command_id: CommandId, skipped: u64, message: impl Into<String>) -> Self {
        Self {
            skipped,
            error_message: Some(message.into()),
            ..Self::empty(command_id)
        }
    }

    pub fn with_errors(mut self, errors: u64, message: Option<String>, mut failed_ids: Vec<String>) -> Self {
        self.errors = errors;
        self.error_message = message;
        failed_ids.sort();
        failed_ids.dedup();
        self.failed_ids = failed_ids;
        self
    }

    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Number of ids accounted for by this delta.
    pub fn accounted(&self) -> u64 {
        self.processed + self.errors + self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.accounted() == 0 && self.total.is_none() && !self.fatal && self.error_message.is_none()
    }

    /// Merges `other` into `self`.
    ///
    /// Counters add, totals add, the fatal flag is sticky, failed ids are
    /// unioned, and the smallest message wins so merge order never matters.
    ///
    /// # Panics
    ///
    /// Panics if the deltas belong to different commands.
    pub fn merge(&mut self, other: &StatusDelta) {
        assert_eq!(
            self.command_id, other.command_id,
            "cannot merge deltas of different commands"
        );
        self.processed += other.processed;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.total = match (self.total, other.total) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        self.error_message = match (self.error_message.take(), &other.error_message) {
            (Some(a), Some(b)) => Some(if *b < a { b.clone() } else { a }),
            (a, b) => a.or_else(|| b.clone()),
        };
        self.failed_ids.extend(other.failed_ids.iter().cloned());
        self.failed_ids.sort();
        self.failed_ids.dedup();
        self.fatal |= other.fatal;
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(postcard::from_bytes(data)?)
    }
}

impl AddAssign<&StatusDelta> for StatusDelta {
    fn add_assign(&mut self, rhs: &StatusDelta) {
        self.merge(rhs);
    }
}

impl Add for StatusDelta {
    type Output = StatusDelta;

    fn add(mut self, rhs: StatusDelta) -> StatusDelta {
        self.merge(&rhs);
        self
    }
}

// ============================================================================
// CommandStatus
// ============================================================================

/// Lifecycle of a command as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    /// Submitted, not yet picked up by the scroller.
    Scheduled,
    /// The scroller is producing buckets.
    Scrolling,
    /// At least one bucket has been accounted for.
    Running,
    Completed,
    Failed,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Completed | CommandState::Failed)
    }
}

/// Durable, aggregated status of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub command_id: CommandId,
    pub action: String,
    pub state: CommandState,
    pub processed: u64,
    pub errors: u64,
    pub skipped: u64,
    pub total: Option<u64>,
    pub error_message: Option<String>,
    pub failed_ids: Vec<String>,
    pub submitted_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl CommandStatus {
    /// The status of a freshly submitted command.
    pub fn scheduled(command: &Command) -> Self {
        Self {
            command_id: command.id().clone(),
            action: command.action().to_string(),
            state: CommandState::Scheduled,
            processed: 0,
            errors: 0,
            skipped: 0,
            total: None,
            error_message: None,
            failed_ids: Vec::new(),
            submitted_at_ms: command.submitted_at_ms(),
            completed_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Records that scrolling has started.
    pub fn mark_scrolling(&mut self) {
        if self.state == CommandState::Scheduled {
            self.state = CommandState::Scrolling;
        }
    }

    /// Folds a delta into the status.
    ///
    /// Returns `true` when this delta moved the command into a terminal
    /// state. Deltas arriving after that are ignored.
    pub fn apply(&mut self, delta: &StatusDelta, now_ms: u64) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.processed += delta.processed;
        self.errors += delta.errors;
        self.skipped += delta.skipped;
        if let Some(total) = delta.total {
            self.total = Some(self.total.unwrap_or(0) + total);
        }
        for id in &delta.failed_ids {
            if self.failed_ids.len() >= MAX_REPORTED_FAILED_IDS {
                break;
            }
            if !self.failed_ids.contains(id) {
                self.failed_ids.push(id.clone());
            }
        }

        if delta.fatal {
            // The message of the delta that aborted the command wins.
            if delta.error_message.is_some() {
                self.error_message.clone_from(&delta.error_message);
            }
            self.state = CommandState::Failed;
            self.completed_at_ms = Some(now_ms);
            return true;
        }

        if self.error_message.is_none() {
            self.error_message.clone_from(&delta.error_message);
        }
        if delta.accounted() > 0 && !self.is_terminal() {
            self.state = CommandState::Running;
        }
        if let Some(total) = self.total
            && self.processed + self.errors + self.skipped >= total
        {
            self.state = CommandState::Completed;
            self.completed_at_ms = Some(now_ms);
            return true;
        }
        false
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}
