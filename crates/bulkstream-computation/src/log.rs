//! In-memory partitioned log with consumer-group offsets.
//!
//! Streams are split into a fixed number of partitions. A record lands in
//! the partition selected by a stable hash of its key, so records sharing a
//! key keep their append order. Consumer groups commit, per partition, the
//! offset of the next record to read.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};

use bulkstream_types::{Record, StreamName};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("unknown stream {0}")]
    UnknownStream(StreamName),

    #[error("stream {stream} has no partition {partition}")]
    InvalidPartition { stream: StreamName, partition: usize },

    #[error("stream {0} cannot have zero partitions")]
    ZeroPartitions(StreamName),
}

/// A position in one partition of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogOffset {
    pub stream: StreamName,
    pub partition: usize,
    pub offset: u64,
}

impl LogOffset {
    pub fn new(stream: impl Into<StreamName>, partition: usize, offset: u64) -> Self {
        Self {
            stream: stream.into(),
            partition,
            offset,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + 1,
            ..self.clone()
        }
    }
}

impl Display for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}:+{}", self.stream, self.partition, self.offset)
    }
}

/// The narrow write surface used by submitters.
pub trait RecordAppender {
    fn append(&mut self, stream: &str, record: Record) -> Result<LogOffset, LogError>;
}

type GroupKey = (String, StreamName, usize);

/// In-memory reference transport.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    streams: BTreeMap<StreamName, Vec<Vec<Record>>>,
    committed: HashMap<GroupKey, u64>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream with `partitions` partitions. Creating an existing
    /// stream is a no-op and keeps its partition count.
    pub fn create_stream(&mut self, stream: impl Into<StreamName>, partitions: usize) -> Result<(), LogError> {
        let stream = stream.into();
        if partitions == 0 {
            return Err(LogError::ZeroPartitions(stream));
        }
        self.streams
            .entry(stream)
            .or_insert_with(|| vec![Vec::new(); partitions]);
        Ok(())
    }

    pub fn exists(&self, stream: &str) -> bool {
        self.streams.contains_key(&StreamName::new(stream))
    }

    pub fn partitions(&self, stream: &str) -> Result<usize, LogError> {
        Ok(self.stream(stream)?.len())
    }

    /// Partition a key is routed to.
    pub fn partition_for(key: &[u8], partitions: usize) -> usize {
        let hash = blake3::hash(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % partitions.max(1) as u64) as usize
    }

    /// Appends a record to the partition selected by its key.
    pub fn append(&mut self, stream: &str, record: Record) -> Result<LogOffset, LogError> {
        let partitions = self.partitions(stream)?;
        let partition = Self::partition_for(record.key(), partitions);
        self.append_to(stream, partition, record)
    }

    pub fn append_to(&mut self, stream: &str, partition: usize, record: Record) -> Result<LogOffset, LogError> {
        let name = StreamName::new(stream);
        let records = self
            .streams
            .get_mut(&name)
            .ok_or_else(|| LogError::UnknownStream(name.clone()))?
            .get_mut(partition)
            .ok_or_else(|| LogError::InvalidPartition {
                stream: name.clone(),
                partition,
            })?;
        records.push(record);
        Ok(LogOffset::new(name, partition, records.len() as u64 - 1))
    }

    /// Reads the record at `offset`, `None` past the end.
    pub fn read(&self, offset: &LogOffset) -> Result<Option<&Record>, LogError> {
        Ok(self
            .partition(offset.stream.as_str(), offset.partition)?
            .get(offset.offset as usize))
    }

    /// Offset the next appended record of the partition will get.
    pub fn end_offset(&self, stream: &str, partition: usize) -> Result<u64, LogError> {
        Ok(self.partition(stream, partition)?.len() as u64)
    }

    /// Every record of a stream, partition by partition.
    pub fn records(&self, stream: &str) -> Result<Vec<&Record>, LogError> {
        Ok(self.stream(stream)?.iter().flatten().collect())
    }

    /// Commits `offset` as the next position to read for `group`.
    pub fn commit(&mut self, group: &str, offset: &LogOffset) -> Result<(), LogError> {
        let end = self.end_offset(offset.stream.as_str(), offset.partition)?;
        let key = (group.to_string(), offset.stream.clone(), offset.partition);
        let position = offset.offset.min(end);
        let entry = self.committed.entry(key).or_insert(0);
        // Monotonic: never move a committed position backward.
        *entry = (*entry).max(position);
        Ok(())
    }

    /// Next position to read for `group`; zero when nothing was committed.
    pub fn committed(&self, group: &str, stream: &str, partition: usize) -> u64 {
        self.committed
            .get(&(group.to_string(), StreamName::new(stream), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Records of `stream` not yet committed by `group`.
    pub fn lag(&self, group: &str, stream: &str) -> Result<u64, LogError> {
        let partitions = self.stream(stream)?;
        Ok(partitions
            .iter()
            .enumerate()
            .map(|(p, records)| (records.len() as u64).saturating_sub(self.committed(group, stream, p)))
            .sum())
    }

    fn stream(&self, stream: &str) -> Result<&Vec<Vec<Record>>, LogError> {
        let name = StreamName::new(stream);
        self.streams
            .get(&name)
            .ok_or(LogError::UnknownStream(name))
    }

    fn partition(&self, stream: &str, partition: usize) -> Result<&Vec<Record>, LogError> {
        self.stream(stream)?
            .get(partition)
            .ok_or_else(|| LogError::InvalidPartition {
                stream: StreamName::new(stream),
                partition,
            })
    }
}

impl RecordAppender for MemoryLog {
    fn append(&mut self, stream: &str, record: Record) -> Result<LogOffset, LogError> {
        MemoryLog::append(self, stream, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> MemoryLog {
        let mut log = MemoryLog::new();
        log.create_stream("s", 4).unwrap();
        log
    }

    #[test]
    fn same_key_same_partition_in_order() {
        let mut log = log();
        let a = log.append("s", Record::of("k", "1")).unwrap();
        let b = log.append("s", Record::of("k", "2")).unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
        assert_eq!(log.read(&b).unwrap().unwrap().data().as_ref(), b"2");
        assert!(log.read(&b.next()).unwrap().is_none());
    }

    #[test]
    fn create_stream_is_idempotent() {
        let mut log = log();
        log.append("s", Record::of("k", "1")).unwrap();
        log.create_stream("s", 8).unwrap();

        assert_eq!(log.partitions("s").unwrap(), 4);
        assert_eq!(log.records("s").unwrap().len(), 1);
        assert_eq!(log.create_stream("t", 0), Err(LogError::ZeroPartitions("t".into())));
    }

    #[test]
    fn unknown_stream_and_partition() {
        let mut log = log();
        assert_eq!(
            log.append("nope", Record::of("k", "1")),
            Err(LogError::UnknownStream("nope".into()))
        );
        assert!(matches!(
            log.append_to("s", 9, Record::of("k", "1")),
            Err(LogError::InvalidPartition { partition: 9, .. })
        ));
    }

    #[test]
    fn commits_are_monotonic_and_drive_lag() {
        let mut log = log();
        let offset = log.append_to("s", 0, Record::of("k", "1")).unwrap();
        log.append_to("s", 0, Record::of("k", "2")).unwrap();
        log.append_to("s", 1, Record::of("k", "3")).unwrap();
        assert_eq!(log.lag("g", "s").unwrap(), 3);

        log.commit("g", &offset.next().next()).unwrap();
        log.commit("g", &offset).unwrap();

        assert_eq!(log.committed("g", "s", 0), 2);
        assert_eq!(log.committed("other", "s", 0), 0);
        assert_eq!(log.lag("g", "s").unwrap(), 1);
    }
}
