//! Concurrency and partitioning knobs of a topology run.

use std::collections::HashMap;

/// Number of instances per computation and of partitions per stream.
///
/// Both have a default and per-name overrides. A value of zero is bumped to
/// one: every computation gets at least one instance and every stream at
/// least one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    default_concurrency: usize,
    default_partitions: usize,
    concurrency: HashMap<String, usize>,
    partitions: HashMap<String, usize>,
}

impl Settings {
    pub fn new(default_concurrency: usize, default_partitions: usize) -> Self {
        Self {
            default_concurrency: default_concurrency.max(1),
            default_partitions: default_partitions.max(1),
            concurrency: HashMap::new(),
            partitions: HashMap::new(),
        }
    }

    pub fn set_concurrency(mut self, computation: impl Into<String>, concurrency: usize) -> Self {
        self.concurrency.insert(computation.into(), concurrency.max(1));
        self
    }

    pub fn set_partitions(mut self, stream: impl Into<String>, partitions: usize) -> Self {
        self.partitions.insert(stream.into(), partitions.max(1));
        self
    }

    pub fn concurrency(&self, computation: &str) -> usize {
        self.concurrency
            .get(computation)
            .copied()
            .unwrap_or(self.default_concurrency)
    }

    pub fn partitions(&self, stream: &str) -> usize {
        self.partitions
            .get(stream)
            .copied()
            .unwrap_or(self.default_partitions)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let settings = Settings::new(2, 4)
            .set_concurrency("bulk/automation", 8)
            .set_partitions("bulk/status", 1);

        assert_eq!(settings.concurrency("bulk/automation"), 8);
        assert_eq!(settings.concurrency("other"), 2);
        assert_eq!(settings.partitions("bulk/status"), 1);
        assert_eq!(settings.partitions("command"), 4);
    }

    #[test]
    fn zero_is_bumped_to_one() {
        let settings = Settings::new(0, 0).set_concurrency("c", 0);
        assert_eq!(settings.concurrency("c"), 1);
        assert_eq!(settings.partitions("s"), 1);
    }
}
