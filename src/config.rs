use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Partition`](crate::partition::Partition)
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Directory holding the lock, the state checkpoint, commit logs and datafiles
    pub dir: PathBuf,

    /// Size of the active commit log after which it is rolled (default: 4MB)
    pub commitlog_max_size: u64,

    /// How often the background task compacts closed commit logs (default: 10s)
    pub compaction_interval: Duration,

    /// Persist the state right after every compaction (default: true)
    pub checkpoint_after_compaction: bool,

    /// fsync the commit log after each append (default: false)
    pub sync_commitlog: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cstable"),
            commitlog_max_size: 4 * 1024 * 1024, // 4MB
            compaction_interval: Duration::from_secs(10),
            checkpoint_after_compaction: true,
            sync_commitlog: false,
        }
    }
}

impl PartitionConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the commit log roll threshold in bytes
    pub fn commitlog_max_size(mut self, size: u64) -> Self {
        self.commitlog_max_size = size;
        self
    }

    /// Set compaction check interval
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn checkpoint_after_compaction(mut self, enabled: bool) -> Self {
        self.checkpoint_after_compaction = enabled;
        self
    }

    /// fsync every commit log append
    pub fn sync_commitlog(mut self, enabled: bool) -> Self {
        self.sync_commitlog = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PartitionConfig::default();
        assert_eq!(config.dir, PathBuf::from("./cstable"));
        assert_eq!(config.commitlog_max_size, 4 * 1024 * 1024);
        assert_eq!(config.compaction_interval, Duration::from_secs(10));
        assert!(config.checkpoint_after_compaction);
        assert!(!config.sync_commitlog);
    }

    #[test]
    fn test_config_builder() {
        let config = PartitionConfig::new("/data/events")
            .commitlog_max_size(64 * 1024)
            .compaction_interval(Duration::from_millis(500))
            .checkpoint_after_compaction(false)
            .sync_commitlog(true);

        assert_eq!(config.dir, PathBuf::from("/data/events"));
        assert_eq!(config.commitlog_max_size, 64 * 1024);
        assert_eq!(config.compaction_interval, Duration::from_millis(500));
        assert!(!config.checkpoint_after_compaction);
        assert!(config.sync_commitlog);
    }
}
