use crate::config::FjallConfig;
use crate::engine::FjallEngine;
use crate::error::FjallResult;
use fjall::compaction::Strategy;
use fjall::CompressionType;

/// Fluent builder for a [`FjallEngine`].
///
/// Start from [`FjallEngine::with_config`], optionally apply a preset, set
/// the database path, then [`open`](Self::open) the engine. Setters called
/// after a preset override the preset's values.
///
/// # Configuration Presets
///
/// - `production_preset()` - balanced caches, periodic fsync
/// - `high_throughput_preset()` - large buffers, manual journal persistence
/// - `low_memory_preset()` - small caches, one worker of each kind
pub struct FjallEngineBuilder {
    config: FjallConfig,
}

impl FjallEngineBuilder {
    #[inline]
    pub fn new() -> FjallEngineBuilder {
        FjallEngineBuilder {
            config: FjallConfig::new(),
        }
    }

    /// Production settings:
    /// - 256 MB block cache, 64 MB blob cache
    /// - 128 MB write buffer, 32 MB memtable
    /// - all CPU cores for flushing, half for compaction
    /// - bloom filter with 10 bits per key
    /// - 100 ms fsync interval
    /// - LZ4 compression
    #[inline]
    pub fn production_preset(self) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        self.block_cache_capacity(256 * 1024 * 1024)
            .blob_cache_capacity(64 * 1024 * 1024)
            .max_write_buffer_size(128 * 1024 * 1024)
            .max_memtable_size(32 * 1024 * 1024)
            .flush_workers(cpus)
            .compaction_workers((cpus / 2).max(1))
            .bloom_filter_bits(10)
            .fsync_frequency(100)
            .compression_type(CompressionType::Lz4)
    }

    /// Settings for bulk loads where losing the tail of the journal on a
    /// crash is acceptable. Durability then relies on
    /// [`FjallEngine::persist`] or [`FjallEngine::close`].
    #[inline]
    pub fn high_throughput_preset(self) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        self.block_cache_capacity(512 * 1024 * 1024)
            .blob_cache_capacity(128 * 1024 * 1024)
            .max_write_buffer_size(256 * 1024 * 1024)
            .max_memtable_size(64 * 1024 * 1024)
            .flush_workers(cpus)
            .compaction_workers(cpus)
            .manual_journal_persist(true)
            .kv_separated(true)
            .bloom_filter_bits(0)
    }

    /// Minimal memory and thread usage, for tests and small devices.
    #[inline]
    pub fn low_memory_preset(self) -> Self {
        self.block_cache_capacity(16 * 1024 * 1024)
            .blob_cache_capacity(8 * 1024 * 1024)
            .max_write_buffer_size(32 * 1024 * 1024)
            .max_memtable_size(8 * 1024 * 1024)
            .flush_workers(1)
            .compaction_workers(1)
            .bloom_filter_bits(10)
    }

    #[inline]
    pub fn db_path(self, db_path: &str) -> Self {
        self.config.set_db_path(db_path);
        self
    }

    /// Name of the partition holding the keys; defaults to `kv`.
    #[inline]
    pub fn partition_name(self, name: &str) -> Self {
        self.config.set_partition_name(name);
        self
    }

    #[inline]
    pub fn manual_journal_persist(self, manual_journal_persist: bool) -> Self {
        self.config.set_manual_journal_persist(manual_journal_persist);
        self
    }

    #[inline]
    pub fn flush_workers(self, count: usize) -> Self {
        self.config.set_flush_workers(count);
        self
    }

    #[inline]
    pub fn compaction_workers(self, count: usize) -> Self {
        self.config.set_compaction_workers(count);
        self
    }

    #[inline]
    pub fn block_cache_capacity(self, bytes: u64) -> Self {
        self.config.set_block_cache_capacity(bytes);
        self
    }

    #[inline]
    pub fn blob_cache_capacity(self, bytes: u64) -> Self {
        self.config.set_blob_cache_capacity(bytes);
        self
    }

    #[inline]
    pub fn max_journaling_size(self, bytes: u64) -> Self {
        self.config.set_max_journaling_size(bytes);
        self
    }

    #[inline]
    pub fn max_write_buffer_size(self, bytes: u64) -> Self {
        self.config.set_max_write_buffer_size(bytes);
        self
    }

    #[inline]
    pub fn fsync_frequency(self, millis: u16) -> Self {
        self.config.set_fsync_frequency(millis);
        self
    }

    #[inline]
    pub fn commit_before_close(self, commit_before_close: bool) -> Self {
        self.config.set_commit_before_close(commit_before_close);
        self
    }

    #[inline]
    pub fn bloom_filter_bits(self, bits: u8) -> Self {
        self.config.set_bloom_filter_bits(bits as i8);
        self
    }

    /// Turns the partition's bloom filter off.
    #[inline]
    pub fn without_bloom_filter(self) -> Self {
        self.config.set_bloom_filter_bits(-1);
        self
    }

    #[inline]
    pub fn compression_type(self, compression_type: CompressionType) -> Self {
        self.config.set_compression_type(compression_type);
        self
    }

    #[inline]
    pub fn compaction_strategy(self, strategy: Strategy) -> Self {
        self.config.set_compaction_strategy(strategy);
        self
    }

    #[inline]
    pub fn max_memtable_size(self, bytes: u32) -> Self {
        self.config.set_max_memtable_size(bytes);
        self
    }

    #[inline]
    pub fn block_size(self, bytes: u32) -> Self {
        self.config.set_block_size(bytes);
        self
    }

    #[inline]
    pub fn kv_separated(self, kv_separated: bool) -> Self {
        self.config.set_kv_separated(kv_separated);
        self
    }

    /// Validates and returns the configuration without opening anything.
    pub fn build(self) -> FjallResult<FjallConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Opens the engine.
    pub fn open(self) -> FjallResult<FjallEngine> {
        FjallEngine::open(self.build()?)
    }
}

impl Default for FjallEngineBuilder {
    fn default() -> Self {
        FjallEngineBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FjallError;

    fn cpus() -> usize {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4)
    }

    #[test]
    fn test_with_config_starts_without_path() {
        let builder = FjallEngine::with_config();
        assert!(builder.config.db_path().is_empty());
        assert!(matches!(builder.build(), Err(FjallError::MissingPath)));
    }

    #[test]
    fn test_every_setter() {
        let config = FjallEngineBuilder::new()
            .db_path("test_path")
            .partition_name("accounts")
            .manual_journal_persist(true)
            .flush_workers(4)
            .compaction_workers(2)
            .block_cache_capacity(1024)
            .blob_cache_capacity(2048)
            .max_journaling_size(4096)
            .max_write_buffer_size(8192)
            .fsync_frequency(10)
            .commit_before_close(false)
            .bloom_filter_bits(8)
            .compression_type(CompressionType::None)
            .compaction_strategy(Strategy::default())
            .max_memtable_size(1024)
            .block_size(4096)
            .kv_separated(true)
            .build()
            .unwrap();

        assert_eq!(config.db_path(), "test_path");
        assert_eq!(config.partition_name(), "accounts");
        assert!(config.manual_journal_persist());
        assert_eq!(config.flush_workers(), 4);
        assert_eq!(config.compaction_workers(), 2);
        assert_eq!(config.block_cache_capacity(), 1024);
        assert_eq!(config.blob_cache_capacity(), 2048);
        assert_eq!(config.max_journaling_size(), 4096);
        assert_eq!(config.max_write_buffer_size(), 8192);
        assert_eq!(config.fsync_frequency(), 10);
        assert!(!config.commit_before_close());
        assert_eq!(config.bloom_filter_bits(), 8);
        assert_eq!(config.compression_type(), CompressionType::None);
        assert_eq!(config.max_memtable_size(), 1024);
        assert_eq!(config.block_size(), 4096);
        assert!(config.kv_separated());
    }

    #[test]
    fn test_without_bloom_filter() {
        let config = FjallEngineBuilder::new()
            .db_path("no_bloom")
            .without_bloom_filter()
            .build()
            .unwrap();
        assert_eq!(config.bloom_filter_bits(), -1);
    }

    #[test]
    fn test_invalid_partition_name_fails_build() {
        let result = FjallEngineBuilder::new()
            .db_path("bad_partition")
            .partition_name("no spaces")
            .build();
        assert!(matches!(result, Err(FjallError::InvalidPartitionName(_))));
    }

    #[test]
    fn test_production_preset() {
        let config = FjallEngineBuilder::new()
            .production_preset()
            .db_path("prod_test")
            .build()
            .unwrap();

        assert_eq!(config.db_path(), "prod_test");
        assert_eq!(config.block_cache_capacity(), 256 * 1024 * 1024);
        assert_eq!(config.blob_cache_capacity(), 64 * 1024 * 1024);
        assert_eq!(config.max_write_buffer_size(), 128 * 1024 * 1024);
        assert_eq!(config.max_memtable_size(), 32 * 1024 * 1024);
        assert_eq!(config.flush_workers(), cpus());
        assert_eq!(config.compaction_workers(), (cpus() / 2).max(1));
        assert_eq!(config.bloom_filter_bits(), 10);
        assert_eq!(config.fsync_frequency(), 100);
        assert_eq!(config.compression_type(), CompressionType::Lz4);
    }

    #[test]
    fn test_high_throughput_preset() {
        let config = FjallEngineBuilder::new()
            .high_throughput_preset()
            .db_path("throughput_test")
            .build()
            .unwrap();

        assert_eq!(config.block_cache_capacity(), 512 * 1024 * 1024);
        assert_eq!(config.max_write_buffer_size(), 256 * 1024 * 1024);
        assert_eq!(config.max_memtable_size(), 64 * 1024 * 1024);
        assert_eq!(config.compaction_workers(), cpus());
        assert!(config.manual_journal_persist());
        assert!(config.kv_separated());
        assert_eq!(config.bloom_filter_bits(), 0);
    }

    #[test]
    fn test_low_memory_preset() {
        let config = FjallEngineBuilder::new()
            .low_memory_preset()
            .db_path("low_mem_test")
            .build()
            .unwrap();

        assert_eq!(config.block_cache_capacity(), 16 * 1024 * 1024);
        assert_eq!(config.blob_cache_capacity(), 8 * 1024 * 1024);
        assert_eq!(config.max_write_buffer_size(), 32 * 1024 * 1024);
        assert_eq!(config.max_memtable_size(), 8 * 1024 * 1024);
        assert_eq!(config.flush_workers(), 1);
        assert_eq!(config.compaction_workers(), 1);
    }

    #[test]
    fn test_setter_overrides_preset() {
        let config = FjallEngineBuilder::new()
            .production_preset()
            .block_cache_capacity(1024 * 1024 * 1024)
            .db_path("override_test")
            .build()
            .unwrap();

        assert_eq!(config.block_cache_capacity(), 1024 * 1024 * 1024);
        assert_eq!(config.bloom_filter_bits(), 10);
    }
}
