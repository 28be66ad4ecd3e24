use crate::error::{FjallError, FjallResult};
use fjall::compaction::Strategy;
use fjall::{CompressionType, Config, KvSeparationOptions, PartitionCreateOptions};
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Fjall engine configuration.
///
/// A cloneable, thread-safe holder for every tuning parameter of the fjall
/// engine. Clones share the same settings through `Arc<FjallConfigInner>`.
///
/// Characteristics:
/// - Thread-safe (atomics for scalars, `parking_lot` locks for the rest)
/// - Cloneable (Arc-based, cheap clones)
/// - Write-once database path
///
/// Usage: produced by [`FjallEngineBuilder`](crate::FjallEngineBuilder); read
/// once when the keyspace is opened.
#[derive(Clone)]
pub struct FjallConfig {
    inner: Arc<FjallConfigInner>,
}

impl FjallConfig {
    /// Creates a configuration with default values:
    /// - Block cache: 64 MB
    /// - Blob cache: 32 MB
    /// - Write buffer: 128 MB
    /// - Max journaling size: 512 MB
    /// - Bloom filter: 10 bits per key
    /// - Compression: LZ4
    /// - Flush workers: all CPU cores; compaction workers: half of them
    /// - Partition: `kv`
    #[inline]
    pub fn new() -> FjallConfig {
        FjallConfig {
            inner: Arc::new(FjallConfigInner::new()),
        }
    }

    /// Checks the settings that fjall cannot recover from at open time.
    pub(crate) fn validate(&self) -> FjallResult<()> {
        if self.db_path().is_empty() {
            log::error!("Fjall engine configured without a database path");
            return Err(FjallError::MissingPath);
        }
        let name = self.partition_name();
        if !is_valid_partition_name(&name) {
            log::error!("Invalid fjall partition name {:?}", name);
            return Err(FjallError::InvalidPartitionName(name));
        }
        Ok(())
    }

    /// Translates this config into fjall's keyspace configuration.
    #[inline]
    pub(crate) fn keyspace_config(&self) -> Config {
        let mut config = Config::new(self.db_path())
            .manual_journal_persist(self.manual_journal_persist())
            .flush_workers(self.flush_workers())
            .compaction_workers(self.compaction_workers())
            .cache_size(self.block_cache_capacity() + self.blob_cache_capacity())
            .max_journaling_size(self.max_journaling_size())
            .max_write_buffer_size(self.max_write_buffer_size());

        if self.fsync_frequency() > 0 {
            config = config.fsync_ms(Some(self.fsync_frequency()));
        }
        config
    }

    /// Translates this config into the options of the data partition.
    #[inline]
    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        let bloom_bits = match self.bloom_filter_bits() {
            bits if bits < 0 => None,
            bits => Some(bits as u8),
        };
        let mut options = PartitionCreateOptions::default()
            .bloom_filter_bits(bloom_bits)
            .compression(self.compression_type())
            .compaction_strategy(self.compaction_strategy())
            .max_memtable_size(self.max_memtable_size())
            .block_size(self.block_size());

        if self.kv_separated() {
            options = options.with_kv_separation(KvSeparationOptions::default());
        }
        options
    }

    #[inline]
    pub fn db_path(&self) -> &str {
        self.inner.db_path.get().map(String::as_str).unwrap_or("")
    }

    /// The path can be set only once; later calls are ignored.
    #[inline]
    pub(crate) fn set_db_path(&self, db_path: &str) {
        if self.inner.db_path.set(db_path.to_string()).is_err() {
            log::warn!("Fjall database path already set, ignoring {:?}", db_path);
        }
    }

    #[inline]
    pub fn partition_name(&self) -> String {
        self.inner.partition_name.read().clone()
    }

    #[inline]
    pub(crate) fn set_partition_name(&self, name: &str) {
        *self.inner.partition_name.write() = name.to_string();
    }

    #[inline]
    pub fn manual_journal_persist(&self) -> bool {
        self.inner.manual_journal_persist.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_manual_journal_persist(&self, v: bool) {
        self.inner.manual_journal_persist.store(v, Ordering::Relaxed)
    }

    #[inline]
    pub fn flush_workers(&self) -> usize {
        self.inner.flush_workers.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_flush_workers(&self, count: usize) {
        self.inner.flush_workers.store(count, Ordering::Relaxed)
    }

    #[inline]
    pub fn compaction_workers(&self) -> usize {
        self.inner.compaction_workers.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_compaction_workers(&self, count: usize) {
        self.inner.compaction_workers.store(count, Ordering::Relaxed)
    }

    #[inline]
    pub fn block_cache_capacity(&self) -> u64 {
        self.inner.block_cache_capacity.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_block_cache_capacity(&self, bytes: u64) {
        self.inner.block_cache_capacity.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn blob_cache_capacity(&self) -> u64 {
        self.inner.blob_cache_capacity.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_blob_cache_capacity(&self, bytes: u64) {
        self.inner.blob_cache_capacity.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_journaling_size(&self) -> u64 {
        self.inner.max_journaling_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_journaling_size(&self, bytes: u64) {
        self.inner.max_journaling_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_write_buffer_size(&self) -> u64 {
        self.inner.max_write_buffer_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_write_buffer_size(&self, bytes: u64) {
        self.inner.max_write_buffer_size.store(bytes, Ordering::Relaxed)
    }

    /// Background fsync interval in milliseconds; 0 disables it.
    #[inline]
    pub fn fsync_frequency(&self) -> u16 {
        self.inner.fsync_frequency.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_fsync_frequency(&self, millis: u16) {
        self.inner.fsync_frequency.store(millis, Ordering::Relaxed)
    }

    /// Persist the journal when the engine is dropped.
    #[inline]
    pub fn commit_before_close(&self) -> bool {
        self.inner.commit_before_close.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_commit_before_close(&self, v: bool) {
        self.inner.commit_before_close.store(v, Ordering::Relaxed)
    }

    /// Bloom filter bits per key; negative disables the filter.
    #[inline]
    pub fn bloom_filter_bits(&self) -> i8 {
        self.inner.bloom_filter_bits.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_bloom_filter_bits(&self, bits: i8) {
        self.inner.bloom_filter_bits.store(bits, Ordering::Relaxed)
    }

    #[inline]
    pub fn compression_type(&self) -> CompressionType {
        self.inner.compression_type.read().clone()
    }

    #[inline]
    pub(crate) fn set_compression_type(&self, compression_type: CompressionType) {
        *self.inner.compression_type.write() = compression_type;
    }

    #[inline]
    pub fn compaction_strategy(&self) -> Strategy {
        self.inner.compaction_strategy.read().clone()
    }

    #[inline]
    pub(crate) fn set_compaction_strategy(&self, strategy: Strategy) {
        *self.inner.compaction_strategy.write() = strategy;
    }

    #[inline]
    pub fn max_memtable_size(&self) -> u32 {
        self.inner.max_memtable_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_memtable_size(&self, bytes: u32) {
        self.inner.max_memtable_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.inner.block_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_block_size(&self, bytes: u32) {
        self.inner.block_size.store(bytes, Ordering::Relaxed)
    }

    /// Store large values in blob files apart from the LSM tree.
    #[inline]
    pub fn kv_separated(&self) -> bool {
        self.inner.kv_separated.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_kv_separated(&self, v: bool) {
        self.inner.kv_separated.store(v, Ordering::Relaxed)
    }
}

impl Default for FjallConfig {
    fn default() -> Self {
        FjallConfig::new()
    }
}

impl Debug for FjallConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallConfig")
            .field("db_path", &self.db_path())
            .field("partition_name", &self.partition_name())
            .field("manual_journal_persist", &self.manual_journal_persist())
            .field("flush_workers", &self.flush_workers())
            .field("compaction_workers", &self.compaction_workers())
            .field("block_cache_capacity", &self.block_cache_capacity())
            .field("fsync_frequency", &self.fsync_frequency())
            .field("commit_before_close", &self.commit_before_close())
            .finish()
    }
}

/// Fjall accepts partition names of 1 to 255 characters from `[a-zA-Z0-9_#$-]`.
pub(crate) fn is_valid_partition_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '#' | '$'))
}

struct FjallConfigInner {
    db_path: OnceLock<String>,
    partition_name: RwLock<String>,
    manual_journal_persist: AtomicBool,
    flush_workers: AtomicUsize,
    compaction_workers: AtomicUsize,
    block_cache_capacity: AtomicU64,
    blob_cache_capacity: AtomicU64,
    max_journaling_size: AtomicU64,
    max_write_buffer_size: AtomicU64,
    fsync_frequency: AtomicU16,
    commit_before_close: AtomicBool,

    bloom_filter_bits: AtomicI8,
    compression_type: RwLock<CompressionType>,
    compaction_strategy: RwLock<Strategy>,
    max_memtable_size: AtomicU32,
    block_size: AtomicU32,
    kv_separated: AtomicBool,
}

impl FjallConfigInner {
    const DEFAULT_PARTITION: &'static str = "kv";
    const DEFAULT_BLOCK_CACHE_MB: u64 = 64;
    const DEFAULT_BLOB_CACHE_MB: u64 = 32;
    const DEFAULT_WRITE_BUFFER_MB: u64 = 128;
    const DEFAULT_MAX_JOURNALING_MB: u64 = 512;
    const DEFAULT_MEMTABLE_MB: u32 = 32;

    fn new() -> FjallConfigInner {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        FjallConfigInner {
            db_path: OnceLock::new(),
            partition_name: RwLock::new(Self::DEFAULT_PARTITION.to_string()),
            manual_journal_persist: AtomicBool::new(false),
            flush_workers: AtomicUsize::new(cpus.max(1)),
            compaction_workers: AtomicUsize::new((cpus / 2).max(1)),
            block_cache_capacity: AtomicU64::new(Self::DEFAULT_BLOCK_CACHE_MB * 1_024 * 1_024),
            blob_cache_capacity: AtomicU64::new(Self::DEFAULT_BLOB_CACHE_MB * 1_024 * 1_024),
            max_journaling_size: AtomicU64::new(Self::DEFAULT_MAX_JOURNALING_MB * 1_024 * 1_024),
            max_write_buffer_size: AtomicU64::new(Self::DEFAULT_WRITE_BUFFER_MB * 1_024 * 1_024),
            fsync_frequency: AtomicU16::new(0),
            commit_before_close: AtomicBool::new(true),
            bloom_filter_bits: AtomicI8::new(10),
            compression_type: RwLock::new(CompressionType::Lz4),
            compaction_strategy: RwLock::new(Strategy::default()),
            max_memtable_size: AtomicU32::new(Self::DEFAULT_MEMTABLE_MB * 1_024 * 1_024),
            block_size: AtomicU32::new(4 * 1_024),
            kv_separated: AtomicBool::new(false),
        }
    }
}
