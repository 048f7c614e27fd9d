//! Read configuration.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::codec::{BasicCodecFactory, CodecFactory};
use crate::crypto::DecryptionProperties;
use crate::metadata::MetadataFilter;
use crate::predicate::Predicate;

const DEFAULT_MAX_ALLOCATION: usize = 8 * 1024 * 1024;
const DEFAULT_PARALLELISM: usize = 5;

/// Options controlling how a file is read.
///
/// # Example
/// ```
/// use gantry::ReadOptions;
///
/// let options = ReadOptions::builder()
///     .stats_filter(true)
///     .page_checksum_verification(true)
///     .build();
/// assert!(options.use_stats_filter());
/// ```
#[derive(Clone)]
pub struct ReadOptions {
    use_stats_filter: bool,
    use_dictionary_filter: bool,
    use_bloom_filter: bool,
    use_column_index_filter: bool,
    page_checksum_verification: bool,
    async_reader: bool,
    max_allocation_size: usize,
    metadata_filter: MetadataFilter,
    decryption: Option<DecryptionProperties>,
    record_filter: Option<Arc<Predicate>>,
    codecs: Arc<dyn CodecFactory>,
    io_executor: Option<Handle>,
    process_executor: Option<Handle>,
    parallelism: usize,
}

impl ReadOptions {
    pub fn builder() -> ReadOptionsBuilder {
        ReadOptionsBuilder::default()
    }

    pub fn use_stats_filter(&self) -> bool {
        self.use_stats_filter
    }

    pub fn use_dictionary_filter(&self) -> bool {
        self.use_dictionary_filter
    }

    pub fn use_bloom_filter(&self) -> bool {
        self.use_bloom_filter
    }

    pub fn use_column_index_filter(&self) -> bool {
        self.use_column_index_filter
    }

    pub fn page_checksum_verification(&self) -> bool {
        self.page_checksum_verification
    }

    /// True when the caller asked for the two-executor pipeline. Whether it
    /// actually runs also depends on both executors being present; see
    /// [`async_ready`](Self::async_ready).
    pub fn async_reader(&self) -> bool {
        self.async_reader
    }

    pub fn max_allocation_size(&self) -> usize {
        self.max_allocation_size
    }

    pub fn metadata_filter(&self) -> &MetadataFilter {
        &self.metadata_filter
    }

    pub fn decryption(&self) -> Option<&DecryptionProperties> {
        self.decryption.as_ref()
    }

    pub fn record_filter(&self) -> Option<&Arc<Predicate>> {
        self.record_filter.as_ref()
    }

    pub fn codec_factory(&self) -> &Arc<dyn CodecFactory> {
        &self.codecs
    }

    /// Parallelism for batch multi-footer reads.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub(crate) fn io_executor(&self) -> Option<&Handle> {
        self.io_executor.as_ref()
    }

    pub(crate) fn process_executor(&self) -> Option<&Handle> {
        self.process_executor.as_ref()
    }

    /// Asynchronous reads requested and both executors injected.
    pub(crate) fn async_ready(&self) -> bool {
        self.async_reader && self.io_executor.is_some() && self.process_executor.is_some()
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("use_stats_filter", &self.use_stats_filter)
            .field("use_dictionary_filter", &self.use_dictionary_filter)
            .field("use_bloom_filter", &self.use_bloom_filter)
            .field("use_column_index_filter", &self.use_column_index_filter)
            .field("page_checksum_verification", &self.page_checksum_verification)
            .field("async_reader", &self.async_reader)
            .field("max_allocation_size", &self.max_allocation_size)
            .field("metadata_filter", &self.metadata_filter)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

/// Builder for [`ReadOptions`].
#[derive(Default)]
pub struct ReadOptionsBuilder {
    use_stats_filter: Option<bool>,
    use_dictionary_filter: Option<bool>,
    use_bloom_filter: Option<bool>,
    use_column_index_filter: Option<bool>,
    page_checksum_verification: Option<bool>,
    async_reader: Option<bool>,
    max_allocation_size: Option<usize>,
    metadata_filter: Option<MetadataFilter>,
    decryption: Option<DecryptionProperties>,
    record_filter: Option<Arc<Predicate>>,
    codecs: Option<Arc<dyn CodecFactory>>,
    io_executor: Option<Handle>,
    process_executor: Option<Handle>,
    parallelism: Option<usize>,
}

impl ReadOptionsBuilder {
    /// Enable or disable row-group elimination by chunk statistics
    /// (default: true).
    pub fn stats_filter(mut self, value: bool) -> Self {
        self.use_stats_filter = Some(value);
        self
    }

    /// Enable or disable row-group elimination by dictionary contents
    /// (default: true). Requires reading dictionary pages.
    pub fn dictionary_filter(mut self, value: bool) -> Self {
        self.use_dictionary_filter = Some(value);
        self
    }

    /// Enable or disable row-group elimination by bloom filters
    /// (default: true). Requires reading bloom filter bitsets.
    pub fn bloom_filter(mut self, value: bool) -> Self {
        self.use_bloom_filter = Some(value);
        self
    }

    /// Enable or disable page-level elimination by column indexes
    /// (default: true).
    pub fn column_index_filter(mut self, value: bool) -> Self {
        self.use_column_index_filter = Some(value);
        self
    }

    /// Verify the CRC-32 of pages whose headers carry one (default: false).
    pub fn page_checksum_verification(mut self, value: bool) -> Self {
        self.page_checksum_verification = Some(value);
        self
    }

    /// Request the two-executor asynchronous pipeline (default: false).
    /// Ignored with a warning unless both executors are injected.
    pub fn async_reader(mut self, value: bool) -> Self {
        self.async_reader = Some(value);
        self
    }

    /// Upper bound on a single buffer allocation; larger ranges are split
    /// (default: 8 MiB).
    pub fn max_allocation_size(mut self, value: usize) -> Self {
        self.max_allocation_size = Some(value.max(1));
        self
    }

    /// Row-group filter applied while the footer is deserialized.
    pub fn metadata_filter(mut self, value: MetadataFilter) -> Self {
        self.metadata_filter = Some(value);
        self
    }

    /// Decryption properties; required for files with encrypted footers.
    pub fn decryption(mut self, value: DecryptionProperties) -> Self {
        self.decryption = Some(value);
        self
    }

    /// Compiled record predicate driving row-group and page elimination.
    pub fn record_filter(mut self, value: Predicate) -> Self {
        self.record_filter = Some(Arc::new(value));
        self
    }

    /// Codec registry used to decompress pages (default:
    /// [`BasicCodecFactory`]).
    pub fn codec_factory(mut self, value: Arc<dyn CodecFactory>) -> Self {
        self.codecs = Some(value);
        self
    }

    /// Executor for background buffer fills in async mode.
    pub fn io_executor(mut self, handle: Handle) -> Self {
        self.io_executor = Some(handle);
        self
    }

    /// Executor for background page production in async mode.
    pub fn process_executor(mut self, handle: Handle) -> Self {
        self.process_executor = Some(handle);
        self
    }

    /// Parallelism for batch multi-footer reads (default: 5).
    pub fn parallelism(mut self, value: usize) -> Self {
        self.parallelism = Some(value.max(1));
        self
    }

    pub fn build(self) -> ReadOptions {
        ReadOptions {
            use_stats_filter: self.use_stats_filter.unwrap_or(true),
            use_dictionary_filter: self.use_dictionary_filter.unwrap_or(true),
            use_bloom_filter: self.use_bloom_filter.unwrap_or(true),
            use_column_index_filter: self.use_column_index_filter.unwrap_or(true),
            page_checksum_verification: self.page_checksum_verification.unwrap_or(false),
            async_reader: self.async_reader.unwrap_or(false),
            max_allocation_size: self.max_allocation_size.unwrap_or(DEFAULT_MAX_ALLOCATION),
            metadata_filter: self.metadata_filter.unwrap_or_default(),
            decryption: self.decryption,
            record_filter: self.record_filter,
            codecs: self.codecs.unwrap_or_else(|| Arc::new(BasicCodecFactory)),
            io_executor: self.io_executor,
            process_executor: self.process_executor,
            parallelism: self.parallelism.unwrap_or(DEFAULT_PARALLELISM),
        }
    }
}
