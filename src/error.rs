use parquet::basic::Compression;
use thiserror::Error;

/// Errors surfaced by the read path.
///
/// Variants correspond to failure kinds rather than source locations:
/// trailer-level corruption is fatal for the file, chunk-level corruption is
/// fatal for the current row group only, and unsupported bloom filter
/// configurations never surface here (they degrade to "no filter" with a
/// warning).
#[derive(Debug, Error)]
pub enum GantryError {
    /// The byte source is too short or does not end in a known magic.
    #[error("not a columnar file: {message}")]
    NotAColumnarFile {
        /// Description of the failed trailer check
        message: String,
    },

    /// The trailer parsed but points outside the file.
    #[error("corrupt trailer: {message}")]
    CorruptTrailer {
        /// Description of the inconsistency
        message: String,
    },

    /// A column chunk violated the page-level invariants (duplicate
    /// dictionary page, value-count mismatch, negative sizes, undecodable
    /// page header).
    #[error("corrupt page in column '{column}': {message}")]
    CorruptPage {
        /// Dotted path of the affected column
        column: String,
        /// Description of the violation
        message: String,
    },

    /// CRC-32 over the compressed page body did not match the page header.
    #[error("checksum mismatch in column '{column}': expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumFailure {
        /// Dotted path of the affected column
        column: String,
        /// CRC recorded in the page header
        expected: u32,
        /// CRC computed over the compressed bytes
        computed: u32,
    },

    /// The file has an encrypted footer but no decryption properties were
    /// supplied.
    #[error("file has an encrypted footer but no decryption properties were provided")]
    CryptoKeyMissing,

    /// A decrypted buffer did not have the length its header promised.
    #[error("decrypted length mismatch: header promised {expected} bytes, cipher produced {actual}")]
    CryptoLengthMismatch {
        /// Length recorded in the plaintext header
        expected: usize,
        /// Length of the decrypted buffer
        actual: usize,
    },

    /// A cipher operation failed (bad key, tampered ciphertext, AAD
    /// mismatch). Produced by the injected [`BlockDecryptor`].
    ///
    /// [`BlockDecryptor`]: crate::crypto::BlockDecryptor
    #[error("decryption failed: {message}")]
    Crypto {
        /// Reason reported by the cipher
        message: String,
    },

    /// The injected codec factory has no decompressor for this codec.
    #[error("no decompressor registered for codec {codec:?}")]
    UnsupportedCodec {
        /// The codec recorded in the column chunk metadata
        codec: Compression,
    },

    /// Underlying seek/read failure.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Schema or statistics decoding failure from the parquet tooling.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The page pipeline was torn down while a producer or consumer was
    /// still blocked on it.
    #[error("interrupted while exchanging pages with the chunk pipeline")]
    Interrupted,
}

impl GantryError {
    pub(crate) fn corrupt_page(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptPage {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = GantryError> = std::result::Result<T, E>;
