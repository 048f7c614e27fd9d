//! Decompression seam.
//!
//! Codecs are external collaborators: the reader asks the injected
//! [`CodecFactory`] for a [`Decompressor`] per column chunk and releases the
//! factory on close. The bundled [`BasicCodecFactory`] covers the
//! uncompressed pass-through and snappy; anything else must come from the
//! embedder.

use std::sync::Arc;

use bytes::Bytes;
use parquet::basic::Compression;

use crate::error::{GantryError, Result};

/// Decompresses page bodies for one codec.
pub trait Decompressor: Send + Sync {
    /// Decompress `input` into a buffer of exactly `uncompressed_size` bytes.
    fn decompress(&self, input: &[u8], uncompressed_size: usize) -> Result<Bytes>;
}

/// Registry of decompressors, injected through
/// [`ReadOptions`](crate::options::ReadOptions).
pub trait CodecFactory: Send + Sync {
    /// Look up the decompressor for `codec`.
    fn decompressor(&self, codec: Compression) -> Result<Arc<dyn Decompressor>>;

    /// Release pooled resources. Called once when the reader closes.
    fn release(&self) {}
}

/// Default factory: `UNCOMPRESSED` and `SNAPPY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicCodecFactory;

impl CodecFactory for BasicCodecFactory {
    fn decompressor(&self, codec: Compression) -> Result<Arc<dyn Decompressor>> {
        match codec {
            Compression::UNCOMPRESSED => Ok(Arc::new(PassThrough)),
            Compression::SNAPPY => Ok(Arc::new(Snappy)),
            other => Err(GantryError::UnsupportedCodec { codec: other }),
        }
    }
}

struct PassThrough;

impl Decompressor for PassThrough {
    fn decompress(&self, input: &[u8], uncompressed_size: usize) -> Result<Bytes> {
        if input.len() != uncompressed_size {
            return Err(GantryError::CorruptPage {
                column: String::new(),
                message: format!(
                    "uncompressed page declares {uncompressed_size} bytes but carries {}",
                    input.len()
                ),
            });
        }
        Ok(Bytes::copy_from_slice(input))
    }
}

struct Snappy;

impl Decompressor for Snappy {
    fn decompress(&self, input: &[u8], uncompressed_size: usize) -> Result<Bytes> {
        let mut output = vec![0u8; uncompressed_size];
        let written = snap::raw::Decoder::new()
            .decompress(input, &mut output)
            .map_err(|e| GantryError::CorruptPage {
                column: String::new(),
                message: format!("snappy decompression failed: {e}"),
            })?;
        output.truncate(written);
        Ok(output.into())
    }
}
