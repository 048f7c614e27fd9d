//! Trailer parsing.
//!
//! Layout at the tail of a file:
//! `… payload … | footer | footer_length:u32 LE | magic(4)`. A `PAR1` tail
//! means a plaintext footer (possibly signed, possibly containing encrypted
//! columns); a `PARE` tail means the footer itself is encrypted and
//! decryption properties are mandatory. The footer bytes are fetched with a
//! single seek + single read.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use parquet::format;
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactInputProtocol;

use crate::crypto::{self, DecryptionProperties, FileDecryptor, ModuleType};
use crate::error::{GantryError, Result};
use crate::metadata::{footer_from_thrift, Footer};
use crate::options::ReadOptions;
use crate::source::{SeekableBytes, SourceFile};

/// Magic bytes at both ends of a plaintext-footer file.
pub const MAGIC: [u8; 4] = *b"PAR1";
/// Tail magic of an encrypted-footer file.
pub const EFMAGIC: [u8; 4] = *b"PARE";

const FOOTER_LENGTH_SIZE: u64 = 4;
/// GCM nonce (12) plus tag (16) appended to signed plaintext footers.
const FOOTER_SIGNATURE_SIZE: usize = 28;

/// Read and decode the trailer through an already open stream.
///
/// Never mutates the file and may be called repeatedly; errors leave the
/// stream position unspecified but the stream itself usable.
pub(crate) fn read_footer_from(
    source: &dyn SourceFile,
    stream: &mut dyn SeekableBytes,
    options: &ReadOptions,
) -> Result<Footer> {
    let file_len = source.len();
    let min_len = MAGIC.len() as u64 + FOOTER_LENGTH_SIZE + MAGIC.len() as u64;
    if file_len < min_len {
        return Err(GantryError::NotAColumnarFile {
            message: format!("{} is only {file_len} bytes long", source.describe()),
        });
    }

    // Footer length and tail magic with a single seek.
    let footer_length_index = file_len - MAGIC.len() as u64 - FOOTER_LENGTH_SIZE;
    stream.seek_to(footer_length_index)?;
    let mut tail = [0u8; 8];
    stream.read_exact(&mut tail)?;
    let footer_length = u32::from_le_bytes(tail[..4].try_into().unwrap()) as u64;
    let magic: [u8; 4] = tail[4..].try_into().unwrap();

    let encrypted_footer = if magic == MAGIC {
        false
    } else if magic == EFMAGIC {
        true
    } else {
        return Err(GantryError::NotAColumnarFile {
            message: format!(
                "{} ends in {magic:?} instead of a known magic",
                source.describe()
            ),
        });
    };

    let footer_index = footer_length_index
        .checked_sub(footer_length)
        .unwrap_or(u64::MAX);
    if footer_index < MAGIC.len() as u64 || footer_index >= footer_length_index {
        return Err(GantryError::CorruptTrailer {
            message: format!("footer index {footer_index} is not within the file"),
        });
    }

    // One bulk read for the whole footer.
    stream.seek_to(footer_index)?;
    let mut footer = vec![0u8; footer_length as usize];
    stream.read_exact(&mut footer)?;

    if encrypted_footer {
        decode_encrypted_footer(&footer, options)
    } else {
        decode_plaintext_footer(&footer, options)
    }
}

/// Open a stream on `source` and read its trailer.
pub fn read_footer(source: &dyn SourceFile, options: &ReadOptions) -> Result<Footer> {
    let mut stream = source.open()?;
    read_footer_from(source, &mut stream, options)
}

/// Read the trailers of many sources with bounded parallelism
/// (`options.parallelism()` workers). Results keep the input order; the
/// first error wins.
pub fn read_footers(sources: &[Arc<dyn SourceFile>], options: &ReadOptions) -> Result<Vec<Footer>> {
    let slots: Vec<Mutex<Option<Result<Footer>>>> =
        sources.iter().map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);
    let workers = options.parallelism().min(sources.len().max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= sources.len() {
                    break;
                }
                let result = read_footer(&sources[i], options);
                *slots[i].lock().unwrap() = Some(result);
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap().expect("footer slot filled"))
        .collect()
}

fn decode_plaintext_footer(footer: &[u8], options: &ReadOptions) -> Result<Footer> {
    let mut footer_slice = footer;
    let mut prot = TCompactInputProtocol::new(&mut footer_slice);
    let file_meta =
        format::FileMetaData::read_from_in_protocol(&mut prot).map_err(corrupt_footer)?;

    // Plaintext footer of an encrypted file: build the decryptor for the
    // encrypted columns and, when possible, verify the footer signature.
    // The footer length matters only here, to locate the trailing
    // nonce + tag.
    let decryptor = match (&file_meta.encryption_algorithm, options.decryption()) {
        (Some(algorithm), Some(properties)) => {
            let decryptor = Arc::new(FileDecryptor::new(
                algorithm,
                file_meta.footer_signing_key_metadata.as_deref(),
                properties.clone(),
            )?);
            verify_footer_signature(footer, &decryptor)?;
            Some(decryptor)
        }
        _ => None,
    };

    footer_from_thrift(file_meta, options.metadata_filter(), decryptor)
}

fn verify_footer_signature(footer: &[u8], decryptor: &FileDecryptor) -> Result<()> {
    if footer.len() < FOOTER_SIGNATURE_SIZE {
        return Err(GantryError::CorruptTrailer {
            message: format!("signed footer of {} bytes cannot hold a signature", footer.len()),
        });
    }
    let (body, signature) = footer.split_at(footer.len() - FOOTER_SIGNATURE_SIZE);
    let aad = crypto::create_module_aad(decryptor.file_aad(), ModuleType::Footer, 0, 0, None);
    decryptor
        .footer_decryptor()
        .verify_signature(body, signature, &aad)
}

fn decode_encrypted_footer(footer: &[u8], options: &ReadOptions) -> Result<Footer> {
    let properties: &DecryptionProperties =
        options.decryption().ok_or(GantryError::CryptoKeyMissing)?;

    // FileCryptoMetaData and the encrypted footer module sit back to back;
    // the cursor advances past the first message.
    let mut cursor: &[u8] = footer;
    let crypto_meta = {
        let mut prot = TCompactInputProtocol::new(&mut cursor);
        format::FileCryptoMetaData::read_from_in_protocol(&mut prot).map_err(corrupt_footer)?
    };

    let decryptor = Arc::new(FileDecryptor::new(
        &crypto_meta.encryption_algorithm,
        crypto_meta.key_metadata.as_deref(),
        properties.clone(),
    )?);

    let aad = crypto::create_module_aad(decryptor.file_aad(), ModuleType::Footer, 0, 0, None);
    let plaintext = crypto::decrypt_module(&mut cursor, decryptor.footer_decryptor().as_ref(), &aad)?;

    let mut plaintext_slice = plaintext.as_slice();
    let mut prot = TCompactInputProtocol::new(&mut plaintext_slice);
    let file_meta =
        format::FileMetaData::read_from_in_protocol(&mut prot).map_err(corrupt_footer)?;
    footer_from_thrift(file_meta, options.metadata_filter(), Some(decryptor))
}

fn corrupt_footer(e: thrift::Error) -> GantryError {
    GantryError::CorruptTrailer {
        message: format!("undecodable footer: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BytesSource;

    fn try_read(bytes: Vec<u8>) -> Result<Footer> {
        let source = BytesSource::new(bytes, "trailer-test");
        read_footer(&source, &ReadOptions::default())
    }

    #[test]
    fn too_short_is_not_a_columnar_file() {
        let err = try_read(b"PAR1PAR".to_vec()).unwrap_err();
        assert!(matches!(err, GantryError::NotAColumnarFile { .. }));
    }

    #[test]
    fn unknown_tail_magic_is_rejected() {
        let mut bytes = b"PAR1".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(b"JUNK");
        let err = try_read(bytes).unwrap_err();
        assert!(matches!(err, GantryError::NotAColumnarFile { .. }));
    }

    #[test]
    fn footer_length_out_of_range_is_corrupt() {
        let mut bytes = b"PAR1".to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        // footer_length larger than everything before it
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&MAGIC);
        let err = try_read(bytes).unwrap_err();
        assert!(matches!(err, GantryError::CorruptTrailer { .. }));
    }

    #[test]
    fn encrypted_footer_without_keys_is_rejected() {
        let mut bytes = b"PAR1".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&EFMAGIC);
        let err = try_read(bytes).unwrap_err();
        assert!(matches!(err, GantryError::CryptoKeyMissing));
    }
}
