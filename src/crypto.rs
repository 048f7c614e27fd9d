//! Decryption plumbing.
//!
//! Cipher primitives are external collaborators: the embedder supplies a
//! [`DecryptorFactory`] that resolves keys to [`BlockDecryptor`]s, and the
//! crate owns everything format-shaped around them: module AAD assembly,
//! the length-framed ciphertext layout, and the per-column decryption setup
//! cache.
//!
//! Every encrypted module is bound to an AAD of the form
//! `file_aad ++ module_type ++ row_group_ordinal ++ column_ordinal
//! [++ page_ordinal]` with little-endian 16-bit ordinals. The page ordinal
//! suffix of a data-page AAD is rewritten in place between pages
//! ([`quick_update_page_aad`]) so the hot loop never reallocates.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex};

use parquet::format;
use parquet::schema::types::ColumnPath;

use crate::error::{GantryError, Result};

/// Encrypted module kinds, one canonical byte each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleType {
    Footer = 0,
    ColumnMetaData = 1,
    DataPage = 2,
    DictionaryPage = 3,
    DataPageHeader = 4,
    DictionaryPageHeader = 5,
    ColumnIndex = 6,
    OffsetIndex = 7,
    BloomFilterHeader = 8,
    BloomFilterBitset = 9,
}

impl ModuleType {
    fn carries_page_ordinal(self) -> bool {
        matches!(self, ModuleType::DataPage | ModuleType::DataPageHeader)
    }
}

/// Assemble the AAD for one module.
///
/// `page_ordinal` is only consulted for data-page modules; dictionary,
/// index and bloom modules never carry one.
pub fn create_module_aad(
    file_aad: &[u8],
    module: ModuleType,
    row_group_ordinal: i16,
    column_ordinal: i16,
    page_ordinal: Option<u16>,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(file_aad.len() + 7);
    aad.extend_from_slice(file_aad);
    aad.push(module as u8);
    if module == ModuleType::Footer {
        return aad;
    }
    aad.extend_from_slice(&row_group_ordinal.to_le_bytes());
    aad.extend_from_slice(&column_ordinal.to_le_bytes());
    if module.carries_page_ordinal() {
        aad.extend_from_slice(&page_ordinal.unwrap_or(0).to_le_bytes());
    }
    aad
}

/// Overwrite the trailing page-ordinal bytes of a data-page AAD in place.
pub fn quick_update_page_aad(aad: &mut [u8], page_ordinal: u16) {
    let n = aad.len();
    aad[n - 2..].copy_from_slice(&page_ordinal.to_le_bytes());
}

/// Block-cipher decryptor for one key. Supplied by the embedder.
pub trait BlockDecryptor: Send + Sync {
    /// Decrypt a whole ciphertext module (nonce + ciphertext + tag, without
    /// the 4-byte length frame) bound to `aad`.
    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Verify a detached footer signature (nonce + tag) over `plaintext`.
    fn verify_signature(&self, plaintext: &[u8], signature: &[u8], aad: &[u8]) -> Result<()>;
}

/// Resolves key material to decryptors.
pub trait DecryptorFactory: Send + Sync {
    /// Decryptor for the footer and for footer-key-protected columns.
    fn footer_decryptor(&self, key_metadata: Option<&[u8]>) -> Result<Arc<dyn BlockDecryptor>>;

    /// Decryptor for a column protected by its own key.
    fn column_decryptor(
        &self,
        column: &ColumnPath,
        key_metadata: Option<&[u8]>,
    ) -> Result<Arc<dyn BlockDecryptor>>;
}

/// Everything the reader needs to decrypt a file: the cipher factory and an
/// optional externally supplied AAD prefix (required when the writer chose
/// not to store the prefix in the file).
#[derive(Clone)]
pub struct DecryptionProperties {
    factory: Arc<dyn DecryptorFactory>,
    aad_prefix: Option<Vec<u8>>,
}

impl DecryptionProperties {
    pub fn new(factory: Arc<dyn DecryptorFactory>) -> Self {
        Self {
            factory,
            aad_prefix: None,
        }
    }

    /// Supply the AAD prefix out of band.
    pub fn with_aad_prefix(mut self, prefix: Vec<u8>) -> Self {
        self.aad_prefix = Some(prefix);
        self
    }
}

impl fmt::Debug for DecryptionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionProperties")
            .field("aad_prefix", &self.aad_prefix.is_some())
            .finish()
    }
}

/// Per-column decryption state resolved once and cached.
pub(crate) struct ColumnDecryptionSetup {
    pub(crate) encrypted: bool,
    pub(crate) ordinal: i16,
    /// Decrypts headers, indexes and bloom modules of this column.
    pub(crate) metadata_decryptor: Option<Arc<dyn BlockDecryptor>>,
    /// Decrypts page bodies of this column.
    pub(crate) data_decryptor: Option<Arc<dyn BlockDecryptor>>,
}

/// File-level decryption state built from the crypto metadata in the
/// trailer.
pub(crate) struct FileDecryptor {
    properties: DecryptionProperties,
    file_aad: Vec<u8>,
    footer_decryptor: Arc<dyn BlockDecryptor>,
    setups: Mutex<HashMap<String, Arc<ColumnDecryptionSetup>>>,
}

impl fmt::Debug for FileDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDecryptor")
            .field("file_aad_len", &self.file_aad.len())
            .finish()
    }
}

impl FileDecryptor {
    /// Build the decryptor from the algorithm advertised by the file.
    ///
    /// Used both for encrypted footers (`FileCryptoMetaData`) and for signed
    /// plaintext footers (`FileMetaData.encryption_algorithm`).
    pub(crate) fn new(
        algorithm: &format::EncryptionAlgorithm,
        footer_key_metadata: Option<&[u8]>,
        properties: DecryptionProperties,
    ) -> Result<Self> {
        let (stored_prefix, file_unique) = match algorithm {
            format::EncryptionAlgorithm::AESGCMV1(a) => {
                (a.aad_prefix.as_deref(), a.aad_file_unique.as_deref())
            }
            format::EncryptionAlgorithm::AESGCMCTRV1(a) => {
                (a.aad_prefix.as_deref(), a.aad_file_unique.as_deref())
            }
        };
        let mut file_aad = Vec::new();
        if let Some(prefix) = properties.aad_prefix.as_deref().or(stored_prefix) {
            file_aad.extend_from_slice(prefix);
        }
        if let Some(unique) = file_unique {
            file_aad.extend_from_slice(unique);
        }
        let footer_decryptor = properties.factory.footer_decryptor(footer_key_metadata)?;
        Ok(Self {
            properties,
            file_aad,
            footer_decryptor,
            setups: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn file_aad(&self) -> &[u8] {
        &self.file_aad
    }

    pub(crate) fn footer_decryptor(&self) -> &Arc<dyn BlockDecryptor> {
        &self.footer_decryptor
    }

    /// Resolve (and cache) the decryption setup for one column.
    pub(crate) fn column_setup(
        &self,
        path: &ColumnPath,
        ordinal: i16,
        crypto: Option<&format::ColumnCryptoMetaData>,
    ) -> Result<Arc<ColumnDecryptionSetup>> {
        let key = path.string();
        if let Some(setup) = self.setups.lock().unwrap().get(&key) {
            return Ok(Arc::clone(setup));
        }
        let setup = Arc::new(match crypto {
            None => ColumnDecryptionSetup {
                encrypted: false,
                ordinal,
                metadata_decryptor: None,
                data_decryptor: None,
            },
            Some(format::ColumnCryptoMetaData::ENCRYPTIONWITHFOOTERKEY(_)) => {
                ColumnDecryptionSetup {
                    encrypted: true,
                    ordinal,
                    metadata_decryptor: Some(Arc::clone(&self.footer_decryptor)),
                    data_decryptor: Some(Arc::clone(&self.footer_decryptor)),
                }
            }
            Some(format::ColumnCryptoMetaData::ENCRYPTIONWITHCOLUMNKEY(c)) => {
                let decryptor = self
                    .properties
                    .factory
                    .column_decryptor(path, c.key_metadata.as_deref())?;
                ColumnDecryptionSetup {
                    encrypted: true,
                    ordinal,
                    metadata_decryptor: Some(Arc::clone(&decryptor)),
                    data_decryptor: Some(decryptor),
                }
            }
        });
        self.setups.lock().unwrap().insert(key, Arc::clone(&setup));
        Ok(setup)
    }
}

/// Read one length-framed ciphertext module: a little-endian `u32` length
/// followed by that many bytes of `nonce ++ ciphertext ++ tag`.
pub(crate) fn read_length_framed(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read and decrypt one length-framed module bound to `aad`.
pub(crate) fn decrypt_module(
    reader: &mut impl Read,
    decryptor: &dyn BlockDecryptor,
    aad: &[u8],
) -> Result<Vec<u8>> {
    let ciphertext = read_length_framed(reader)?;
    decryptor.decrypt(&ciphertext, aad)
}

impl GantryError {
    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_aad_has_no_ordinals() {
        let aad = create_module_aad(b"prefix", ModuleType::Footer, 3, 4, None);
        assert_eq!(aad, b"prefix\x00");
    }

    #[test]
    fn data_page_aad_layout_and_update() {
        let mut aad = create_module_aad(b"f", ModuleType::DataPage, 1, 2, Some(0));
        assert_eq!(aad, [b'f', 2, 1, 0, 2, 0, 0, 0]);
        quick_update_page_aad(&mut aad, 0x0102);
        assert_eq!(&aad[aad.len() - 2..], &[0x02, 0x01]);
    }

    #[test]
    fn dictionary_aad_omits_page_ordinal() {
        let aad = create_module_aad(b"f", ModuleType::DictionaryPage, 1, 2, None);
        assert_eq!(aad.len(), 1 + 1 + 2 + 2);
    }
}
