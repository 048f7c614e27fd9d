//! Split-block bloom filter.
//!
//! The on-disk structure is a sequence of 32-byte blocks; a value hashes to
//! one block (high 32 hash bits scaled by the block count) and to one bit in
//! each of the block's eight words (low 32 bits spread by the fixed salt).
//! Values are hashed with XXH64, seed 0, over their plain encoding.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::predicate::Value;

const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

/// Number of bytes in one bloom block.
pub(crate) const BLOCK_BYTES: usize = 32;

/// Largest bitset the reader accepts, matching the writer-side bound.
pub(crate) const UPPER_BOUND_BYTES: usize = 128 * 1024 * 1024;

/// An immutable split-block bloom filter read back from a file.
#[derive(Debug, Clone)]
pub struct Sbbf {
    blocks: Vec<[u32; 8]>,
}

impl Sbbf {
    /// Wrap a raw bitset. The length must be a whole number of blocks;
    /// trailing partial blocks are dropped (a filter truncated that way can
    /// only produce false positives, never false negatives).
    pub fn new(bitset: &[u8]) -> Self {
        let blocks = bitset
            .chunks_exact(BLOCK_BYTES)
            .map(|chunk| {
                let mut block = [0u32; 8];
                for (word, bytes) in block.iter_mut().zip(chunk.chunks_exact(4)) {
                    *word = u32::from_le_bytes(bytes.try_into().unwrap());
                }
                block
            })
            .collect();
        Self { blocks }
    }

    /// Membership check for a plain-encoded value.
    pub fn check_bytes(&self, value: &[u8]) -> bool {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(value);
        self.check_hash(hasher.finish())
    }

    /// Membership check for a predicate literal. Returns `None` when the
    /// value kind has no defined plain encoding for bloom purposes.
    pub fn check(&self, value: &Value) -> Option<bool> {
        value.plain_encoded().map(|bytes| self.check_bytes(&bytes))
    }

    fn check_hash(&self, hash: u64) -> bool {
        if self.blocks.is_empty() {
            return true;
        }
        let index = (((hash >> 32) * self.blocks.len() as u64) >> 32) as usize;
        let block = &self.blocks[index];
        let key = hash as u32;
        for (word, salt) in block.iter().zip(SALT) {
            let bit = 1u32 << (key.wrapping_mul(salt) >> 27);
            if word & bit == 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Writer-side insert, kept test-only: the crate never builds filters.
    fn insert(blocks: &mut [[u32; 8]], value: &[u8]) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(value);
        let hash = hasher.finish();
        let index = (((hash >> 32) * blocks.len() as u64) >> 32) as usize;
        let key = hash as u32;
        for (word, salt) in blocks[index].iter_mut().zip(SALT) {
            *word |= 1u32 << (key.wrapping_mul(salt) >> 27);
        }
    }

    fn bitset(blocks: &[[u32; 8]]) -> Vec<u8> {
        blocks
            .iter()
            .flat_map(|b| b.iter().flat_map(|w| w.to_le_bytes()))
            .collect()
    }

    #[test]
    fn inserted_values_are_found() {
        let mut blocks = vec![[0u32; 8]; 4];
        for v in [1i32, 7, 42, 1000] {
            insert(&mut blocks, &v.to_le_bytes());
        }
        let sbbf = Sbbf::new(&bitset(&blocks));
        for v in [1i32, 7, 42, 1000] {
            assert!(sbbf.check_bytes(&v.to_le_bytes()));
        }
    }

    #[test]
    fn absent_value_is_rejected_in_sparse_filter() {
        let mut blocks = vec![[0u32; 8]; 8];
        insert(&mut blocks, &5i32.to_le_bytes());
        let sbbf = Sbbf::new(&bitset(&blocks));
        // A single insertion leaves almost every bit clear; a miss here
        // would mean the probe diverged from the writer's hashing.
        let misses = (100..200)
            .filter(|v: &i32| !sbbf.check_bytes(&v.to_le_bytes()))
            .count();
        assert!(misses > 90);
    }

    #[test]
    fn empty_filter_answers_maybe() {
        let sbbf = Sbbf::new(&[]);
        assert!(sbbf.check_bytes(b"anything"));
    }
}
