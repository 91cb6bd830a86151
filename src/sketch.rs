//! Fixed-memory summaries used while streaming a column.
//!
//! - [`CardinalityBitmap`]: linear-counting distinct estimate over a bitmap.
//! - [`Reservoir`]: uniform sample of bounded size from a stream of unknown
//!   length.
//!
//! Both keep memory independent of the row count.

use rand::Rng;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CardinalityBitmap {
    bits: usize,
    words: Vec<u64>,
}

impl CardinalityBitmap {
    pub fn new(bits: usize) -> Self {
        let bits = bits.max(1);
        Self {
            bits,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.bits
    }

    pub fn insert(&mut self, value: &str) {
        let idx = self.bit_index(value);
        self.words[idx / 64] |= 1u64 << (idx % 64);
    }

    pub fn set_bits(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `-B * ln(z / B)` where `z` is the number of unset bits, clamped to
    /// `[1, B]` once anything has been inserted.
    pub fn estimate(&self) -> usize {
        let set = self.set_bits();
        if set == 0 {
            return 0;
        }
        if set >= self.bits {
            return self.bits;
        }
        let total = self.bits as f64;
        let zero = (self.bits - set) as f64;
        let estimate = (-total * (zero / total).ln()).round();
        (estimate as usize).clamp(1, self.bits)
    }

    fn bit_index(&self, value: &str) -> usize {
        let digest = Sha256::digest(value.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.bits as u64) as usize
    }
}

#[derive(Debug, Clone)]
pub struct Reservoir<T> {
    capacity: usize,
    seen: u64,
    items: Vec<T>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(1024)),
        }
    }

    /// Offers the next stream element. Once full, the nth element replaces a
    /// random slot with probability `capacity / n`.
    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) {
        self.seen += 1;
        if self.capacity == 0 {
            return;
        }
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        let slot = rng.random_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.items[slot as usize] = item;
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}
