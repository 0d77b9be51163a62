//! Growable bit set recording which slots of a [`BitmapPool`][crate::BitmapPool] are in use.
//!
//! Only the operations the bitmap pool needs are provided: grow, test, replace and the two
//! forward scans (first zero bit, next one bit). The bitmap never shrinks.

use num_integer::Integer;

/// The type used for storage words in the bitmap.
type Word = u64;

/// Number of bits in each storage word.
pub(crate) const BITS_PER_WORD: usize = Word::BITS as usize;

/// A bit vector that stores bits in 64-bit words, 1 meaning "slot in use".
///
/// Bits past `len_bits` in the last word are always zero.
#[derive(Clone, Debug, Default)]
pub(crate) struct SlotBitmap {
    words: Vec<Word>,
    len_bits: usize,
}

impl SlotBitmap {
    /// Creates a new, empty bitmap.
    pub(crate) const fn new() -> Self {
        Self {
            words: Vec::new(),
            len_bits: 0,
        }
    }

    /// Returns the number of bits in the bitmap.
    #[cfg(debug_assertions)]
    pub(crate) const fn len(&self) -> usize {
        self.len_bits
    }

    /// Number of storage words, including a trailing partial word.
    #[cfg(test)]
    pub(crate) fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Grows the bitmap to `len_bits`, with all new bits cleared.
    ///
    /// # Panics
    ///
    /// Panics if `len_bits` is less than the current length.
    pub(crate) fn grow(&mut self, len_bits: usize) {
        assert!(
            len_bits >= self.len_bits,
            "SlotBitmap cannot shrink from {} to {len_bits} bits",
            self.len_bits
        );

        // Bits past the old length in a partial last word are already zero, so resizing the
        // word vector with zeroes is all there is to it.
        self.words.resize(len_bits.div_ceil(BITS_PER_WORD), 0);
        self.len_bits = len_bits;
    }

    /// Returns the bit at `index`, treating out-of-range bits as cleared.
    pub(crate) fn get(&self, index: usize) -> bool {
        if index >= self.len_bits {
            return false;
        }

        let (word_index, bit_index) = index.div_rem(&BITS_PER_WORD);

        self.words
            .get(word_index)
            .is_some_and(|word| (word & (1 << bit_index)) != 0)
    }

    /// Replaces the bit at `index` with `value`, returning the old value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub(crate) fn replace(&mut self, index: usize, value: bool) -> bool {
        assert!(
            index < self.len_bits,
            "index {index} out of bounds for SlotBitmap of length {}",
            self.len_bits
        );

        let (word_index, bit_index) = index.div_rem(&BITS_PER_WORD);

        let word = self
            .words
            .get_mut(word_index)
            .expect("word exists for every in-bounds bit index");

        let old_value = (*word & (1 << bit_index)) != 0;

        if value {
            *word |= 1 << bit_index;
        } else {
            *word &= !(1 << bit_index);
        }

        old_value
    }

    /// Finds the lowest cleared bit, starting the search at word `start_word`.
    ///
    /// Returns `None` if every bit at or after `start_word` is set.
    pub(crate) fn first_zero(&self, start_word: usize) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .skip(start_word)
            .find(|(_, word)| **word != Word::MAX)
            .map(|(word_index, word)| {
                // Will not wrap because that would imply more bits than virtual memory.
                word_index
                    .wrapping_mul(BITS_PER_WORD)
                    .wrapping_add(word.trailing_ones() as usize)
            })
            .filter(|index| *index < self.len_bits)
    }

    /// Finds the lowest set bit at or after `from`.
    pub(crate) fn next_one(&self, from: usize) -> Option<usize> {
        if from >= self.len_bits {
            return None;
        }

        let (start_word, start_bit) = from.div_rem(&BITS_PER_WORD);

        for (word_index, word) in self.words.iter().enumerate().skip(start_word) {
            let masked = if word_index == start_word {
                word & (Word::MAX << start_bit)
            } else {
                *word
            };

            if masked != 0 {
                // Will not wrap because that would imply more bits than virtual memory.
                return Some(
                    word_index
                        .wrapping_mul(BITS_PER_WORD)
                        .wrapping_add(masked.trailing_zeros() as usize),
                );
            }
        }

        None
    }

    /// Number of set bits.
    #[cfg(debug_assertions)]
    pub(crate) fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}
