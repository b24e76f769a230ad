//! Flat bit set over a caller-owned word buffer.
//!
//! One bit per slot, packed 32 to a word. The frame allocator and the
//! per-address-space page maps are both built on these.

const BITS_PER_WORD: usize = u32::BITS as usize;

/// Number of words needed to hold `bits` bits.
pub const fn words_for(bits: usize) -> usize {
    (bits + BITS_PER_WORD - 1) / BITS_PER_WORD
}

/// Value of bit `pos`.
#[inline]
pub fn get(words: &[u32], pos: usize) -> bool {
    words[pos / BITS_PER_WORD] & (1 << (pos % BITS_PER_WORD)) != 0
}

/// Set bit `pos` to 1.
#[inline]
pub fn set(words: &mut [u32], pos: usize) {
    words[pos / BITS_PER_WORD] |= 1 << (pos % BITS_PER_WORD);
}

/// Set bit `pos` to 0.
#[inline]
pub fn reset(words: &mut [u32], pos: usize) {
    words[pos / BITS_PER_WORD] &= !(1 << (pos % BITS_PER_WORD));
}

/// Linear scan for the first bit in `start..size` whose value is `value`.
///
/// Whole words of the opposite value are skipped without testing each bit.
pub fn find_first(words: &[u32], value: bool, size: usize, start: usize) -> Option<usize> {
    let skip = if value { 0 } else { u32::MAX };
    let mut pos = start;
    while pos < size {
        if pos % BITS_PER_WORD == 0 && pos + BITS_PER_WORD <= size {
            if words[pos / BITS_PER_WORD] == skip {
                pos += BITS_PER_WORD;
                continue;
            }
        }
        if get(words, pos) == value {
            return Some(pos);
        }
        pos += 1;
    }
    None
}
