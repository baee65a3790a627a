//! N-way XOR accumulation
//!
//! Folds up to [`MAX_XOR_SOURCES`] equally sized source slices into a
//! destination in a single pass over memory. Wide words are processed first,
//! then the byte tail.

use smallvec::SmallVec;

use super::geometry::MAX_XOR_SOURCES;

/// Source slices for one accumulation. Never spills to the heap.
pub type XorSources<'a> = SmallVec<[&'a [u8]; MAX_XOR_SOURCES]>;

const WORD: usize = std::mem::size_of::<u64>();

/// XOR every source into `dest`.
///
/// # Panics
///
/// Panics if there are no sources, more than [`MAX_XOR_SOURCES`], or if any
/// source length differs from the destination.
pub fn xor_into(dest: &mut [u8], sources: &[&[u8]]) {
    assert!(
        !sources.is_empty() && sources.len() <= MAX_XOR_SOURCES,
        "xor accumulation takes 1..={} sources, got {}",
        MAX_XOR_SOURCES,
        sources.len()
    );
    for (i, src) in sources.iter().enumerate() {
        assert_eq!(
            src.len(),
            dest.len(),
            "xor source {} is {} bytes, destination is {}",
            i,
            src.len(),
            dest.len()
        );
    }

    let split = dest.len() - dest.len() % WORD;
    let (dest_words, dest_tail) = dest.split_at_mut(split);

    for (w, chunk) in dest_words.chunks_exact_mut(WORD).enumerate() {
        let offset = w * WORD;
        let mut acc = read_word(chunk);
        for src in sources {
            acc ^= read_word(&src[offset..offset + WORD]);
        }
        chunk.copy_from_slice(&acc.to_ne_bytes());
    }

    for (i, byte) in dest_tail.iter_mut().enumerate() {
        let offset = split + i;
        for src in sources {
            *byte ^= src[offset];
        }
    }
}

#[inline(always)]
fn read_word(bytes: &[u8]) -> u64 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(bytes);
    u64::from_ne_bytes(word)
}
