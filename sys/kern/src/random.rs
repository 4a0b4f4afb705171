// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filtered access to the hardware random source.
//!
//! The raw generator output passes a start-up and continuity filter before
//! any byte reaches a task: the first word after boot is discarded, and a
//! word equal to its predecessor is rejected and refetched, with a bounded
//! number of attempts before the whole request fails closed. This is the
//! classic catch for a generator that has quietly died and latched its last
//! value.

use crate::soc::{self, TrngError};

/// Attempts to fetch an acceptable word before giving up.
const MAX_RETRIES: usize = 16;

/// Continuity-filter state, part of the kernel executive.
#[derive(Debug, Default)]
pub struct RngFilter {
    /// Last word released, once the start-up discard has happened.
    last: Option<u32>,
}

impl RngFilter {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Draws one filtered word from `source`.
    pub fn next_word(
        &mut self,
        mut source: impl FnMut() -> Result<u32, TrngError>,
    ) -> Result<u32, TrngError> {
        if self.last.is_none() {
            // Start-up: throw the first word away.
            let _ = source()?;
            self.last = Some(source()?);
        }

        for _ in 0..MAX_RETRIES {
            let w = source()?;
            if Some(w) != self.last {
                self.last = Some(w);
                return Ok(w);
            }
            // Repeated output; suspect the generator and try again.
        }
        Err(TrngError::SeedError)
    }

    /// Fills `buf` with filtered random bytes. A trailing partial word is
    /// cut from one extra fetch, so `buf.len()` need not be a multiple of
    /// four.
    pub fn fill_from(
        &mut self,
        buf: &mut [u8],
        mut source: impl FnMut() -> Result<u32, TrngError>,
    ) -> Result<(), TrngError> {
        let mut chunks = buf.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_word(&mut source)?.to_le_bytes());
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let w = self.next_word(&mut source)?.to_le_bytes();
            tail.copy_from_slice(&w[..tail.len()]);
        }
        Ok(())
    }
}

impl crate::kernel::Kernel {
    /// Fills `buf` from the hardware generator.
    pub fn random_fill(&mut self, buf: &mut [u8]) -> Result<(), TrngError> {
        self.rng.fill_from(buf, soc::trng_word)
    }

    /// Draws one word from the hardware generator, for kernel-internal use
    /// (the random scheduling policy).
    pub fn random_word(&mut self) -> Result<u32, TrngError> {
        self.rng.next_word(soc::trng_word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(words: &'static [u32]) -> impl FnMut() -> Result<u32, TrngError> {
        let mut i = 0;
        move || {
            let w = words[i % words.len()];
            i += 1;
            Ok(w)
        }
    }

    #[test]
    fn first_word_is_discarded() {
        let mut f = RngFilter::new();
        let w = f.next_word(seq(&[0x1111, 0x2222, 0x3333])).unwrap();
        // 0x1111 discarded at start-up, 0x2222 primes the filter, 0x3333 is
        // the first released word.
        assert_eq!(w, 0x3333);
    }

    #[test]
    fn repeated_words_are_skipped() {
        let mut f = RngFilter::new();
        let mut src = seq(&[1, 2, 2, 2, 5, 6, 7, 8]);
        assert_eq!(f.next_word(&mut src).unwrap(), 5);
        assert_eq!(f.next_word(&mut src).unwrap(), 6);
    }

    #[test]
    fn stuck_generator_fails_closed() {
        let mut f = RngFilter::new();
        let mut src = || Ok(0xdead_beef);
        assert_eq!(f.next_word(&mut src), Err(TrngError::SeedError));
    }

    #[test]
    fn hardware_error_propagates() {
        let mut f = RngFilter::new();
        let mut src = || Err(TrngError::ClockError);
        assert_eq!(f.next_word(&mut src), Err(TrngError::ClockError));
    }

    #[test]
    fn fill_handles_unaligned_tails() {
        let mut f = RngFilter::new();
        let mut counter = 0u32;
        let mut src = move || {
            counter += 1;
            Ok(counter)
        };

        let mut buf = [0u8; 7];
        f.fill_from(&mut buf, &mut src).unwrap();
        // Words 1 and 2 are consumed by the start-up filter; word 3 fills
        // the first four bytes, word 4 the three-byte tail.
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..], &4u32.to_le_bytes()[..3]);
    }

    #[test]
    fn zero_length_fill_is_a_noop() {
        let mut f = RngFilter::new();
        let mut calls = 0;
        let mut source = || {
            calls += 1;
            Ok(7u32)
        };
        f.fill_from(&mut [], &mut source).unwrap();
        assert_eq!(calls, 0);
    }
}
