// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// Measured in ticks of the system timer. The reference configuration runs
/// the timer at 1 kHz, making a tick a millisecond.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Returns the timestamp `ms` milliseconds after `self`.
    ///
    /// Saturates instead of wrapping; a 64-bit tick counter will not
    /// legitimately overflow, so a wrap would mean corruption and a
    /// saturated deadline merely postpones a wake-up.
    pub fn after_millis(self, ms: u32) -> Timestamp {
        Timestamp(self.0.saturating_add(u64::from(ms)))
    }

    /// Raw tick count, which doubles as milliseconds since boot.
    pub fn millis(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<[u32; 2]> for Timestamp {
    fn from(v: [u32; 2]) -> Self {
        Self::from(u64::from(v[0]) | u64::from(v[1]) << 32)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
