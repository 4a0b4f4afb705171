// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Allow std-y things to be used in test. Note that this attribute is a bit of
// a trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]

//! Portable pieces of the kernel's user-memory checking.
//!
//! The kernel validates every address a task hands it against the windows of
//! address space that task legitimately owns: its RAM slot range, its
//! text/rodata slot range, the shared interrupt stack while running a
//! deferred interrupt handler, and any cross-task DMA buffer grants. All of
//! those windows are single contiguous ranges, so the checking algorithm
//! reduces to "is this slice entirely inside one of a small set of ranges,
//! without wrapping the address space".
//!
//! This crate holds that algorithm, expressed over two small traits so the
//! kernel's own types can plug in without this crate depending on them -- and
//! so the whole thing runs under `cargo test` on a development machine.

/// Describes types that act as "slices" (in the very abstract sense)
/// referenced by tasks in syscalls.
///
/// This is not the same thing as a Rust slice in the kernel, because this is
/// just a base-length pair --- taken by itself, it doesn't let you actually
/// _access_ the memory.
///
/// # Invariants
///
/// `s.is_empty()` implies `s.base_addr() == s.end_addr()`, and vice versa.
///
/// `s.base_addr() <= s.end_addr()` must hold -- in particular, a slice must
/// not wrap the end of the address space.
pub trait UserSlice {
    /// Checks whether the slice spans zero bytes. Empty slices are opted out
    /// of access checking to allow task code to use literals like `&[]`.
    fn is_empty(&self) -> bool;

    /// The address of the first byte included in this slice.
    fn base_addr(&self) -> usize;

    /// The address of the first byte _not_ included in this slice, past the
    /// end.
    fn end_addr(&self) -> usize;
}

impl<T: UserSlice> UserSlice for &T {
    #[inline(always)]
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }
}

/// Describes one contiguous window of address space a task may use.
///
/// # Invariants
///
/// `r.base_addr() <= r.end_addr()` must hold. An empty window is weird but
/// not impossible; it covers nothing.
pub trait MemoryWindow {
    fn base_addr(&self) -> usize;
    fn end_addr(&self) -> usize;
}

impl<T: MemoryWindow> MemoryWindow for &T {
    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }
}

/// Checks whether `slice` lies entirely inside `window`.
///
/// Unlike a paged system where an access may legitimately straddle many
/// mappings, task windows here are disjoint slot ranges: a slice that leaves
/// one window has left the task's authority, so containment in a *single*
/// window is the correct test.
///
/// Empty slices are accepted unconditionally. They confer no authority as far
/// as the kernel is concerned, and a literal like `&[]` tends to produce a
/// base address of `0 + sizeof::<T>()`, which is almost certainly outside any
/// window... but fine with us.
pub fn window_covers<S, W>(slice: S, window: W) -> bool
where
    S: UserSlice,
    W: MemoryWindow,
{
    if slice.is_empty() {
        return true;
    }
    window.base_addr() <= slice.base_addr() && slice.end_addr() <= window.end_addr()
}

/// Checks whether `slice` lies entirely inside at least one window of
/// `windows` satisfying the `window_ok` predicate.
///
/// Not all windows confer the same rights -- a DMA grant may be read-only,
/// for instance -- so callers supply a predicate to narrow the set.
pub fn any_window_covers<S, W, I>(slice: S, windows: I, window_ok: impl Fn(&W) -> bool) -> bool
where
    S: UserSlice,
    W: MemoryWindow,
    I: IntoIterator<Item = W>,
{
    if slice.is_empty() {
        return true;
    }
    windows
        .into_iter()
        .any(|w| window_ok(&w) && window_covers(&slice, w))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSlice {
        base: usize,
        size: usize,
    }

    impl UserSlice for TestSlice {
        fn is_empty(&self) -> bool {
            self.size == 0
        }

        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    struct TestWindow {
        base: usize,
        size: usize,
        writable: bool,
    }

    impl MemoryWindow for TestWindow {
        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    fn ram_slot() -> TestWindow {
        TestWindow {
            base: 0x2000_4000,
            size: 0x4000,
            writable: true,
        }
    }

    fn text_slot() -> TestWindow {
        TestWindow {
            base: 0x0809_0000,
            size: 0x1_0000,
            writable: false,
        }
    }

    #[test]
    fn slice_inside_window_is_covered() {
        let w = ram_slot();
        assert!(window_covers(
            TestSlice {
                base: w.base + 0x100,
                size: 0x200,
            },
            &w,
        ));
    }

    #[test]
    fn whole_window_is_covered() {
        let w = ram_slot();
        assert!(window_covers(
            TestSlice {
                base: w.base,
                size: w.size,
            },
            &w,
        ));
    }

    #[test]
    fn slice_leaking_past_either_edge_is_rejected() {
        let w = ram_slot();
        assert!(!window_covers(
            TestSlice {
                base: w.base - 4,
                size: 8,
            },
            &w,
        ));
        assert!(!window_covers(
            TestSlice {
                base: w.base + w.size - 4,
                size: 8,
            },
            &w,
        ));
    }

    #[test]
    fn adjacent_window_confers_nothing() {
        // A slice exactly one past the end must not be accepted, even though
        // it is "next to" owned memory.
        let w = ram_slot();
        assert!(!window_covers(
            TestSlice {
                base: w.base + w.size,
                size: 4,
            },
            &w,
        ));
    }

    #[test]
    fn empty_slice_is_always_covered() {
        let w = ram_slot();
        // Empty slices carry no authority; accept them anywhere, including
        // way outside the window.
        assert!(window_covers(TestSlice { base: 4, size: 0 }, &w));
        assert!(any_window_covers(
            TestSlice { base: 4, size: 0 },
            core::iter::empty::<&TestWindow>(),
            |_| true,
        ));
    }

    #[test]
    fn any_window_scans_all_windows() {
        let windows = [ram_slot(), text_slot()];
        assert!(any_window_covers(
            TestSlice {
                base: 0x0809_0010,
                size: 16,
            },
            windows.iter(),
            |_| true,
        ));
        assert!(!any_window_covers(
            TestSlice {
                base: 0x1000_0000,
                size: 16,
            },
            windows.iter(),
            |_| true,
        ));
    }

    #[test]
    fn predicate_narrows_authority() {
        let windows = [ram_slot(), text_slot()];
        let in_text = TestSlice {
            base: 0x0809_0010,
            size: 16,
        };
        // With a writability requirement, the text window must stop counting.
        assert!(!any_window_covers(in_text, windows.iter(), |w| w.writable));
    }

    #[test]
    fn slice_spanning_two_disjoint_windows_is_rejected() {
        // Even if two windows happen to be adjacent in the address space, a
        // slice crossing from one into the other exceeds single-window
        // authority and is refused.
        let a = TestWindow {
            base: 0x2000_0000,
            size: 0x4000,
            writable: true,
        };
        let b = TestWindow {
            base: 0x2000_4000,
            size: 0x4000,
            writable: true,
        };
        let spanning = TestSlice {
            base: 0x2000_3ff0,
            size: 0x20,
        };
        assert!(!any_window_covers(spanning, [a, b].iter(), |_| true));
    }
}
