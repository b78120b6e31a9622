/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;
use core::num::NonZeroUsize;

/// Size of the smallest page on every supported architecture. Splitting at a
/// 4KiB boundary is also correct for larger page sizes.
const PAGE_SIZE: usize = 0x1000;

/// An address in some address space. We don't know where the memory lives; it
/// is almost always in another process, so it is never dereferenced.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Addr(NonZeroUsize);

impl Addr {
    /// Constructs an address from a raw syscall register value. Returns `None`
    /// for NULL.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Addr)
    }

    /// Returns the raw address.
    pub fn as_raw(self) -> usize {
        self.0.get()
    }

    /// Advances the address by `count` bytes. Returns `None` on overflow (the
    /// address would wrap around to NULL or past it).
    pub fn checked_add(self, count: usize) -> Option<Self> {
        self.as_raw().checked_add(count).and_then(Self::from_raw)
    }

    /// Number of bytes from this address to the start of the next page.
    pub fn bytes_to_page_end(self) -> usize {
        next_page(self.as_raw()) - self.as_raw()
    }

    /// Splits a read of `len` bytes starting at this address at the next page
    /// boundary. Returns `None` if the range does not span two pages. Both
    /// lengths are guaranteed to be non-zero.
    pub fn split_at_page_boundary(self, len: usize) -> Option<(usize, usize)> {
        let offset = self.bytes_to_page_end();
        if offset < len {
            Some((offset, len - offset))
        } else {
            None
        }
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.as_raw())
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Pointer for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Finds the boundary for the next page. Note that this is different than simply
/// aligning an address on a page boundary.
fn next_page(addr: usize) -> usize {
    (addr + PAGE_SIZE) & (!PAGE_SIZE + 1)
}
