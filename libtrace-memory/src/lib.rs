/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Read access to the address space of a traced process.
//!
//! Every read here is bounded: a syscall argument can point anywhere, so the
//! caller always states how much it is willing to copy out.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod addr;
mod sparse;

pub use addr::Addr;
pub use sparse::SparseMemory;
pub use syscalls::Errno;

/// Bytes copied out of another address space, plus whether the copy stopped
/// before the end of the data.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bounded {
    /// The bytes that were read. Never longer than the requested maximum.
    pub bytes: Vec<u8>,

    /// True if there was more data than we were allowed (or able) to read.
    pub truncated: bool,
}

/// Trait for reading potentially remote memory.
pub trait MemoryAccess {
    /// Performs a read starting at the given address. The number of bytes read
    /// is returned. The buffer is not guaranteed to be completely filled. A
    /// return value of `0` for a non-empty buffer means the first byte is not
    /// readable (page faults are treated as an EOF).
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Reads exactly the number of bytes wanted by `buf`.
    fn read_exact(&self, mut addr: Addr, mut buf: &mut [u8]) -> Result<(), Errno> {
        while !buf.is_empty() {
            match self.read(addr, buf)? {
                0 => break,
                n => {
                    buf = &mut buf[n..];
                    if buf.is_empty() {
                        break;
                    }
                    addr = addr.checked_add(n).ok_or(Errno::EFAULT)?;
                }
            }
        }

        if !buf.is_empty() {
            // Failed to fill the whole buffer.
            Err(Errno::EFAULT)
        } else {
            Ok(())
        }
    }

    /// Reads memory at the given starting address in chunks of at most
    /// `buf.len()` bytes until `pred` returns `Some(used)` or `limit` bytes
    /// have been consumed. `pred` is handed each chunk and returns how many
    /// bytes of it were used when it wants to stop.
    ///
    /// Returns the total number of bytes used and whether the predicate
    /// matched. Returns `EFAULT` if not even the first byte could be read.
    fn read_while<F>(
        &self,
        mut addr: Addr,
        buf: &mut [u8],
        limit: usize,
        mut pred: F,
    ) -> Result<(usize, bool), Errno>
    where
        F: FnMut(&[u8]) -> Option<usize>,
    {
        let mut count = 0;

        while count < limit {
            let want = buf.len().min(limit - count);
            let read = self.read(addr, &mut buf[..want])?;
            if read == 0 {
                // We hit an "EOF" (an EFAULT) before the predicate matched.
                return if count == 0 {
                    Err(Errno::EFAULT)
                } else {
                    Ok((count, false))
                };
            }

            if let Some(used) = pred(&buf[..read]) {
                return Ok((count + used, true));
            }

            count += read;

            addr = match addr.checked_add(read) {
                Some(next) => next,
                None => break,
            };
        }

        Ok((count, false))
    }

    /// Reads a NUL terminated string starting at the given address, copying at
    /// most `max` bytes. The terminator is not included. The result is
    /// truncated if no terminator was found within the first `max` bytes or if
    /// the string runs into unreadable memory.
    fn read_cstring(&self, addr: Addr, max: usize) -> Result<Bounded, Errno> {
        // Assume most strings are smallish. We need to balance the overhead of
        // copying data vs the average length of C-strings.
        let mut buf = [0u8; 512];
        let mut bytes = Vec::new();

        if max == 0 {
            return Ok(Bounded {
                bytes,
                truncated: true,
            });
        }

        let (_, terminated) = self.read_while(addr, &mut buf, max, |slice| {
            if let Some(nul) = slice.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&slice[..nul]);
                Some(nul)
            } else {
                bytes.extend_from_slice(slice);
                None
            }
        })?;

        Ok(Bounded {
            bytes,
            truncated: !terminated,
        })
    }

    /// Reads a buffer of `len` bytes, copying at most `max` of them.
    fn read_bytes(&self, addr: Addr, len: usize, max: usize) -> Result<Bounded, Errno> {
        let want = len.min(max);
        let mut bytes = vec![0u8; want];
        let mut filled = 0;
        let mut cursor = Some(addr);

        while filled < want {
            let at = match cursor {
                Some(at) => at,
                None => break,
            };
            match self.read(at, &mut bytes[filled..])? {
                0 => break,
                n => {
                    filled += n;
                    cursor = at.checked_add(n);
                }
            }
        }

        if filled == 0 && want > 0 {
            return Err(Errno::EFAULT);
        }

        bytes.truncate(filled);

        Ok(Bounded {
            bytes,
            truncated: len > filled,
        })
    }
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for &M {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, Errno> {
        (**self).read(addr, buf)
    }
}
