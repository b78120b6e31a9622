/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;

use crate::Addr;
use crate::Errno;
use crate::MemoryAccess;

/// An address space made of explicitly mapped regions. Everything outside the
/// mapped regions faults. Used wherever a real tracee is not available.
#[derive(Clone, Debug, Default)]
pub struct SparseMemory {
    regions: BTreeMap<usize, Vec<u8>>,
}

impl SparseMemory {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `bytes` at `start`. A region already starting at `start` is
    /// replaced. Overlapping regions are not merged; the one starting closest
    /// below an address wins.
    pub fn map(&mut self, start: usize, bytes: Vec<u8>) -> &mut Self {
        self.regions.insert(start, bytes);
        self
    }

    /// Maps a NUL terminated copy of `s` at `start`.
    pub fn map_cstr(&mut self, start: usize, s: &str) -> &mut Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.map(start, bytes)
    }

    /// Removes the region starting at `start`, if any.
    pub fn unmap(&mut self, start: usize) -> Option<Vec<u8>> {
        self.regions.remove(&start)
    }

    fn region_for(&self, addr: usize) -> Option<&[u8]> {
        let (start, bytes) = self.regions.range(..=addr).next_back()?;
        let offset = addr - start;
        bytes.get(offset..).filter(|rest| !rest.is_empty())
    }
}

impl MemoryAccess for SparseMemory {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, Errno> {
        match self.region_for(addr.as_raw()) {
            Some(rest) => {
                let count = rest.len().min(buf.len());
                buf[..count].copy_from_slice(&rest[..count]);
                Ok(count)
            }
            None => Ok(0),
        }
    }
}
