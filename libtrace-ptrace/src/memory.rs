/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use libtrace::Pid;
use libtrace_memory::Addr;
use libtrace_memory::MemoryAccess;
use syscalls::Errno;

/// The address space of a traced thread, read with `process_vm_readv(2)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RemoteMemory {
    pid: Pid,
}

impl RemoteMemory {
    /// Accesses the memory of `pid`. The thread should be stopped, otherwise
    /// the contents may change under our feet.
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Does a vectored read from the remote address space into `buf`. Returns
    /// the number of bytes read.
    ///
    /// Partial transfers happen at the granularity of the remote iovecs (see
    /// `man 2 process_vm_readv`).
    fn read_vectored(&self, remote: &[libc::iovec], buf: &mut [u8]) -> Result<usize, Errno> {
        let local = [libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        }];

        Errno::result(unsafe {
            libc::process_vm_readv(
                self.pid.as_raw(),
                local.as_ptr(),
                local.len() as libc::c_ulong,
                remote.as_ptr(),
                remote.len() as libc::c_ulong,
                0,
            )
        })
        .map(|x| x as usize)
        .or_else(|err| {
            if err == Errno::EFAULT {
                // Treat page faults as an EOF.
                Ok(0)
            } else {
                Err(err)
            }
        })
    }
}

fn iovec(base: usize, len: usize) -> libc::iovec {
    libc::iovec {
        iov_base: base as *mut libc::c_void,
        iov_len: len,
    }
}

impl MemoryAccess for RemoteMemory {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, Errno> {
        if buf.is_empty() {
            return Ok(0);
        }

        let base = addr.as_raw();

        // A read spanning a page boundary is split in two so that an unmapped
        // second page still lets us get the bytes of the first one.
        match addr.split_at_page_boundary(buf.len()) {
            Some((first, second)) => {
                self.read_vectored(&[iovec(base, first), iovec(base + first, second)], buf)
            }
            None => self.read_vectored(&[iovec(base, buf.len())], buf),
        }
    }
}
