/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Reading the syscall registers of a stopped thread.

use core::mem::MaybeUninit;

use libtrace::Phase;
use libtrace::Pid;
use libtrace::RawCall;
use libtrace::MAX_ARGS;
use syscalls::Errno;
use syscalls::Sysno;

pub use libc::user_regs_struct as Regs;

/// `PTRACE_GET_SYSCALL_INFO`, available since Linux 5.3. libc does not export
/// it on every target.
const PTRACE_GET_SYSCALL_INFO: u32 = 0x420e;

const PTRACE_SYSCALL_INFO_ENTRY: u8 = 1;
const PTRACE_SYSCALL_INFO_EXIT: u8 = 2;

/// Architecture-independent access to the registers involved in a syscall.
pub trait RegAccess {
    /// The syscall number. Unlike the raw register on x86-64, this survives
    /// the syscall returning.
    fn orig_syscall(&self) -> u64;

    /// The syscall arguments in ABI order. On aarch64 the first argument
    /// register is clobbered by the return value at syscall exit.
    fn args(&self) -> [u64; MAX_ARGS];

    /// The return value register.
    fn ret(&self) -> u64;

    /// Snapshots the registers as a [`RawCall`].
    fn raw_call(&self) -> RawCall {
        RawCall::new(self.orig_syscall(), self.args()).with_ret(self.ret() as i64)
    }
}

#[cfg(target_arch = "x86_64")]
impl RegAccess for Regs {
    fn orig_syscall(&self) -> u64 {
        self.orig_rax
    }

    fn args(&self) -> [u64; MAX_ARGS] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    fn ret(&self) -> u64 {
        self.rax
    }
}

#[cfg(target_arch = "aarch64")]
impl RegAccess for Regs {
    fn orig_syscall(&self) -> u64 {
        self.regs[8]
    }

    fn args(&self) -> [u64; MAX_ARGS] {
        [
            self.regs[0],
            self.regs[1],
            self.regs[2],
            self.regs[3],
            self.regs[4],
            self.regs[5],
        ]
    }

    fn ret(&self) -> u64 {
        self.regs[0]
    }
}

/// Gets the general purpose registers of a stopped thread.
pub fn getregs(tid: Pid) -> Result<Regs, Errno> {
    let mut regs = MaybeUninit::<Regs>::uninit();

    let mut iov = libc::iovec {
        iov_base: regs.as_mut_ptr() as *mut libc::c_void,
        iov_len: core::mem::size_of::<Regs>(),
    };

    unsafe {
        syscalls::syscall!(
            Sysno::ptrace,
            // PTRACE_GETREGS isn't available on aarch64, so we must use
            // PTRACE_GETREGSET instead.
            libc::PTRACE_GETREGSET,
            tid.as_raw(),
            libc::NT_PRSTATUS,
            &mut iov as *mut _
        )
    }?;

    debug_assert_eq!(iov.iov_len, core::mem::size_of::<Regs>());

    Ok(unsafe { regs.assume_init() })
}

/// The leading part of `struct ptrace_syscall_info`. The kernel writes at
/// most as many bytes as we pass, so the union that follows is left out.
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct SyscallInfoHeader {
    op: u8,
    pad: [u8; 3],
    arch: u32,
    instruction_pointer: u64,
    stack_pointer: u64,
}

/// Asks the kernel whether a thread is stopped at a syscall entry or exit.
///
/// Returns `Ok(None)` if the stop is not a syscall stop as far as the kernel
/// is concerned. Returns `EIO` or `EINVAL` if the kernel predates the request.
pub fn syscall_phase(tid: Pid) -> Result<Option<Phase>, Errno> {
    let mut info = SyscallInfoHeader::default();

    unsafe {
        syscalls::syscall!(
            Sysno::ptrace,
            PTRACE_GET_SYSCALL_INFO,
            tid.as_raw(),
            core::mem::size_of::<SyscallInfoHeader>(),
            &mut info as *mut _
        )
    }?;

    Ok(match info.op {
        PTRACE_SYSCALL_INFO_ENTRY => Some(Phase::Enter),
        PTRACE_SYSCALL_INFO_EXIT => Some(Phase::Exit),
        _ => None,
    })
}
