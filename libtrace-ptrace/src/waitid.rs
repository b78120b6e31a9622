/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! `waitpid` on top of the `waitid` syscall.
//!
//! `waitid` can leave a status in place (`WNOWAIT`) and reports through a
//! `siginfo_t`, which we fold back into the compact status word `waitpid`
//! would have returned so that the usual `WIFSTOPPED` and friends apply.

use std::mem::MaybeUninit;

use nix::sys::wait::WaitPidFlag;
use syscalls::Errno;

use libtrace::Pid;

/// Returns the raw siginfo from a waitid call on a single pid.
fn waitid_si(pid: Pid, flags: WaitPidFlag) -> Result<libc::siginfo_t, Errno> {
    let mut siginfo = MaybeUninit::<libc::siginfo_t>::zeroed();

    Errno::result(unsafe {
        libc::waitid(
            libc::P_PID,
            pid.as_raw() as libc::id_t,
            siginfo.as_mut_ptr(),
            flags.bits(),
        )
    })?;

    Ok(unsafe { siginfo.assume_init() })
}

/// Folds a siginfo into a `waitpid`-style status word.
fn siginfo_to_status(si: &libc::siginfo_t) -> Result<i32, Errno> {
    let si_status = unsafe { si.si_status() };

    Ok(match si.si_code {
        libc::CLD_EXITED => (si_status & 0xff) << 8,
        libc::CLD_KILLED => si_status & 0x7f,
        libc::CLD_DUMPED => (si_status & 0x7f) | 0x80,
        // For ptrace stops `si_status` also carries the event in its upper
        // bits, exactly where `waitpid` puts them.
        libc::CLD_TRAPPED => (si_status << 8) | 0x7f,
        libc::CLD_STOPPED => (si_status << 8) | 0x7f,
        libc::CLD_CONTINUED => 0xffff,
        _ => return Err(Errno::EINVAL),
    })
}

/// Waits for `pid` to change state and returns its raw status. Returns
/// `Ok(None)` if `WNOHANG` was given and nothing happened yet. `EINTR` is
/// retried.
pub fn waitpid(pid: Pid, flags: WaitPidFlag) -> Result<Option<i32>, Errno> {
    loop {
        let si = match waitid_si(pid, flags) {
            Err(Errno::EINTR) => continue,
            result => result?,
        };

        if unsafe { si.si_pid() } == 0 {
            // Still alive.
            return Ok(None);
        }

        return siginfo_to_status(&si).map(Some);
    }
}
