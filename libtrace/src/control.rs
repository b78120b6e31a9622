/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The interface between the trace loop and whatever stops and resumes the
//! traced threads.

use core::fmt;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use libtrace_memory::MemoryAccess;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde::Serialize;
use syscalls::Errno;
use thiserror::Error;

use crate::process::ExitStatus;
use crate::process::Pid;
use crate::signature::MAX_ARGS;
use crate::value::Phase;

/// The raw state of a thread stopped at a syscall.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct RawCall {
    /// The syscall number.
    pub nr: u64,

    /// The six argument registers, in syscall ABI order.
    pub args: [u64; MAX_ARGS],

    /// The return register, as a signed value. Meaningless on entry.
    pub ret: i64,
}

impl RawCall {
    /// Creates a snapshot from a syscall number and its arguments.
    pub fn new(nr: u64, args: [u64; MAX_ARGS]) -> Self {
        Self { nr, args, ret: 0 }
    }

    /// Sets the return value.
    pub fn with_ret(mut self, ret: i64) -> Self {
        self.ret = ret;
        self
    }
}

/// Why a traced thread stopped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Stop {
    /// Stopped at a syscall entry or exit. `hint` is the phase as reported by
    /// the kernel, when the backend can find out.
    Syscall {
        /// The stopped thread.
        tid: Pid,
        /// The phase, if known.
        hint: Option<Phase>,
    },

    /// Stopped for delivery of a signal. The signal is delivered on resume.
    Signal {
        /// The stopped thread.
        tid: Pid,
        /// The pending signal.
        signal: Signal,
    },

    /// A traced thread created a new thread or process, which is traced too.
    /// Only `parent` is stopped.
    NewThread {
        /// The stopped thread.
        parent: Pid,
        /// The new thread.
        child: Pid,
    },

    /// A traced thread completed an `execve`. If a thread other than the
    /// group leader called it, it now has the leader's tid and its former tid
    /// is gone without an exit status.
    Exec {
        /// The stopped thread, under its new tid.
        tid: Pid,
        /// The tid of the thread that called `execve`.
        former: Pid,
    },

    /// Any other stop (group-stop, interrupt) that only needs to be resumed.
    /// Group-stops are resumed like any other stop, so a traced program does
    /// not stay stopped by `SIGSTOP`.
    Event {
        /// The stopped thread.
        tid: Pid,
    },

    /// The thread is gone. It must not be resumed.
    Exited {
        /// The thread that exited.
        tid: Pid,
        /// How it exited.
        status: ExitStatus,
    },

    /// The cancel token fired. Nothing is stopped.
    Cancelled,
}

impl Stop {
    /// The thread that needs to be resumed after this stop, if any.
    pub fn stopped_thread(&self) -> Option<Pid> {
        match self {
            Stop::Syscall { tid, .. }
            | Stop::Signal { tid, .. }
            | Stop::Exec { tid, .. }
            | Stop::Event { tid } => Some(*tid),
            Stop::NewThread { parent, .. } => Some(*parent),
            Stop::Exited { .. } | Stop::Cancelled => None,
        }
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stop::Syscall { tid, hint: Some(phase) } => {
                write!(f, "[{}] syscall {}", tid.colored(), phase)
            }
            Stop::Syscall { tid, hint: None } => write!(f, "[{}] syscall", tid.colored()),
            Stop::Signal { tid, signal } => write!(f, "[{}] signal {}", tid.colored(), signal),
            Stop::NewThread { parent, child } => {
                write!(f, "[{}] new thread {}", parent.colored(), child.colored())
            }
            Stop::Exec { tid, former } if tid == former => {
                write!(f, "[{}] exec", tid.colored())
            }
            Stop::Exec { tid, former } => {
                write!(f, "[{}] exec from {}", tid.colored(), former.colored())
            }
            Stop::Event { tid } => write!(f, "[{}] event", tid.colored()),
            Stop::Exited { tid, status } => write!(f, "[{}] {}", tid.colored(), status),
            Stop::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// An error from the process-control backend.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The thread died while it was supposed to be stopped (e.g. another thread
    /// called `exit_group`). Only that thread is affected.
    #[error("thread {0} is gone")]
    Gone(Pid),

    /// Not allowed to trace the target.
    #[error("permission denied: {0}")]
    Permission(Errno),

    /// A request was interrupted and may be retried.
    #[error("transient failure: {0}")]
    Transient(Errno),

    /// Any other low-level errno.
    #[error(transparent)]
    Errno(Errno),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ControlError {
    /// Classifies an errno returned by a request about `tid`.
    pub fn from_errno(tid: Pid, errno: Errno) -> Self {
        match errno {
            Errno::ESRCH => ControlError::Gone(tid),
            Errno::EPERM => ControlError::Permission(errno),
            Errno::EINTR | Errno::EAGAIN => ControlError::Transient(errno),
            errno => ControlError::Errno(errno),
        }
    }
}

/// Stops, inspects and resumes traced threads.
///
/// The trace loop calls [`Control::wait`] and for every stop it gets back (other
/// than an exit or a cancellation) it calls [`Control::resume`] exactly once.
pub trait Control {
    /// Memory of a stopped thread.
    type Memory<'a>: MemoryAccess
    where
        Self: 'a;

    /// The process whose exit status is reported at the end of the run.
    fn root(&self) -> Pid;

    /// Blocks until a traced thread changes state or `cancel` fires. Returns
    /// `Ok(None)` once nothing is traced anymore.
    fn wait(&mut self, cancel: &CancelToken) -> Result<Option<Stop>, ControlError>;

    /// Reads the syscall number, arguments and return value of a thread
    /// stopped at a syscall.
    fn syscall_state(&mut self, tid: Pid) -> Result<RawCall, ControlError>;

    /// Gives access to the memory of a stopped thread.
    fn memory(&self, tid: Pid) -> Self::Memory<'_>;

    /// Resumes a stopped thread until its next syscall stop, delivering
    /// `signal` if one is given.
    fn resume(&mut self, tid: Pid, signal: Option<Signal>) -> Result<(), ControlError>;

    /// Stops tracing every thread and lets them run freely.
    fn detach(&mut self) -> Result<(), ControlError>;
}

type Waker = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Stops a running trace from another thread. Cloning the token gives
/// another handle to the same cancellation.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Creates a new token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Only the first call has an effect.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            for wake in self.state.wakers.lock().iter() {
                wake();
            }
        }
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Registers a function to run when the token is cancelled. If it already
    /// is, the function runs immediately.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut wakers = self.state.wakers.lock();
        if self.is_cancelled() {
            drop(wakers);
            f();
        } else {
            wakers.push(Box::new(f));
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn classify_errno() {
        let tid = Pid::from_raw(5);
        assert!(matches!(
            ControlError::from_errno(tid, Errno::ESRCH),
            ControlError::Gone(t) if t == tid
        ));
        assert!(matches!(
            ControlError::from_errno(tid, Errno::EPERM),
            ControlError::Permission(Errno::EPERM)
        ));
        assert!(matches!(
            ControlError::from_errno(tid, Errno::EINTR),
            ControlError::Transient(Errno::EINTR)
        ));
        assert!(matches!(
            ControlError::from_errno(tid, Errno::EIO),
            ControlError::Errno(Errno::EIO)
        ));
    }

    #[test]
    fn cancel_wakes_once() {
        let token = CancelToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let other = token.clone();
        assert!(!other.is_cancelled());
        other.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Registering after the fact runs right away.
        let c = count.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_thread() {
        let tid = Pid::from_raw(1);
        assert_eq!(
            Stop::Syscall { tid, hint: None }.stopped_thread(),
            Some(tid)
        );
        assert_eq!(
            Stop::NewThread {
                parent: tid,
                child: Pid::from_raw(2)
            }
            .stopped_thread(),
            Some(tid)
        );
        assert_eq!(
            Stop::Exited {
                tid,
                status: ExitStatus::SUCCESS
            }
            .stopped_thread(),
            None
        );
    }
}
