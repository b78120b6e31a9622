/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! # Waiting for tracees without `waitpid(-1)`
//!
//! Calling `waitpid(-1)` in the tracer would scoop up events for every child
//! of the current process, including the ones we are not tracing. It also
//! cannot be woken up by anything but a child changing state, which makes
//! cancellation from another thread impossible.
//!
//! Instead, we spawn one thread per traced thread that calls `waitid` in a
//! loop on that thread's ID only. Each status is queued and the tracer thread
//! is woken up through a doorbell (a condition variable). The tracer thread
//! pops statuses in arrival order and is the only thread that ever issues
//! ptrace requests, since ptrace requires the requests to come from the thread
//! that attached.
//!
//! Cancelling rings the same doorbell.
//!
//! A waiter thread exits after delivering the final exit status of its thread.
//! Waiters for threads we detached from keep blocking until that thread exits
//! or the process ends.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;

use nix::sys::wait::WaitPidFlag;
use parking_lot::Condvar;
use parking_lot::Mutex;
use syscalls::Errno;
use tracing::debug;
use tracing::warn;

use libtrace::Pid;

use crate::waitid;

/// What the doorbell rang for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Ring {
    /// A thread changed state. The status has been consumed.
    Status(Pid, i32),
    /// Cancellation was requested.
    Cancelled,
    /// Nothing is being waited on anymore.
    Idle,
}

#[derive(Debug, Default)]
struct Inbox {
    statuses: VecDeque<(Pid, i32)>,
    workers: usize,
    cancelled: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Notifier {
    inbox: Mutex<Inbox>,
    doorbell: Condvar,
}

/// Waits on a thread and returns the raw status. Returns `None` if the thread
/// can no longer be waited on.
fn wait(pid: Pid) -> Option<i32> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::__WALL;
    match waitid::waitpid(pid, flags) {
        Ok(status) => status,
        Err(Errno::ECHILD) => None,
        Err(err) => {
            warn!(%pid, "waitid failed: {}", err);
            None
        }
    }
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts waiting on `pid` in the background.
    pub fn watch(self: &Arc<Self>, pid: Pid) -> io::Result<()> {
        self.inbox.lock().workers += 1;

        let notifier = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("tracee-{}", pid))
            .spawn(move || notifier.worker(pid));

        if let Err(err) = spawned {
            self.retire();
            return Err(err);
        }

        Ok(())
    }

    fn worker(&self, pid: Pid) {
        while let Some(status) = wait(pid) {
            let last = libc::WIFEXITED(status) || libc::WIFSIGNALED(status);

            self.inbox.lock().statuses.push_back((pid, status));
            self.doorbell.notify_all();

            if last {
                break;
            }
        }

        debug!(%pid, "waiter done");
        self.retire();
    }

    fn retire(&self) {
        self.inbox.lock().workers -= 1;
        self.doorbell.notify_all();
    }

    /// Wakes up `next` with [`Ring::Cancelled`].
    pub fn cancel(&self) {
        self.inbox.lock().cancelled = true;
        self.doorbell.notify_all();
    }

    /// Blocks until a status is available. Cancellation is only reported if
    /// `cancellable` is set; statuses are still delivered after a
    /// cancellation otherwise.
    pub fn next(&self, cancellable: bool) -> Ring {
        let mut inbox = self.inbox.lock();
        loop {
            if cancellable && inbox.cancelled {
                return Ring::Cancelled;
            }

            if let Some((pid, status)) = inbox.statuses.pop_front() {
                return Ring::Status(pid, status);
            }

            if inbox.workers == 0 {
                return Ring::Idle;
            }

            self.doorbell.wait(&mut inbox);
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal;
    use nix::sys::signal::Signal;
    use nix::unistd::fork;
    use nix::unistd::ForkResult;

    use super::*;

    fn child(code: i32) -> Pid {
        match unsafe { fork() }.unwrap() {
            ForkResult::Parent { child, .. } => child.into(),
            ForkResult::Child => unsafe { libc::_exit(code) },
        }
    }

    #[test]
    fn idle_without_watchers() {
        assert_eq!(Notifier::new().next(true), Ring::Idle);
    }

    #[test]
    fn delivers_exit_then_idles() {
        let notifier = Notifier::new();
        let pid = child(3);
        notifier.watch(pid).unwrap();

        match notifier.next(true) {
            Ring::Status(p, status) => {
                assert_eq!(p, pid);
                assert!(libc::WIFEXITED(status));
                assert_eq!(libc::WEXITSTATUS(status), 3);
            }
            ring => panic!("unexpected {:?}", ring),
        }
        assert_eq!(notifier.next(true), Ring::Idle);
    }

    #[test]
    fn cancel_wakes_waiter() {
        let notifier = Notifier::new();
        let pid = match unsafe { fork() }.unwrap() {
            ForkResult::Parent { child, .. } => Pid::from(child),
            ForkResult::Child => loop {
                std::thread::sleep(std::time::Duration::from_millis(100));
            },
        };
        notifier.watch(pid).unwrap();

        let other = notifier.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            other.cancel();
        });

        assert_eq!(notifier.next(true), Ring::Cancelled);
        canceller.join().unwrap();

        signal::kill(pid.into(), Signal::SIGKILL).unwrap();
        match notifier.next(false) {
            Ring::Status(p, status) => {
                assert_eq!(p, pid);
                assert!(libc::WIFSIGNALED(status));
            }
            ring => panic!("unexpected {:?}", ring),
        }
    }
}
