/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;
use std::collections::HashSet;
use std::ffi::CString;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use nix::sys::ptrace;
use nix::sys::signal;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitPidFlag;
use nix::unistd;
use nix::unistd::ForkResult;
use syscalls::Errno;
use syscalls::Sysno;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use libtrace::CancelToken;
use libtrace::Control;
use libtrace::ControlError;
use libtrace::ExitStatus;
use libtrace::Phase;
use libtrace::Pid;
use libtrace::RawCall;
use libtrace::Stop;

use crate::memory::RemoteMemory;
use crate::notifier::Notifier;
use crate::notifier::Ring;
use crate::regs;
use crate::regs::RegAccess;
use crate::waitid;

/// Where we think a tracee is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Running,
    Stopped {
        /// A pending signal that has no [`Signal`] equivalent (real-time
        /// signals). It is delivered on resume.
        unmapped_signal: Option<i32>,
    },
}

/// Controls traced threads with `ptrace(2)`.
///
/// All ptrace requests must come from the thread that attached, so this
/// should be created and used on the same thread.
pub struct PtraceControl {
    root: Pid,
    tracees: HashMap<Pid, State>,
    notifier: Arc<Notifier>,
    /// Cleared once the kernel turns out not to support
    /// `PTRACE_GET_SYSCALL_INFO`.
    info_supported: bool,
    cancel_hooked: bool,
}

fn options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACESYSGOOD
        | ptrace::Options::PTRACE_O_TRACECLONE
        | ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACEEXEC
}

fn nix_errno(err: nix::errno::Errno) -> Errno {
    Errno::new(err as i32)
}

/// Issues a resuming ptrace request (`PTRACE_SYSCALL`, `PTRACE_CONT`,
/// `PTRACE_DETACH`), delivering `signal` if it is not zero.
fn restart(request: libc::c_uint, tid: Pid, signal: i32) -> Result<(), Errno> {
    unsafe { syscalls::syscall!(Sysno::ptrace, request, tid.as_raw(), 0, signal) }.map(drop)
}

fn interrupt(tid: Pid) -> Result<(), Errno> {
    // nix doesn't provide `ptrace::interrupt` yet.
    unsafe { syscalls::syscall!(Sysno::ptrace, libc::PTRACE_INTERRUPT, tid.as_raw(), 0, 0) }
        .map(drop)
}

/// Lists the threads of a process.
fn tasks(pid: Pid) -> Result<Vec<Pid>, ControlError> {
    let entries = fs::read_dir(format!("/proc/{}/task", pid)).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ControlError::Gone(pid)
        } else {
            ControlError::Io(err)
        }
    })?;

    let mut tids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            tids.push(Pid::from_raw(tid));
        }
    }

    Ok(tids)
}

fn to_cstring(s: &OsStr) -> Result<CString, ControlError> {
    CString::new(s.as_bytes())
        .map_err(|err| ControlError::Io(io::Error::new(io::ErrorKind::InvalidInput, err)))
}

impl PtraceControl {
    fn new(root: Pid) -> Self {
        Self {
            root,
            tracees: HashMap::new(),
            notifier: Notifier::new(),
            info_supported: true,
            cancel_hooked: false,
        }
    }

    /// Starts `program` with the given arguments (not including `argv[0]`)
    /// under tracing. `PATH` is searched like the shell would. The program is
    /// killed if the tracer exits.
    ///
    /// If the program cannot be executed, the child exits with status 127.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self, ControlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        // Allocate before forking. Only async-signal-safe calls are allowed in
        // the child.
        let program = to_cstring(program.as_ref())?;
        let mut argv = vec![program.clone()];
        for arg in args {
            argv.push(to_cstring(arg.as_ref())?);
        }

        let child = match unsafe { unistd::fork() }.map_err(io::Error::from)? {
            ForkResult::Parent { child } => Pid::from(child),
            ForkResult::Child => {
                // Wait for the parent to attach.
                let _ = signal::raise(Signal::SIGSTOP);
                let _ = unistd::execvp(&program, &argv);
                unsafe { libc::_exit(127) }
            }
        };

        debug!(%child, ?argv, "spawned");

        if let Err(err) = ptrace::seize(
            child.into(),
            options() | ptrace::Options::PTRACE_O_EXITKILL,
        ) {
            let _ = signal::kill(child.into(), Signal::SIGKILL);
            let _ = waitid::waitpid(child, WaitPidFlag::WEXITED);
            return Err(ControlError::from_errno(child, nix_errno(err)));
        }

        Self::await_initial_stop(child)?;

        restart(libc::PTRACE_SYSCALL, child, 0)
            .map_err(|err| ControlError::from_errno(child, err))?;

        let mut control = Self::new(child);
        control.tracees.insert(child, State::Running);
        control.notifier.watch(child)?;

        Ok(control)
    }

    /// Waits for the `SIGSTOP` the child raised before `exec`. Any other stop
    /// that comes first is resumed.
    fn await_initial_stop(child: Pid) -> Result<(), ControlError> {
        loop {
            let status = waitid::waitpid(
                child,
                WaitPidFlag::WSTOPPED | WaitPidFlag::WEXITED | WaitPidFlag::__WALL,
            )
            .map_err(|err| ControlError::from_errno(child, err))?
            .ok_or(ControlError::Gone(child))?;

            if !libc::WIFSTOPPED(status) {
                return Err(ControlError::Gone(child));
            }

            let sig = libc::WSTOPSIG(status);
            let event = status >> 16;

            if (event == 0 && sig == libc::SIGSTOP) || event == libc::PTRACE_EVENT_STOP {
                return Ok(());
            }

            let deliver = if event == 0 { sig } else { 0 };
            restart(libc::PTRACE_CONT, child, deliver)
                .map_err(|err| ControlError::from_errno(child, err))?;
        }
    }

    /// Attaches to every thread of a running process. The process is not
    /// killed when the tracer exits and keeps running after
    /// [`Control::detach`].
    pub fn attach(pid: Pid) -> Result<Self, ControlError> {
        let mut control = Self::new(pid);
        let mut seen = HashSet::new();

        // Threads may be created while we attach. Keep scanning until a pass
        // turns up nothing new; the ones created after that are traced by
        // virtue of PTRACE_O_TRACECLONE.
        loop {
            let mut fresh = false;
            for tid in tasks(pid)? {
                if seen.insert(tid) {
                    fresh = true;
                    control.seize_thread(tid)?;
                }
            }

            if !fresh {
                break;
            }
        }

        if control.tracees.is_empty() {
            return Err(ControlError::Gone(pid));
        }

        debug!(%pid, threads = control.tracees.len(), "attached");

        Ok(control)
    }

    fn seize_thread(&mut self, tid: Pid) -> Result<(), ControlError> {
        match ptrace::seize(tid.into(), options()).map_err(nix_errno) {
            Ok(()) => {}
            // Exited between listing and seizing.
            Err(Errno::ESRCH) => return Ok(()),
            Err(Errno::EPERM) => return Err(ControlError::Permission(Errno::EPERM)),
            Err(err) => return Err(ControlError::from_errno(tid, err)),
        }

        match interrupt(tid) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(ControlError::from_errno(tid, err)),
        }

        self.tracees.insert(tid, State::Running);
        self.notifier.watch(tid)?;

        Ok(())
    }

    /// Asks the kernel which side of the syscall we are on.
    fn phase_hint(&mut self, tid: Pid) -> Option<Phase> {
        if !self.info_supported {
            return None;
        }

        match regs::syscall_phase(tid) {
            Ok(phase) => phase,
            Err(Errno::EIO) | Err(Errno::EINVAL) => {
                debug!("PTRACE_GET_SYSCALL_INFO is not supported");
                self.info_supported = false;
                None
            }
            Err(_) => None,
        }
    }

    /// Turns a raw wait status into a stop. Returns `Ok(None)` for statuses
    /// that need no attention.
    fn classify(&mut self, tid: Pid, status: i32) -> Result<Option<Stop>, ControlError> {
        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            self.tracees.remove(&tid);
            let status = ExitStatus::from_raw(status).ok_or(ControlError::Errno(Errno::EINVAL))?;
            return Ok(Some(Stop::Exited { tid, status }));
        }

        if !libc::WIFSTOPPED(status) {
            // WIFCONTINUED. The thread is running again.
            trace!(%tid, "continued");
            return Ok(None);
        }

        self.tracees.insert(
            tid,
            State::Stopped {
                unmapped_signal: None,
            },
        );

        let sig = libc::WSTOPSIG(status);
        let event = status >> 16;

        if sig == libc::SIGTRAP | 0x80 {
            let hint = self.phase_hint(tid);
            return Ok(Some(Stop::Syscall { tid, hint }));
        }

        let stop = match event {
            0 => match Signal::try_from(sig) {
                Ok(signal) => Stop::Signal { tid, signal },
                Err(_) => {
                    self.tracees.insert(
                        tid,
                        State::Stopped {
                            unmapped_signal: Some(sig),
                        },
                    );
                    Stop::Event { tid }
                }
            },
            libc::PTRACE_EVENT_CLONE | libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK => {
                let child = ptrace::getevent(tid.into())
                    .map_err(|err| ControlError::from_errno(tid, nix_errno(err)))?;
                let child = Pid::from_raw(child as libc::pid_t);

                self.tracees.insert(child, State::Running);
                self.notifier.watch(child)?;

                Stop::NewThread { parent: tid, child }
            }
            libc::PTRACE_EVENT_EXEC => {
                let former = ptrace::getevent(tid.into())
                    .map_err(|err| ControlError::from_errno(tid, nix_errno(err)))?;
                let former = Pid::from_raw(former as libc::pid_t);

                // A non-leader thread that calls exec takes over the thread
                // group id. Its own tid disappears without an exit status.
                if former != tid {
                    debug!(%tid, %former, "exec from a non-leader thread");
                    self.tracees.remove(&former);
                }

                Stop::Exec { tid, former }
            }
            libc::PTRACE_EVENT_STOP => {
                // Group-stop or PTRACE_INTERRUPT. Resumed with PTRACE_SYSCALL,
                // not PTRACE_LISTEN, so job control stops don't stick.
                trace!(%tid, sig, "event stop");
                Stop::Event { tid }
            }
            _ => Stop::Event { tid },
        };

        Ok(Some(stop))
    }

    fn detach_thread(&mut self, tid: Pid, signal: i32) -> Result<(), ControlError> {
        self.tracees.remove(&tid);
        match restart(libc::PTRACE_DETACH, tid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(ControlError::from_errno(tid, err)),
        }
    }
}

impl Control for PtraceControl {
    type Memory<'a> = RemoteMemory;

    fn root(&self) -> Pid {
        self.root
    }

    fn wait(&mut self, cancel: &CancelToken) -> Result<Option<Stop>, ControlError> {
        if !self.cancel_hooked {
            let notifier = self.notifier.clone();
            cancel.on_cancel(move || notifier.cancel());
            self.cancel_hooked = true;
        }

        loop {
            match self.notifier.next(true) {
                Ring::Idle => return Ok(None),
                Ring::Cancelled => return Ok(Some(Stop::Cancelled)),
                Ring::Status(tid, status) => {
                    if let Some(stop) = self.classify(tid, status)? {
                        return Ok(Some(stop));
                    }
                }
            }
        }
    }

    fn syscall_state(&mut self, tid: Pid) -> Result<RawCall, ControlError> {
        regs::getregs(tid)
            .map(|regs| regs.raw_call())
            .map_err(|err| ControlError::from_errno(tid, err))
    }

    fn memory(&self, tid: Pid) -> RemoteMemory {
        RemoteMemory::new(tid)
    }

    fn resume(&mut self, tid: Pid, signal: Option<Signal>) -> Result<(), ControlError> {
        let stashed = match self.tracees.insert(tid, State::Running) {
            Some(State::Stopped { unmapped_signal }) => unmapped_signal,
            _ => None,
        };

        let signal = signal.map(|s| s as i32).or(stashed).unwrap_or(0);

        restart(libc::PTRACE_SYSCALL, tid, signal).map_err(|err| {
            if err == Errno::ESRCH {
                self.tracees.remove(&tid);
            }
            ControlError::from_errno(tid, err)
        })
    }

    fn detach(&mut self) -> Result<(), ControlError> {
        let tracees: Vec<(Pid, State)> = self.tracees.iter().map(|(k, v)| (*k, *v)).collect();

        for (tid, state) in tracees {
            match state {
                State::Stopped { unmapped_signal } => {
                    self.detach_thread(tid, unmapped_signal.unwrap_or(0))?
                }
                State::Running => match interrupt(tid) {
                    Ok(()) => {}
                    Err(Errno::ESRCH) => {
                        self.tracees.remove(&tid);
                    }
                    Err(err) => warn!(%tid, "failed to interrupt: {}", err),
                },
            }
        }

        // Running threads can only be detached once they stop. Whatever stop
        // comes first will do; a pending signal is passed along.
        while !self.tracees.is_empty() {
            let (tid, status) = match self.notifier.next(false) {
                Ring::Status(tid, status) => (tid, status),
                Ring::Cancelled | Ring::Idle => break,
            };

            if !self.tracees.contains_key(&tid) {
                continue;
            }

            if libc::WIFSTOPPED(status) {
                let sig = libc::WSTOPSIG(status);
                let deliver = if status >> 16 == 0 && sig != libc::SIGTRAP | 0x80 {
                    sig
                } else {
                    0
                };
                self.detach_thread(tid, deliver)?;
            } else if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                self.tracees.remove(&tid);
            }
        }

        debug!(root = %self.root, "detached");

        Ok(())
    }
}
