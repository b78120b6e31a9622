/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A [`Control`] that replays a script instead of tracing a real process.
//!
//! Every stop handed out is remembered, and every resume is checked against
//! it, so tests can verify that the trace loop resumes each stop exactly once.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

use libtrace_memory::SparseMemory;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use syscalls::Errno;

use crate::control::CancelToken;
use crate::control::Control;
use crate::control::ControlError;
use crate::control::RawCall;
use crate::control::Stop;
use crate::process::ExitStatus;
use crate::process::Pid;
use crate::value::Phase;

/// What the trace loop did to the scripted threads.
#[derive(Debug, Default)]
pub struct Journal {
    /// Every stop returned by `wait`, in order.
    pub stops: Vec<Stop>,

    /// Every successful resume, in order.
    pub resumes: Vec<(Pid, Option<Signal>)>,

    /// Resumes of threads that were not stopped.
    pub spurious: Vec<Pid>,

    /// Whether `detach` was called.
    pub detached: bool,

    /// Threads still stopped, waiting for a resume.
    pub stopped: HashSet<Pid>,
}

impl Journal {
    /// The resumed threads, in order.
    pub fn resumed(&self) -> Vec<Pid> {
        self.resumes.iter().map(|(tid, _)| *tid).collect()
    }
}

enum Step {
    Stop(Stop, Option<RawCall>),
    /// The next `n` register reads fail with `EINTR`.
    Flaky(usize),
    /// The thread dies while stopped: reading its registers and resuming it
    /// fail with `ESRCH`.
    Vanish(Pid),
    /// The region at an address is replaced, or removed if `None`.
    Remap(u64, Option<Vec<u8>>),
    Fail(ControlError),
}

/// A scripted sequence of stops over a fake address space.
pub struct ScriptedControl {
    root: Pid,
    script: VecDeque<Step>,
    calls: HashMap<Pid, RawCall>,
    vanished: HashSet<Pid>,
    flaky: usize,
    memory: SparseMemory,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedControl {
    /// Creates an empty script for the process `root`.
    pub fn new(root: Pid) -> Self {
        Self {
            root,
            script: VecDeque::new(),
            calls: HashMap::new(),
            vanished: HashSet::new(),
            flaky: 0,
            memory: SparseMemory::new(),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Maps a NUL-terminated string at `addr`.
    pub fn with_cstr(mut self, addr: u64, s: &str) -> Self {
        self.memory.map_cstr(addr as usize, s);
        self
    }

    /// Maps raw bytes at `addr`.
    pub fn with_bytes(mut self, addr: u64, bytes: &[u8]) -> Self {
        self.memory.map(addr as usize, bytes.to_vec());
        self
    }

    /// A handle on the journal that stays valid after the control is consumed
    /// by the trace loop.
    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        self.journal.clone()
    }

    /// A syscall stop with the given phase hint.
    pub fn syscall(mut self, tid: Pid, hint: Option<Phase>, call: RawCall) -> Self {
        self.script
            .push_back(Step::Stop(Stop::Syscall { tid, hint }, Some(call)));
        self
    }

    /// A syscall-entry stop without a hint.
    pub fn syscall_enter(self, tid: Pid, call: RawCall) -> Self {
        self.syscall(tid, None, call)
    }

    /// A syscall-exit stop without a hint. `call.ret` is the return value.
    pub fn syscall_exit(self, tid: Pid, call: RawCall) -> Self {
        self.syscall(tid, None, call)
    }

    /// A signal-delivery stop.
    pub fn signal(mut self, tid: Pid, signal: Signal) -> Self {
        self.script
            .push_back(Step::Stop(Stop::Signal { tid, signal }, None));
        self
    }

    /// `parent` created `child`.
    pub fn new_thread(mut self, parent: Pid, child: Pid) -> Self {
        self.script
            .push_back(Step::Stop(Stop::NewThread { parent, child }, None));
        self
    }

    /// `former` completed an `execve` and continues as `tid`.
    pub fn exec(mut self, tid: Pid, former: Pid) -> Self {
        self.script
            .push_back(Step::Stop(Stop::Exec { tid, former }, None));
        self
    }

    /// Some other ptrace event.
    pub fn event(mut self, tid: Pid) -> Self {
        self.script.push_back(Step::Stop(Stop::Event { tid }, None));
        self
    }

    /// The thread exited.
    pub fn exited(mut self, tid: Pid, status: ExitStatus) -> Self {
        self.script
            .push_back(Step::Stop(Stop::Exited { tid, status }, None));
        self
    }

    /// From here on, the next `count` register reads fail with `EINTR`.
    pub fn flaky(mut self, count: usize) -> Self {
        self.script.push_back(Step::Flaky(count));
        self
    }

    /// From here on, `tid` is dead although the next stop still names it.
    pub fn vanish(mut self, tid: Pid) -> Self {
        self.script.push_back(Step::Vanish(tid));
        self
    }

    /// From here on, the NUL-terminated string at `addr` reads as `s`.
    pub fn remap_cstr(mut self, addr: u64, s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.script.push_back(Step::Remap(addr, Some(bytes)));
        self
    }

    /// From here on, reading the region at `addr` faults.
    pub fn unmap(mut self, addr: u64) -> Self {
        self.script.push_back(Step::Remap(addr, None));
        self
    }

    /// `wait` fails with `err`.
    pub fn fail(mut self, err: ControlError) -> Self {
        self.script.push_back(Step::Fail(err));
        self
    }

    fn check_alive(&self, tid: Pid) -> Result<(), ControlError> {
        if self.vanished.contains(&tid) {
            Err(ControlError::Gone(tid))
        } else {
            Ok(())
        }
    }
}

impl Control for ScriptedControl {
    type Memory<'a> = &'a SparseMemory;

    fn root(&self) -> Pid {
        self.root
    }

    fn wait(&mut self, cancel: &CancelToken) -> Result<Option<Stop>, ControlError> {
        if cancel.is_cancelled() {
            return Ok(Some(Stop::Cancelled));
        }

        loop {
            match self.script.pop_front() {
                None => return Ok(None),
                Some(Step::Flaky(count)) => self.flaky = count,
                Some(Step::Vanish(tid)) => {
                    self.vanished.insert(tid);
                }
                Some(Step::Remap(addr, Some(bytes))) => {
                    self.memory.map(addr as usize, bytes);
                }
                Some(Step::Remap(addr, None)) => {
                    self.memory.unmap(addr as usize);
                }
                Some(Step::Fail(err)) => return Err(err),
                Some(Step::Stop(stop, call)) => {
                    if let (Stop::Syscall { tid, .. }, Some(call)) = (&stop, call) {
                        self.calls.insert(*tid, call);
                    }

                    let mut journal = self.journal.lock();
                    if let Some(tid) = stop.stopped_thread() {
                        journal.stopped.insert(tid);
                    }
                    journal.stops.push(stop.clone());

                    return Ok(Some(stop));
                }
            }
        }
    }

    fn syscall_state(&mut self, tid: Pid) -> Result<RawCall, ControlError> {
        self.check_alive(tid)?;

        if self.flaky > 0 {
            self.flaky -= 1;
            return Err(ControlError::Transient(Errno::EINTR));
        }

        self.calls
            .get(&tid)
            .copied()
            .ok_or(ControlError::Errno(Errno::EIO))
    }

    fn memory(&self, _tid: Pid) -> Self::Memory<'_> {
        &self.memory
    }

    fn resume(&mut self, tid: Pid, signal: Option<Signal>) -> Result<(), ControlError> {
        self.check_alive(tid)?;

        let mut journal = self.journal.lock();
        if journal.stopped.remove(&tid) {
            journal.resumes.push((tid, signal));
            Ok(())
        } else {
            journal.spurious.push(tid);
            Err(ControlError::Gone(tid))
        }
    }

    fn detach(&mut self) -> Result<(), ControlError> {
        let mut journal = self.journal.lock();
        journal.detached = true;
        journal.stopped.clear();
        Ok(())
    }
}
