/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The trace loop.
//!
//! Every traced thread goes through the same two states: waiting for the next
//! syscall entry, and waiting for the exit of the call it entered. Threads are
//! independent of each other; they only share the signature table, the
//! decoder and the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::StreamPolicy;
use crate::config::TracerConfig;
use crate::control::CancelToken;
use crate::control::Control;
use crate::control::ControlError;
use crate::control::Stop;
use crate::decode::Decoder;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::process::ExitStatus;
use crate::process::Pid;
use crate::registry::Callback;
use crate::registry::Phases;
use crate::registry::Registry;
use crate::registry::Sink;
use crate::registry::SinkId;
use crate::registry::Stream;
use crate::signature::Signature;
use crate::signature::SignatureTable;
use crate::signature::MAX_ARGS;
use crate::value::ArgValue;
use crate::value::Phase;
use crate::value::ReturnValue;
use crate::value::Trace;

/// How many times a request that failed with `EINTR` or `EAGAIN` is retried.
const MAX_RETRIES: usize = 3;

/// What happened during a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RunSummary {
    /// Number of events dispatched.
    pub events: u64,

    /// Number of events stream sinks missed because their queue was full.
    pub dropped: u64,

    /// Number of callback panics and closed streams.
    pub sink_failures: u64,

    /// True if the run ended because it was cancelled.
    pub cancelled: bool,

    /// Exit status of the root process, if it exited while traced.
    pub exit_status: Option<ExitStatus>,
}

/// Traces syscalls and delivers them to subscribers.
///
/// Subscribers are registered first; [`Tracer::run`] then consumes the tracer,
/// so nothing can be registered while a trace is running.
///
/// # Example
///
/// ```ignore
/// let mut tracer = Tracer::new(LinuxTable::get());
/// tracer.register_callback_on_exit(|trace| println!("{}", trace), ["open", "openat"]);
/// let summary = tracer.run(PtraceControl::spawn("cat", ["/etc/hosts"])?)?;
/// ```
pub struct Tracer {
    table: Arc<dyn SignatureTable + Send + Sync>,
    config: TracerConfig,
    registry: Registry,
    cancel: CancelToken,
}

impl Tracer {
    /// Creates a tracer with the default configuration.
    pub fn new<T>(table: T) -> Self
    where
        T: SignatureTable + Send + Sync + 'static,
    {
        Self::with_config(table, TracerConfig::default())
    }

    /// Creates a tracer with the given configuration.
    pub fn with_config<T>(table: T, config: TracerConfig) -> Self
    where
        T: SignatureTable + Send + Sync + 'static,
    {
        Self {
            table: Arc::new(table),
            config,
            registry: Registry::new(),
            cancel: CancelToken::new(),
        }
    }

    /// The current configuration.
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Sets the maximum number of bytes decoded from string arguments.
    pub fn set_max_string_size(&mut self, size: usize) -> &mut Self {
        self.config.max_string_size = size;
        self
    }

    /// Sets the maximum number of bytes decoded from buffer arguments.
    pub fn set_max_buffer_size(&mut self, size: usize) -> &mut Self {
        self.config.max_buffer_size = size;
        self
    }

    /// Sets what happens when a stream subscriber falls behind.
    pub fn set_stream_policy(&mut self, policy: StreamPolicy) -> &mut Self {
        self.config.stream_policy = policy;
        self
    }

    /// Returns a token that stops the trace from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn add<I, S>(&mut self, sink: Sink, names: I, phases: Phases) -> SinkId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        for name in &names {
            if !self.table.contains_name(name) {
                warn!(name = %name, "subscribing to a syscall the signature table does not know");
            }
        }

        let id = self.registry.register(sink, names, phases);
        debug!(sink = %id, ?phases, "registered");
        id
    }

    fn callback<F>(callback: F) -> Sink
    where
        F: Fn(&Trace) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        Sink::Callback(callback)
    }

    /// Calls `callback` when one of the named syscalls is entered. No names
    /// means every syscall.
    pub fn register_callback_on_enter<F, I, S>(&mut self, callback: F, names: I) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Self::callback(callback), names, Phases::ENTER)
    }

    /// Calls `callback` when one of the named syscalls returns. No names means
    /// every syscall.
    pub fn register_callback_on_exit<F, I, S>(&mut self, callback: F, names: I) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Self::callback(callback), names, Phases::EXIT)
    }

    /// Calls `callback` on both entry and exit of the named syscalls.
    pub fn register_callback<F, I, S>(&mut self, callback: F, names: I) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Self::callback(callback), names, Phases::BOTH)
    }

    /// Calls `callback` when any syscall is entered.
    pub fn register_global_callback_on_enter<F>(&mut self, callback: F) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
    {
        self.add(Self::callback(callback), Vec::<String>::new(), Phases::ENTER)
    }

    /// Calls `callback` when any syscall returns.
    pub fn register_global_callback_on_exit<F>(&mut self, callback: F) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
    {
        self.add(Self::callback(callback), Vec::<String>::new(), Phases::EXIT)
    }

    /// Calls `callback` on both entry and exit of every syscall.
    pub fn register_global_callback<F>(&mut self, callback: F) -> SinkId
    where
        F: Fn(&Trace) + Send + Sync + 'static,
    {
        self.add(Self::callback(callback), Vec::<String>::new(), Phases::BOTH)
    }

    /// Sends entries of the named syscalls to `stream`. No names means every
    /// syscall.
    pub fn register_stream_on_enter<I, S>(&mut self, stream: Stream, names: I) -> SinkId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Sink::Stream(stream), names, Phases::ENTER)
    }

    /// Sends exits of the named syscalls to `stream`. No names means every
    /// syscall.
    pub fn register_stream_on_exit<I, S>(&mut self, stream: Stream, names: I) -> SinkId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Sink::Stream(stream), names, Phases::EXIT)
    }

    /// Sends entries and exits of the named syscalls to `stream`.
    pub fn register_stream<I, S>(&mut self, stream: Stream, names: I) -> SinkId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Sink::Stream(stream), names, Phases::BOTH)
    }

    /// Sends entries of every syscall to `stream`.
    pub fn register_global_stream_on_enter(&mut self, stream: Stream) -> SinkId {
        self.add(Sink::Stream(stream), Vec::<String>::new(), Phases::ENTER)
    }

    /// Sends exits of every syscall to `stream`.
    pub fn register_global_stream_on_exit(&mut self, stream: Stream) -> SinkId {
        self.add(Sink::Stream(stream), Vec::<String>::new(), Phases::EXIT)
    }

    /// Sends entries and exits of every syscall to `stream`.
    pub fn register_global_stream(&mut self, stream: Stream) -> SinkId {
        self.add(Sink::Stream(stream), Vec::<String>::new(), Phases::BOTH)
    }

    /// Traces until nothing is left to trace, the trace is cancelled, or the
    /// backend fails.
    ///
    /// Callbacks run on this thread. With [`StreamPolicy::Block`] this must
    /// not be called from within an async runtime; use a plain thread or
    /// `tokio::task::spawn_blocking`.
    pub fn run<C: Control>(self, mut control: C) -> Result<RunSummary, Error> {
        let Tracer {
            table,
            config,
            registry,
            cancel,
        } = self;

        info!(
            root = %control.root(),
            subscriptions = registry.len(),
            max_string_size = config.max_string_size,
            max_buffer_size = config.max_buffer_size,
            "tracing started"
        );

        let mut session = Session {
            table,
            decoder: Decoder::new(config.limits()),
            dispatcher: Dispatcher::new(registry, config.stream_policy),
            threads: HashMap::new(),
            unknown: HashMap::new(),
            cancelled: false,
            exit_status: None,
        };

        if let Err(err) = session.drive(&mut control, &cancel) {
            error!("tracing failed: {}", err);
            return Err(err);
        }

        let stats = session.dispatcher.stats();
        let summary = RunSummary {
            events: stats.events,
            dropped: stats.dropped,
            sink_failures: stats.sink_failures,
            cancelled: session.cancelled,
            exit_status: session.exit_status,
        };

        info!(?summary, "tracing finished");

        Ok(summary)
    }
}

/// A call that has been entered but has not returned yet.
#[derive(Debug)]
struct InFlight {
    signature: Arc<Signature>,
    /// Argument words as they were on entry.
    words: [u64; MAX_ARGS],
    /// Values decoded on entry, if anybody wanted them.
    args: Option<Vec<ArgValue>>,
}

#[derive(Debug)]
enum ThreadState {
    AwaitingEnter,
    AwaitingExit(InFlight),
}

impl ThreadState {
    fn next_phase(&self) -> Phase {
        match self {
            ThreadState::AwaitingEnter => Phase::Enter,
            ThreadState::AwaitingExit(_) => Phase::Exit,
        }
    }
}

struct Session {
    table: Arc<dyn SignatureTable + Send + Sync>,
    decoder: Decoder,
    dispatcher: Dispatcher,
    threads: HashMap<Pid, ThreadState>,
    /// Signatures made up for syscall numbers missing from the table.
    unknown: HashMap<usize, Arc<Signature>>,
    cancelled: bool,
    exit_status: Option<ExitStatus>,
}

impl Session {
    fn drive<C: Control>(&mut self, control: &mut C, cancel: &CancelToken) -> Result<(), Error> {
        let root = control.root();

        loop {
            let stop = match control.wait(cancel) {
                Ok(Some(stop)) => stop,
                Ok(None) => return Ok(()),
                Err(ControlError::Gone(tid)) => {
                    self.forget(tid);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            debug!("{}", stop);

            match stop {
                Stop::Cancelled => {
                    info!(threads = self.threads.len(), "cancelled, detaching");
                    self.cancelled = true;
                    control.detach()?;
                    return Ok(());
                }
                Stop::Syscall { tid, hint } => match self.on_syscall(control, tid, hint) {
                    Ok(()) => self.resume(control, tid, None)?,
                    Err(ControlError::Gone(tid)) => self.forget(tid),
                    Err(err) => return Err(err.into()),
                },
                Stop::Signal { tid, signal } => self.resume(control, tid, Some(signal))?,
                Stop::NewThread { parent, child } => {
                    self.threads
                        .entry(child)
                        .or_insert(ThreadState::AwaitingEnter);
                    self.resume(control, parent, None)?;
                }
                Stop::Exec { tid, former } => {
                    if former != tid {
                        // The exec'ing thread carries on as the leader. Its
                        // pending execve exit is reported under the new tid.
                        if let Some(state) = self.threads.remove(&former) {
                            self.threads.insert(tid, state);
                        }
                    }
                    self.resume(control, tid, None)?;
                }
                Stop::Event { tid } => self.resume(control, tid, None)?,
                Stop::Exited { tid, status } => {
                    self.forget(tid);
                    if tid == root {
                        self.exit_status = Some(status);
                    }
                }
            }
        }
    }

    fn forget(&mut self, tid: Pid) {
        if let Some(ThreadState::AwaitingExit(in_flight)) = self.threads.remove(&tid) {
            debug!(
                tid = %tid,
                syscall = %in_flight.signature.name,
                "thread is gone with a call in flight"
            );
        }
    }

    fn resume<C: Control>(
        &mut self,
        control: &mut C,
        tid: Pid,
        signal: Option<nix::sys::signal::Signal>,
    ) -> Result<(), ControlError> {
        match control.resume(tid, signal) {
            Err(ControlError::Gone(tid)) => {
                self.forget(tid);
                Ok(())
            }
            result => result,
        }
    }

    fn signature(&mut self, nr: u64) -> Arc<Signature> {
        let id = nr as usize;
        if let Some(signature) = self.table.lookup(id) {
            return signature;
        }

        self.unknown
            .entry(id)
            .or_insert_with(|| {
                debug!(id, "syscall missing from the signature table");
                Arc::new(Signature::unknown(id))
            })
            .clone()
    }

    fn on_syscall<C: Control>(
        &mut self,
        control: &mut C,
        tid: Pid,
        hint: Option<Phase>,
    ) -> Result<(), ControlError> {
        let state = self
            .threads
            .remove(&tid)
            .unwrap_or(ThreadState::AwaitingEnter);

        let expected = state.next_phase();
        let phase = match hint {
            Some(actual) if actual != expected => {
                warn!(
                    tid = %tid,
                    %expected,
                    %actual,
                    "syscall phase out of sync, following the kernel"
                );
                actual
            }
            _ => expected,
        };

        let raw = with_retries(|| control.syscall_state(tid))?;

        let next = match phase {
            Phase::Enter => {
                if let ThreadState::AwaitingExit(stale) = state {
                    debug!(tid = %tid, syscall = %stale.signature.name, "discarding unfinished call");
                }

                let signature = self.signature(raw.nr);

                // Inputs are decoded here even for exit-only sinks: by the
                // time the call returns, its memory may have been rewritten
                // or, after `execve`, replaced.
                let registry = self.dispatcher.registry();
                let args = if registry.is_interested(&signature.name) {
                    let memory = control.memory(tid);
                    let args = self.decoder.enter(&signature, &raw.args, &memory);
                    if registry.wants(&signature.name, Phase::Enter) {
                        self.dispatcher.dispatch(Trace {
                            tid,
                            signature: signature.clone(),
                            args: args.clone(),
                            ret: ReturnValue::default(),
                            exit: false,
                        });
                    }
                    Some(args)
                } else {
                    None
                };

                ThreadState::AwaitingExit(InFlight {
                    signature,
                    words: raw.args,
                    args,
                })
            }
            Phase::Exit => {
                let (signature, words, entered) = match state {
                    ThreadState::AwaitingExit(in_flight) => {
                        (in_flight.signature, in_flight.words, in_flight.args)
                    }
                    ThreadState::AwaitingEnter => (self.signature(raw.nr), raw.args, None),
                };

                if self.dispatcher.registry().wants(&signature.name, Phase::Exit) {
                    let memory = control.memory(tid);
                    let (args, ret) = self.decoder.exit(
                        &signature,
                        &words,
                        raw.ret,
                        entered.as_deref(),
                        &memory,
                    );
                    self.dispatcher.dispatch(Trace {
                        tid,
                        signature,
                        args,
                        ret,
                        exit: true,
                    });
                }

                ThreadState::AwaitingEnter
            }
        };

        self.threads.insert(tid, next);

        Ok(())
    }
}

/// Retries a request that failed with a transient error a bounded number of
/// times.
fn with_retries<T, F>(mut f: F) -> Result<T, ControlError>
where
    F: FnMut() -> Result<T, ControlError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(ControlError::Transient(errno)) if attempts < MAX_RETRIES => {
                attempts += 1;
                debug!(%errno, attempts, "retrying");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;
    use parking_lot::Mutex;
    use syscalls::Errno;
    use tokio::sync::mpsc;

    use super::*;
    use crate::control::RawCall;
    use crate::signature::Arg;
    use crate::signature::ArgType;
    use crate::signature::MapTable;
    use crate::testing::ScriptedControl;

    const ROOT: Pid = Pid::from_raw(100);
    const PATH: u64 = 0x1000;

    fn table() -> MapTable {
        let mut table = MapTable::new();
        table.insert(Signature::new(
            2,
            "open",
            vec![
                Arg::input("path", ArgType::CString),
                Arg::input("flags", ArgType::Int),
            ],
        ));
        table.insert(Signature::new(
            3,
            "close",
            vec![Arg::input("fd", ArgType::Fd)],
        ));
        table
    }

    fn open() -> RawCall {
        RawCall::new(2, [PATH, 0, 0, 0, 0, 0])
    }

    fn close(fd: u64) -> RawCall {
        RawCall::new(3, [fd, 0, 0, 0, 0, 0])
    }

    fn collect(tracer: &mut Tracer, names: &[&str]) -> Arc<Mutex<Vec<Trace>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracer.register_callback(
            move |trace: &Trace| sink.lock().push(trace.clone()),
            names.iter().copied(),
        );
        events
    }

    #[test]
    fn open_enter_and_exit() {
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &["open"]);

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open())
            .syscall_exit(ROOT, open().with_ret(3))
            .exited(ROOT, ExitStatus::SUCCESS);
        let journal = control.journal();

        let summary = tracer.run(control).unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.exit_status, Some(ExitStatus::SUCCESS));
        assert!(!summary.cancelled);

        let events = events.lock();
        assert_eq!(events.len(), 2);

        assert!(!events[0].exit);
        assert_eq!(events[0].args[0].text, "/etc/hosts");
        assert_eq!(events[0].args[1].text, "0");
        assert_eq!(events[0].ret, ReturnValue::default());

        assert!(events[1].exit);
        assert_eq!(events[1].args, events[0].args);
        assert_eq!(events[1].ret.code, 3);
        assert_eq!(events[1].ret.description, "success");
        assert_eq!(events[1].to_string(), "open(\"/etc/hosts\", 0) = 3");

        let journal = journal.lock();
        assert_eq!(journal.resumed(), [ROOT, ROOT]);
        assert!(journal.spurious.is_empty());
    }

    #[test]
    fn open_truncated() {
        let mut tracer = Tracer::new(table());
        tracer.set_max_string_size(4);
        let events = collect(&mut tracer, &["open"]);

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open());

        tracer.run(control).unwrap();

        let events = events.lock();
        assert_eq!(events[0].args[0].text, "/etc");
        assert!(events[0].args[0].is_truncated());
    }

    #[test]
    fn open_failure() {
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &["open"]);

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/nope")
            .syscall_enter(ROOT, open())
            .syscall_exit(ROOT, open().with_ret(-(Errno::ENOENT.into_raw() as i64)));

        tracer.run(control).unwrap();

        let events = events.lock();
        assert_eq!(events[1].ret.errno(), Some(Errno::ENOENT));
        assert!(events[1].ret.description.starts_with("ENOENT"));
    }

    #[test]
    fn every_stop_resumed_once() {
        let child = Pid::from_raw(101);
        let mut tracer = Tracer::new(table());
        tracer.register_global_callback_on_exit(|_| {});

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open())
            .new_thread(ROOT, child)
            .syscall_enter(child, close(4))
            .signal(ROOT, Signal::SIGCHLD)
            .syscall_exit(ROOT, open().with_ret(3))
            .event(child)
            .syscall_exit(child, close(4))
            .exited(child, ExitStatus::SUCCESS)
            .exited(ROOT, ExitStatus::Exited(3));
        let journal = control.journal();

        let summary = tracer.run(control).unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.exit_status, Some(ExitStatus::Exited(3)));

        let journal = journal.lock();
        let stopped: Vec<Pid> = journal
            .stops
            .iter()
            .filter_map(Stop::stopped_thread)
            .collect();
        assert_eq!(journal.resumed(), stopped);
        assert!(journal.spurious.is_empty());
        assert!(journal.stopped.is_empty());

        // The signal is passed on, nothing else is.
        let signals: Vec<_> = journal.resumes.iter().filter_map(|(_, s)| *s).collect();
        assert_eq!(signals, [Signal::SIGCHLD]);
    }

    #[test]
    fn threads_alternate_independently() {
        let other = Pid::from_raw(101);
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &[]);

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open())
            .syscall_enter(other, close(5))
            .syscall_exit(other, close(5))
            .syscall_exit(ROOT, open().with_ret(3));

        tracer.run(control).unwrap();

        let seen: Vec<(Pid, String, bool)> = events
            .lock()
            .iter()
            .map(|t| (t.tid, t.name().to_string(), t.exit))
            .collect();
        assert_eq!(
            seen,
            [
                (ROOT, "open".to_string(), false),
                (other, "close".to_string(), false),
                (other, "close".to_string(), true),
                (ROOT, "open".to_string(), true),
            ]
        );
    }

    #[test]
    fn kernel_phase_wins() {
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &[]);

        // Attached while the thread was blocked inside close: the first stop
        // is an exit.
        let control = ScriptedControl::new(ROOT)
            .syscall(ROOT, Some(Phase::Exit), close(4))
            .syscall(ROOT, Some(Phase::Enter), close(5))
            .syscall(ROOT, Some(Phase::Exit), close(5));

        tracer.run(control).unwrap();

        let events = events.lock();
        let phases: Vec<bool> = events.iter().map(|t| t.exit).collect();
        assert_eq!(phases, [true, false, true]);
        assert_eq!(events[0].args[0].text, "4");
        assert_eq!(events[2].args[0].text, "5");
    }

    #[test]
    fn unknown_syscalls_are_named_by_number() {
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &["999"]);

        let control = ScriptedControl::new(ROOT)
            .syscall_enter(ROOT, RawCall::new(999, [1, 2, 3, 4, 5, 6]))
            .syscall_exit(ROOT, RawCall::new(999, [1, 2, 3, 4, 5, 6]).with_ret(-38))
            .syscall_enter(ROOT, RawCall::new(999, [0; 6]));

        tracer.run(control).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|t| t.args.is_empty()));
        assert!(Arc::ptr_eq(&events[0].signature, &events[2].signature));
        assert_eq!(events[1].ret.errno(), Some(Errno::ENOSYS));
    }

    #[test]
    fn only_subscribed_phases_are_dispatched() {
        let mut tracer = Tracer::new(table());
        let exits = Arc::new(Mutex::new(Vec::new()));
        let sink = exits.clone();
        tracer.register_callback_on_exit(
            move |trace: &Trace| sink.lock().push(trace.name().to_string()),
            ["close"],
        );

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open())
            .syscall_exit(ROOT, open().with_ret(3))
            .syscall_enter(ROOT, close(3))
            .syscall_exit(ROOT, close(3));

        let summary = tracer.run(control).unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(*exits.lock(), ["close"]);
    }

    #[test]
    fn cancel_detaches() {
        let mut tracer = Tracer::new(table());
        let cancel = tracer.cancel_token();
        tracer.register_global_callback_on_enter(move |_| cancel.cancel());

        let control = ScriptedControl::new(ROOT)
            .with_cstr(PATH, "/etc/hosts")
            .syscall_enter(ROOT, open())
            .syscall_exit(ROOT, open().with_ret(3));
        let journal = control.journal();

        let summary = tracer.run(control).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.events, 1);
        assert_eq!(summary.exit_status, None);

        let journal = journal.lock();
        assert!(journal.detached);
        assert_eq!(journal.stops.len(), 1);
        assert_eq!(journal.resumed(), [ROOT]);
    }

    #[test]
    fn vanished_thread_is_not_fatal() {
        let other = Pid::from_raw(101);
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &[]);

        let control = ScriptedControl::new(ROOT)
            .syscall_enter(other, close(4))
            .vanish(other)
            .syscall_exit(other, close(4))
            .syscall_enter(ROOT, close(5))
            .syscall_exit(ROOT, close(5));
        let journal = control.journal();

        tracer.run(control).unwrap();

        let tids: Vec<Pid> = events.lock().iter().map(|t| t.tid).collect();
        assert_eq!(tids, [other, ROOT, ROOT]);
        assert_eq!(journal.lock().resumed(), [other, ROOT, ROOT]);
    }

    #[test]
    fn transient_errors_are_retried() {
        let mut tracer = Tracer::new(table());
        let events = collect(&mut tracer, &[]);

        let control = ScriptedControl::new(ROOT)
            .flaky(MAX_RETRIES)
            .syscall_enter(ROOT, close(4));
        tracer.run(control).unwrap();
        assert_eq!(events.lock().len(), 1);

        let tracer = Tracer::new(table());
        let control = ScriptedControl::new(ROOT)
            .flaky(MAX_RETRIES + 1)
            .syscall_enter(ROOT, close(4));
        let err = tracer.run(control).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EINTR));
    }

    #[test]
    fn fatal_error_ends_the_run() {
        let tracer = Tracer::new(table());
        let control = ScriptedControl::new(ROOT).fail(ControlError::Errno(Errno::ECHILD));
        let err = tracer.run(control).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ECHILD));
    }

    #[test]
    fn streams_receive_events() {
        let mut tracer = Tracer::new(table());
        let (tx, mut rx) = mpsc::channel(8);
        tracer.register_stream_on_exit(tx, ["close"]);

        let control = ScriptedControl::new(ROOT)
            .syscall_enter(ROOT, close(4))
            .syscall_exit(ROOT, close(4).with_ret(0));
        tracer.run(control).unwrap();

        let trace = rx.try_recv().unwrap();
        assert_eq!(trace.to_string(), "close(4) = 0");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_stream_drops_with_drop_policy() {
        let mut tracer = Tracer::new(table());
        tracer.set_stream_policy(StreamPolicy::Drop);
        let (tx, _rx) = mpsc::channel(1);
        tracer.register_global_stream(tx);

        let control = ScriptedControl::new(ROOT)
            .syscall_enter(ROOT, close(4))
            .syscall_exit(ROOT, close(4))
            .syscall_enter(ROOT, close(5));

        let summary = tracer.run(control).unwrap();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.dropped, 2);
    }

    #[test]
    fn retries_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(|| {
            calls += 1;
            Err(ControlError::Transient(Errno::EINTR))
        });
        assert!(matches!(result, Err(ControlError::Transient(_))));
        assert_eq!(calls, MAX_RETRIES + 1);

        let mut calls = 0;
        let result = with_retries(|| {
            calls += 1;
            if calls < 3 {
                Err(ControlError::Transient(Errno::EAGAIN))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn configuration() {
        let mut tracer = Tracer::new(MapTable::new());
        tracer
            .set_max_string_size(4)
            .set_max_buffer_size(8)
            .set_stream_policy(StreamPolicy::Drop);
        assert_eq!(
            tracer.config(),
            &TracerConfig {
                max_string_size: 4,
                max_buffer_size: 8,
                stream_policy: StreamPolicy::Drop,
            }
        );
    }
}
