/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Delivers decoded events to the registered sinks.
//!
//! Callbacks run on the tracing thread, one after the other, while the traced
//! thread is still stopped. A callback that blocks stalls the whole trace.
//! Streams hand events to another thread through a bounded queue. With
//! [`StreamPolicy::Block`] a full queue also stalls the trace; this means the
//! dispatcher must not run inside an async runtime (`blocking_send` panics
//! there).

use std::any::Any;
use std::collections::HashSet;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::warn;

use crate::config::StreamPolicy;
use crate::registry::Registry;
use crate::registry::Sink;
use crate::registry::SinkId;
use crate::value::Trace;

/// Delivery counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DispatchStats {
    /// Events handed to the dispatcher.
    pub events: u64,

    /// Events a stream sink did not get because its queue was full.
    pub dropped: u64,

    /// Callback panics plus sends to closed streams.
    pub sink_failures: u64,
}

/// Fans events out to the sinks of a registry.
pub struct Dispatcher {
    registry: Registry,
    policy: StreamPolicy,
    closed: HashSet<SinkId>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher. The registry can no longer change.
    pub fn new(registry: Registry, policy: StreamPolicy) -> Self {
        Self {
            registry,
            policy,
            closed: HashSet::new(),
            stats: DispatchStats::default(),
        }
    }

    /// The registry events are dispatched with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Counters so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Delivers one event to every matching sink. Returns the number of sinks
    /// that got it.
    pub fn dispatch(&mut self, trace: Trace) -> usize {
        self.stats.events += 1;

        let trace = Arc::new(trace);
        let phase = trace.phase();
        let mut delivered = 0;

        for (id, sink) in self.registry.lookup(trace.name(), phase) {
            if self.closed.contains(&id) {
                continue;
            }

            match sink {
                Sink::Callback(callback) => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&*trace)));
                    match result {
                        Ok(()) => delivered += 1,
                        Err(payload) => {
                            self.stats.sink_failures += 1;
                            warn!(
                                sink = %id,
                                syscall = trace.name(),
                                "callback panicked: {}",
                                panic_message(&*payload)
                            );
                        }
                    }
                }
                Sink::Stream(tx) => {
                    let sent = match self.policy {
                        StreamPolicy::Block => tx.blocking_send(trace.clone()).map_err(|_| true),
                        StreamPolicy::Drop => match tx.try_send(trace.clone()) {
                            Ok(()) => Ok(()),
                            Err(TrySendError::Full(_)) => Err(false),
                            Err(TrySendError::Closed(_)) => Err(true),
                        },
                    };

                    match sent {
                        Ok(()) => delivered += 1,
                        Err(true) => {
                            self.stats.sink_failures += 1;
                            self.closed.insert(id);
                            warn!(sink = %id, "stream receiver is gone, no longer sending to it");
                        }
                        Err(false) => {
                            self.stats.dropped += 1;
                            debug!(sink = %id, syscall = trace.name(), "stream full, dropped event");
                        }
                    }
                }
            }
        }

        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<unknown>"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::process::Pid;
    use crate::registry::Phases;
    use crate::signature::Signature;
    use crate::value::ReturnValue;

    fn event(name: &str, exit: bool) -> Trace {
        Trace {
            tid: Pid::from_raw(1),
            signature: Arc::new(Signature::new(0, name, Vec::new())),
            args: Vec::new(),
            ret: ReturnValue::default(),
            exit,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Sink {
        let log = log.clone();
        Sink::Callback(Arc::new(move |trace: &Trace| {
            log.lock().push(format!("{}:{}", label, trace.name()))
        }))
    }

    #[test]
    fn global_then_named_once_each() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register(recorder(&log, "named"), ["open"], Phases::ENTER);
        registry.register(recorder(&log, "global"), Vec::<String>::new(), Phases::ENTER);

        let mut dispatcher = Dispatcher::new(registry, StreamPolicy::Block);
        assert_eq!(dispatcher.dispatch(event("open", false)), 2);
        assert_eq!(dispatcher.dispatch(event("open", true)), 0);

        assert_eq!(*log.lock(), ["global:open", "named:open"]);
        assert_eq!(dispatcher.stats().events, 2);
    }

    #[test]
    fn panicking_callback_is_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register(
            Sink::Callback(Arc::new(|_: &Trace| panic!("boom"))),
            Vec::<String>::new(),
            Phases::BOTH,
        );
        let c = calls.clone();
        registry.register(
            Sink::Callback(Arc::new(move |_: &Trace| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            Vec::<String>::new(),
            Phases::BOTH,
        );

        let mut dispatcher = Dispatcher::new(registry, StreamPolicy::Block);
        assert_eq!(dispatcher.dispatch(event("open", false)), 1);
        assert_eq!(dispatcher.dispatch(event("open", true)), 1);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.stats().sink_failures, 2);
    }

    #[test]
    fn full_stream_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut registry = Registry::new();
        registry.register(Sink::Stream(tx), ["read"], Phases::EXIT);

        let mut dispatcher = Dispatcher::new(registry, StreamPolicy::Drop);
        assert_eq!(dispatcher.dispatch(event("read", true)), 1);
        assert_eq!(dispatcher.dispatch(event("read", true)), 0);
        assert_eq!(dispatcher.dispatch(event("read", true)), 0);
        assert_eq!(dispatcher.stats().dropped, 2);

        assert_eq!(rx.try_recv().unwrap().name(), "read");
        assert!(rx.try_recv().is_err());

        // There is room again.
        assert_eq!(dispatcher.dispatch(event("read", true)), 1);
    }

    #[test]
    fn blocking_stream_delivers_everything() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut registry = Registry::new();
        registry.register(Sink::Stream(tx), Vec::<String>::new(), Phases::BOTH);
        let mut dispatcher = Dispatcher::new(registry, StreamPolicy::Block);

        let consumer = std::thread::spawn(move || {
            let mut names = Vec::new();
            while let Some(trace) = rx.blocking_recv() {
                names.push(trace.name().to_string());
            }
            names
        });

        for name in ["a", "b", "c", "d"] {
            dispatcher.dispatch(event(name, false));
        }
        drop(dispatcher);

        assert_eq!(consumer.join().unwrap(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn closed_stream_is_skipped() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Registry::new();
        registry.register(Sink::Stream(tx), Vec::<String>::new(), Phases::BOTH);
        registry.register(recorder(&log, "cb"), Vec::<String>::new(), Phases::BOTH);

        let mut dispatcher = Dispatcher::new(registry, StreamPolicy::Block);
        assert_eq!(dispatcher.dispatch(event("close", false)), 1);
        assert_eq!(dispatcher.dispatch(event("close", true)), 1);

        // Counted once, then skipped.
        assert_eq!(dispatcher.stats().sink_failures, 1);
        assert_eq!(log.lock().len(), 2);
    }
}
