/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Who wants which events.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use tokio::sync::mpsc;

use crate::value::Phase;
use crate::value::Trace;

bitflags! {
    /// A set of syscall phases to subscribe to.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct Phases: u8 {
        /// Syscall entry.
        const ENTER = 1;
        /// Syscall exit.
        const EXIT = 2;
        /// Both entry and exit.
        const BOTH = Self::ENTER.bits() | Self::EXIT.bits();
    }
}

impl From<Phase> for Phases {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Enter => Phases::ENTER,
            Phase::Exit => Phases::EXIT,
        }
    }
}

/// A subscriber called synchronously on the tracing thread.
pub type Callback = Arc<dyn Fn(&Trace) + Send + Sync + 'static>;

/// The sending half of a stream subscription.
pub type Stream = mpsc::Sender<Arc<Trace>>;

/// Where events go.
#[derive(Clone)]
pub enum Sink {
    /// Called with every matching event.
    Callback(Callback),
    /// Sent every matching event.
    Stream(Stream),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sink::Callback(_) => f.write_str("Callback"),
            Sink::Stream(tx) => f
                .debug_struct("Stream")
                .field("closed", &tx.is_closed())
                .finish(),
        }
    }
}

/// Identifies one registration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SinkId(usize);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct PhaseTable {
    global: Vec<SinkId>,
    named: HashMap<String, Vec<SinkId>>,
}

impl PhaseTable {
    fn lookup<'a>(&'a self, name: &str) -> impl Iterator<Item = SinkId> + 'a {
        let named = self.named.get(name).map(Vec::as_slice).unwrap_or_default();
        self.global.iter().chain(named).copied()
    }

    fn is_interested(&self, name: &str) -> bool {
        !self.global.is_empty() || self.named.contains_key(name)
    }
}

/// Registered sinks, keyed by phase and by syscall name.
///
/// A lookup yields the global sinks for a phase first, then the sinks
/// registered for that syscall name, each in registration order. A sink
/// registered several times is yielded once per matching registration.
#[derive(Debug, Default)]
pub struct Registry {
    sinks: Vec<Sink>,
    enter: PhaseTable,
    exit: PhaseTable,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink for the given syscall names and phases. An empty list
    /// of names registers the sink for every syscall.
    pub fn register<I, S>(&mut self, sink: Sink, names: I, phases: Phases) -> SinkId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = SinkId(self.sinks.len());
        self.sinks.push(sink);

        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        for (phase, table) in [
            (Phases::ENTER, &mut self.enter),
            (Phases::EXIT, &mut self.exit),
        ] {
            if !phases.contains(phase) {
                continue;
            }

            if names.is_empty() {
                table.global.push(id);
            } else {
                for name in &names {
                    table.named.entry(name.clone()).or_default().push(id);
                }
            }
        }

        id
    }

    fn table(&self, phase: Phase) -> &PhaseTable {
        match phase {
            Phase::Enter => &self.enter,
            Phase::Exit => &self.exit,
        }
    }

    /// Returns the sinks to notify of an event, in delivery order.
    pub fn lookup<'a>(
        &'a self,
        name: &str,
        phase: Phase,
    ) -> impl Iterator<Item = (SinkId, &'a Sink)> + 'a {
        self.table(phase)
            .lookup(name)
            .map(move |id| (id, &self.sinks[id.0]))
    }

    /// Returns true if any sink wants either phase of this syscall.
    pub fn is_interested(&self, name: &str) -> bool {
        self.enter.is_interested(name) || self.exit.is_interested(name)
    }

    /// Returns true if any sink wants this phase of this syscall.
    pub fn wants(&self, name: &str, phase: Phase) -> bool {
        self.table(phase).is_interested(name)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Sink {
        Sink::Callback(Arc::new(|_| {}))
    }

    fn ids<'a>(it: impl Iterator<Item = (SinkId, &'a Sink)>) -> Vec<SinkId> {
        it.map(|(id, _)| id).collect()
    }

    #[test]
    fn global_before_named() {
        let mut registry = Registry::new();
        let named = registry.register(noop(), ["open"], Phases::ENTER);
        let global = registry.register(noop(), Vec::<String>::new(), Phases::ENTER);
        let other = registry.register(noop(), ["read"], Phases::ENTER);

        assert_eq!(ids(registry.lookup("open", Phase::Enter)), [global, named]);
        assert_eq!(ids(registry.lookup("read", Phase::Enter)), [global, other]);
        assert_eq!(ids(registry.lookup("close", Phase::Enter)), [global]);
        assert!(ids(registry.lookup("open", Phase::Exit)).is_empty());
    }

    #[test]
    fn phases_are_separate() {
        let mut registry = Registry::new();
        let enter = registry.register(noop(), ["open"], Phases::ENTER);
        let exit = registry.register(noop(), ["open"], Phases::EXIT);
        let both = registry.register(noop(), ["open"], Phases::BOTH);

        assert_eq!(ids(registry.lookup("open", Phase::Enter)), [enter, both]);
        assert_eq!(ids(registry.lookup("open", Phase::Exit)), [exit, both]);
        assert!(registry.wants("open", Phase::Exit));
        assert!(!registry.wants("read", Phase::Exit));
    }

    #[test]
    fn no_deduplication() {
        let mut registry = Registry::new();
        let sink = noop();
        let a = registry.register(sink.clone(), ["open", "openat"], Phases::EXIT);
        let b = registry.register(sink.clone(), Vec::<&str>::new(), Phases::EXIT);
        let c = registry.register(sink, ["open"], Phases::EXIT);

        assert_eq!(ids(registry.lookup("open", Phase::Exit)), [b, a, c]);
        assert_eq!(ids(registry.lookup("openat", Phase::Exit)), [b, a]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn interest() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());
        assert!(!registry.is_interested("open"));

        registry.register(noop(), ["open"], Phases::EXIT);
        assert!(registry.is_interested("open"));
        assert!(!registry.is_interested("read"));

        registry.register(noop(), Vec::<String>::new(), Phases::ENTER);
        assert!(registry.is_interested("read"));
    }
}
