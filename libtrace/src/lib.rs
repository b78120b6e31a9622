/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A syscall tracing engine.
//!
//! A [`Tracer`] drives a [`Control`] backend (usually ptrace, see the
//! `libtrace-ptrace` crate) from one syscall stop to the next. At every stop
//! it decodes the arguments of the call according to its [`Signature`] and
//! hands the resulting [`Trace`] to whoever subscribed to that syscall, either
//! by callback or through a bounded channel.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod config;
mod control;
pub mod decode;
mod dispatch;
mod error;
pub mod process;
mod registry;
mod signature;
pub mod testing;
mod tracer;
mod value;

pub use config::*;
pub use control::*;
pub use dispatch::DispatchStats;
pub use error::*;
pub use registry::*;
pub use signature::*;
pub use tracer::*;
pub use value::*;

pub use process::ExitStatus;
pub use process::Pid;

/// The identifier of a thread. Syscall stops are per thread, so events are
/// keyed by thread id rather than process id.
pub type Tid = Pid;

pub use libtrace_memory as memory;
pub use libtrace_memory::MemoryAccess;

// Reexport nix Signal type.
pub use nix::sys::signal::Signal;
