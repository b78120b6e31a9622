/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The ptrace backend of libtrace.
//!
//! [`PtraceControl`] either spawns a program or attaches to a running process
//! and then follows every thread and child process it creates. Each traced
//! thread is resumed with `PTRACE_SYSCALL`, so it stops at both the entry and
//! the exit of every syscall.
//!
//! ```no_run
//! use libtrace::Tracer;
//! use libtrace_ptrace::PtraceControl;
//! use libtrace_syscalls::LinuxTable;
//!
//! let mut tracer = Tracer::new(LinuxTable::get());
//! tracer.register_global_callback(|trace| println!("{}", trace));
//!
//! let control = PtraceControl::spawn("ls", ["-l"]).unwrap();
//! let summary = tracer.run(control).unwrap();
//! println!("{:?}", summary.exit_status);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg(target_os = "linux")]

mod control;
mod memory;
mod notifier;
mod regs;
mod waitid;

pub use control::PtraceControl;
pub use memory::RemoteMemory;
pub use regs::RegAccess;
pub use regs::Regs;
