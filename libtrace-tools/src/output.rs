/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use libtrace::Trace;
use libtrace::Tracer;
use tokio::sync::mpsc;

/// Number of events the JSON printer may fall behind by.
const CHANNEL_CAPACITY: usize = 1024;

/// These never return, so they are shown on entry.
const NO_RETURN: [&str; 2] = ["exit", "exit_group"];

fn print_exit(trace: &Trace) {
    eprintln!("[pid {}] {}", trace.tid.colored(), trace);
}

fn print_no_return(trace: &Trace) {
    eprintln!("[pid {}] {} = ?", trace.tid.colored(), trace);
}

/// Prints one line per completed call to stderr, the way strace does.
pub fn text(tracer: &mut Tracer, names: &[String]) {
    let no_return: Vec<&str> = NO_RETURN
        .iter()
        .copied()
        .filter(|name| names.is_empty() || names.iter().any(|n| n == name))
        .collect();

    if names.is_empty() {
        tracer.register_global_callback_on_exit(print_exit);
    } else {
        tracer.register_callback_on_exit(print_exit, names.iter().cloned());
    }

    if !no_return.is_empty() {
        tracer.register_callback_on_enter(print_no_return, no_return);
    }
}

/// Prints every event as a line of JSON on stdout. Events go through a stream
/// and are printed on another thread, which finishes once the trace is over.
pub fn json(tracer: &mut Tracer, names: &[String]) -> io::Result<JoinHandle<anyhow::Result<()>>> {
    let (tx, mut rx) = mpsc::channel::<Arc<Trace>>(CHANNEL_CAPACITY);

    if names.is_empty() {
        tracer.register_global_stream(tx);
    } else {
        tracer.register_stream(tx, names.iter().cloned());
    }

    thread::Builder::new()
        .name("json-printer".into())
        .spawn(move || {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            while let Some(trace) = rx.blocking_recv() {
                serde_json::to_writer(&mut out, &*trace)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            Ok(())
        })
}
