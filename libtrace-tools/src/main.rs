/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! `sctrace`: shows the syscalls made by a program, with decoded arguments.

mod filter;
mod logging;
mod output;

use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use libtrace::ExitStatus;
use libtrace::Pid;
use libtrace::StreamPolicy;
use libtrace::Tracer;
use libtrace::TracerConfig;
use libtrace::DEFAULT_MAX_SIZE;
use libtrace_ptrace::PtraceControl;
use libtrace_syscalls::LinuxTable;
use tracing::info;

use crate::filter::Filter;

/// A tool to trace system calls.
#[derive(Debug, Parser)]
struct Opts {
    /// Direct logging to a file. This can also be set with the RUST_LOG_FILE
    /// environment variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// The set of syscalls to trace, as a comma separated list of names. A
    /// leading `!` selects every syscall but the listed ones. Can be used
    /// multiple times. By default, all syscalls are traced.
    #[clap(long, value_name = "NAMES")]
    trace: Vec<Filter>,

    /// Maximum number of bytes shown of a string argument.
    #[clap(long = "string-size", short = 's', value_name = "N", default_value_t = DEFAULT_MAX_SIZE)]
    string_size: usize,

    /// Maximum number of bytes shown of a buffer argument.
    #[clap(long = "buffer-size", value_name = "N", default_value_t = DEFAULT_MAX_SIZE)]
    buffer_size: usize,

    /// Drop events instead of stalling the traced program when the JSON
    /// printer falls behind.
    #[clap(long)]
    drop: bool,

    /// Print every event, entries included, as a line of JSON on stdout.
    #[clap(long)]
    json: bool,

    /// Attach to a running process instead of starting one.
    #[clap(long, short = 'p', value_name = "PID", conflicts_with = "program")]
    attach: Option<i32>,

    /// Path of the program to trace.
    #[clap(value_name = "PROGRAM", required_unless_present = "attach")]
    program: Option<String>,

    /// Arguments to the program to trace.
    #[clap(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    program_args: Vec<String>,
}

impl Opts {
    fn config(&self) -> TracerConfig {
        TracerConfig {
            max_string_size: self.string_size,
            max_buffer_size: self.buffer_size,
            stream_policy: if self.drop {
                StreamPolicy::Drop
            } else {
                StreamPolicy::Block
            },
        }
    }
}

fn run(opts: Opts) -> anyhow::Result<Option<ExitStatus>> {
    let table = LinuxTable::get();
    let names = filter::selected(&opts.trace, table);

    let mut tracer = Tracer::with_config(table, opts.config());

    let printer = if opts.json {
        Some(output::json(&mut tracer, &names).context("failed to start the JSON printer")?)
    } else {
        output::text(&mut tracer, &names);
        None
    };

    let cancel = tracer.cancel_token();
    ctrlc::set_handler(move || cancel.cancel()).context("failed to set the Ctrl-C handler")?;

    let control = match (opts.attach, &opts.program) {
        (Some(pid), _) => PtraceControl::attach(Pid::from_raw(pid))
            .with_context(|| format!("failed to attach to process {}", pid))?,
        (None, Some(program)) => PtraceControl::spawn(program, &opts.program_args)
            .with_context(|| format!("failed to start {}", program))?,
        (None, None) => bail!("nothing to trace"),
    };

    let summary = tracer.run(control)?;

    if let Some(printer) = printer {
        printer
            .join()
            .map_err(|_| anyhow!("the JSON printer panicked"))?
            .context("failed to print events")?;
    }

    info!(
        events = summary.events,
        dropped = summary.dropped,
        sink_failures = summary.sink_failures,
        "done"
    );

    if summary.dropped > 0 {
        eprintln!("sctrace: {} events dropped", summary.dropped);
    }

    if summary.cancelled {
        eprintln!("sctrace: detached");
    } else if let Some(status) = summary.exit_status {
        eprintln!("+++ {} +++", status);
    }

    Ok(summary.exit_status)
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let log_guard = logging::init_tracing(opts.log_file.as_deref())?;
    let status = run(opts)?;
    drop(log_guard); // Flush logs before exiting.

    match status {
        Some(status) => status.raise_or_exit(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn parse_args() {
        let opts = Opts::try_parse_from([
            "sctrace",
            "--trace",
            "openat,close",
            "-s",
            "64",
            "--drop",
            "ls",
            "-l",
            "/tmp",
        ])
        .unwrap();

        assert_eq!(opts.program.as_deref(), Some("ls"));
        assert_eq!(opts.program_args, ["-l", "/tmp"]);
        assert_eq!(opts.trace.len(), 1);

        let config = opts.config();
        assert_eq!(config.max_string_size, 64);
        assert_eq!(config.max_buffer_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.stream_policy, StreamPolicy::Drop);
    }

    #[test]
    fn attach_or_program() {
        assert!(Opts::try_parse_from(["sctrace"]).is_err());
        assert!(Opts::try_parse_from(["sctrace", "-p", "1", "ls"]).is_err());

        let opts = Opts::try_parse_from(["sctrace", "--attach", "42", "--json"]).unwrap();
        assert_eq!(opts.attach, Some(42));
        assert!(opts.json);
        assert_eq!(opts.config().stream_policy, StreamPolicy::Block);
    }

    #[test]
    fn bad_filter() {
        assert!(Opts::try_parse_from(["sctrace", "--trace", "nope", "ls"]).is_err());
    }
}
