/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Process and thread identifiers and exit statuses of tracees.

use core::fmt;

use nix::sys::signal;
use nix::sys::signal::SigHandler;
use nix::sys::signal::SigSet;
use nix::sys::signal::SigmaskHow;
use nix::sys::signal::Signal;
use serde::Deserialize;
use serde::Serialize;

/// A process or thread ID. Every thread of a tracee is traced individually, so
/// most of the time this is really a TID.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Pid(libc::pid_t);

impl Pid {
    /// Creates a `Pid` from a raw `pid_t`.
    pub const fn from_raw(pid: libc::pid_t) -> Self {
        Self(pid)
    }

    /// Gets the raw `pid_t` from this `Pid`.
    pub const fn as_raw(self) -> libc::pid_t {
        self.0
    }

    /// Returns a `Display`able that is color-coded. That is, the same PID will
    /// get the same color. This makes it easy to visually recognize threads
    /// when looking through interleaved trace output.
    ///
    /// Note that while the same PIDs always have the same color, different PIDs
    /// may also have the same color if they fall into the same color bucket.
    pub fn colored(self) -> ColoredPid {
        ColoredPid(self)
    }
}

impl From<nix::unistd::Pid> for Pid {
    fn from(pid: nix::unistd::Pid) -> Pid {
        Self(pid.as_raw())
    }
}

impl From<Pid> for nix::unistd::Pid {
    fn from(pid: Pid) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(pid.as_raw())
    }
}

impl From<libc::pid_t> for Pid {
    fn from(pid: libc::pid_t) -> Pid {
        Pid::from_raw(pid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A colored pid.
pub struct ColoredPid(Pid);

impl ColoredPid {
    /// Gets the ansi color code for the current PID. Returns `None` if not
    /// writing to a terminal.
    fn ansi_code(&self) -> Option<&'static str> {
        if colored::control::SHOULD_COLORIZE.should_colorize() {
            // `colored::Colorize` allocates a string for every call. A trace
            // prints a PID on every line, so use the raw codes instead.
            Some(match self.0.as_raw() % 6 {
                0 => "\x1b[0;31m", // Red
                1 => "\x1b[0;32m", // Green
                2 => "\x1b[0;33m", // Yellow
                3 => "\x1b[0;34m", // Blue
                4 => "\x1b[0;35m", // Magenta
                _ => "\x1b[0;36m", // Cyan
            })
        } else {
            None
        }
    }
}

impl fmt::Display for ColoredPid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(color) = self.ansi_code() {
            write!(f, "{}{}\x1b[0m", color, self.0)
        } else {
            fmt::Display::fmt(&self.0, f)
        }
    }
}

/// Describes how a traced process ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExitStatus {
    /// Program exited with an exit code.
    Exited(i32),
    /// Program killed by signal, with or without a coredump.
    Signaled(Signal, bool),
}

impl ExitStatus {
    /// A successful exit status.
    pub const SUCCESS: Self = ExitStatus::Exited(0);

    /// Constructs an `ExitStatus` from a raw wait status. Returns `None` if the
    /// status does not describe a terminated process.
    pub fn from_raw(status: i32) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(ExitStatus::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Signal::try_from(libc::WTERMSIG(status))
                .ok()
                .map(|sig| ExitStatus::Signaled(sig, libc::WCOREDUMP(status)))
        } else {
            None
        }
    }

    /// Converts the exit status into a raw wait status.
    pub fn into_raw(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code << 8,
            ExitStatus::Signaled(sig, coredump) => {
                if coredump {
                    (sig as i32 | 0x80) & 0xff
                } else {
                    sig as i32 & 0x7f
                }
            }
        }
    }

    /// Propagate the exit status such that the current process exits in the same
    /// way that the traced process exited.
    pub fn raise_or_exit(self) -> ! {
        match self {
            ExitStatus::Signaled(signal, core_dump) => {
                if core_dump {
                    // Don't dump our own core on top of the tracee's.
                    let limit = libc::rlimit {
                        rlim_cur: 0,
                        rlim_max: 0,
                    };
                    unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
                }

                let _ = unsafe { signal::signal(signal, SigHandler::SigDfl) };
                let _ = signal::raise(signal);

                let mut mask = SigSet::empty();
                mask.add(signal);
                let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None);

                // In case the signal is not fatal.
                std::process::exit(signal as i32 + 128);
            }
            ExitStatus::Exited(code) => std::process::exit(code),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with {}", code),
            ExitStatus::Signaled(sig, true) => write!(f, "killed by {} (core dumped)", sig),
            ExitStatus::Signaled(sig, false) => write!(f, "killed by {}", sig),
        }
    }
}

impl serde::Serialize for ExitStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_i32(self.into_raw())
    }
}

impl<'de> serde::Deserialize<'de> for ExitStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let value = i32::deserialize(deserializer)?;
        ExitStatus::from_raw(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid exit status {:#x}", value)))
    }
}
