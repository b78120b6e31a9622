/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Decoded syscall events.

use core::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::Serializer;
use syscalls::Errno;

use crate::process::Pid;
use crate::signature::Signature;

/// The largest errno a syscall can return. Return values in
/// `-MAX_ERRNO..=-1` are errors.
pub const MAX_ERRNO: i64 = 4095;

/// Which side of a syscall a stop or an event is on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The thread is about to execute the call.
    Enter,
    /// The call has returned.
    Exit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Enter => f.write_str("enter"),
            Phase::Exit => f.write_str("exit"),
        }
    }
}

fn serialize_errno<S: Serializer>(errno: &Errno, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i32(errno.into_raw())
}

/// A typed argument value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// An opaque word.
    Hex(u64),
    /// A mode word.
    Octal(u64),
    /// A file descriptor.
    Fd(i32),
    /// A flag word.
    Flags(u64),
    /// A named constant.
    Enum(u64),
    /// A string read from the tracee. `bytes` never includes the terminator.
    Str {
        /// The bytes that were read.
        bytes: Vec<u8>,
        /// True if the string is longer than what was read.
        truncated: bool,
    },
    /// A buffer read from the tracee.
    Buffer {
        /// The bytes that were read.
        bytes: Vec<u8>,
        /// The length of the buffer according to the call.
        len: u64,
        /// True if fewer than `len` bytes were read.
        truncated: bool,
    },
    /// A NULL pointer.
    Null,
    /// A pointer whose first byte could not be read.
    Unreadable {
        /// The address.
        addr: u64,
        /// Why the read failed.
        #[serde(serialize_with = "serialize_errno")]
        errno: Errno,
    },
    /// The value cannot be known in this phase (e.g. a buffer whose length is
    /// the return value, on entry).
    Unavailable,
}

impl Value {
    /// Returns true if the value was cut short.
    pub fn is_truncated(&self) -> bool {
        matches!(
            self,
            Value::Str {
                truncated: true,
                ..
            } | Value::Buffer {
                truncated: true,
                ..
            }
        )
    }
}

/// One decoded argument: its typed value and the canonical rendering of it.
///
/// For strings and buffers `text` is the decoded bytes themselves (lossily
/// converted to UTF-8). The `Display` implementation quotes them and marks
/// truncation with a trailing `...`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ArgValue {
    /// The typed value.
    pub value: Value,
    /// Canonical rendering.
    pub text: String,
}

impl ArgValue {
    /// Creates an argument value.
    pub fn new<S: Into<String>>(value: Value, text: S) -> Self {
        Self {
            value,
            text: text.into(),
        }
    }

    /// A value that is not known yet. Rendered as `?`.
    pub fn unavailable() -> Self {
        Self::new(Value::Unavailable, "?")
    }

    /// Returns true if the value was cut short.
    pub fn is_truncated(&self) -> bool {
        self.value.is_truncated()
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            Value::Str { truncated, .. } | Value::Buffer { truncated, .. } => {
                write!(f, "{:?}", self.text)?;
                if *truncated {
                    f.write_str("...")?;
                }
                Ok(())
            }
            _ => f.write_str(&self.text),
        }
    }
}

/// The return value of a syscall.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReturnValue {
    /// The raw return value.
    pub code: i64,

    /// `"success"`, or the errno name and message for an error, e.g.
    /// `"ENOENT (No such file or directory)"`. Empty on entry.
    pub description: String,
}

impl ReturnValue {
    /// Classifies a raw return value.
    pub fn from_code(code: i64) -> Self {
        let description = match errno_of(code) {
            Some(errno) => match errno.name_and_description() {
                Some((name, message)) => format!("{} ({})", name, message),
                None => format!("errno {}", errno.into_raw()),
            },
            None => "success".to_string(),
        };

        Self { code, description }
    }

    /// The error this call failed with, if it failed.
    pub fn errno(&self) -> Option<Errno> {
        if self.description.is_empty() {
            None
        } else {
            errno_of(self.code)
        }
    }

    /// Returns true if the call failed.
    pub fn is_error(&self) -> bool {
        self.errno().is_some()
    }
}

/// Returns the errno encoded by a raw return value, if any.
pub(crate) fn errno_of(code: i64) -> Option<Errno> {
    if (-MAX_ERRNO..=-1).contains(&code) {
        Some(Errno::new(-code as i32))
    } else {
        None
    }
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_error() {
            write!(f, "-1 {}", self.description)
        } else if self.description.is_empty() {
            f.write_str("?")
        } else {
            write!(f, "{}", self.code)
        }
    }
}

/// One phase of one syscall made by one thread.
#[derive(Clone, Debug, Serialize)]
pub struct Trace {
    /// The thread that made the call.
    pub tid: Pid,

    /// The signature of the call.
    pub signature: Arc<Signature>,

    /// The decoded arguments, one per argument of the signature, in order.
    pub args: Vec<ArgValue>,

    /// The return value. Always the default on entry.
    #[serde(rename = "return")]
    pub ret: ReturnValue,

    /// True on exit, false on entry.
    pub exit: bool,
}

impl Trace {
    /// Name of the syscall.
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Which side of the call this event is on.
    pub fn phase(&self) -> Phase {
        if self.exit { Phase::Exit } else { Phase::Enter }
    }

    /// Looks up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.signature
            .args
            .iter()
            .position(|arg| arg.name == name)
            .and_then(|i| self.args.get(i))
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")?;
        if self.exit {
            write!(f, " = {}", self.ret)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Arg;
    use crate::signature::ArgType;

    #[test]
    fn return_value() {
        let ok = ReturnValue::from_code(3);
        assert_eq!(ok.description, "success");
        assert!(!ok.is_error());
        assert_eq!(ok.to_string(), "3");

        let err = ReturnValue::from_code(-2);
        assert_eq!(err.description, "ENOENT (No such file or directory)");
        assert_eq!(err.errno(), Some(Errno::ENOENT));
        assert_eq!(err.to_string(), "-1 ENOENT (No such file or directory)");

        // Large "negative" values such as addresses are not errors.
        let addr = ReturnValue::from_code(-4096);
        assert_eq!(addr.description, "success");

        assert_eq!(ReturnValue::default().to_string(), "?");
        assert!(!ReturnValue::default().is_error());
    }

    #[test]
    fn display_truncated_string() {
        let full = ArgValue::new(
            Value::Str {
                bytes: b"/etc/hosts".to_vec(),
                truncated: false,
            },
            "/etc/hosts",
        );
        assert_eq!(full.to_string(), "\"/etc/hosts\"");

        let cut = ArgValue::new(
            Value::Str {
                bytes: b"/etc".to_vec(),
                truncated: true,
            },
            "/etc",
        );
        assert_eq!(cut.to_string(), "\"/etc\"...");
        assert_eq!(cut.text.len(), 4);
    }

    #[test]
    fn display_trace() {
        let signature = Arc::new(Signature::new(
            3,
            "close",
            vec![Arg::input("fd", ArgType::Fd)],
        ));
        let mut trace = Trace {
            tid: Pid::from_raw(10),
            signature,
            args: vec![ArgValue::new(Value::Fd(4), "4")],
            ret: ReturnValue::default(),
            exit: false,
        };
        assert_eq!(trace.to_string(), "close(4)");
        assert_eq!(trace.phase(), Phase::Enter);
        assert_eq!(trace.arg("fd").map(|a| a.text.as_str()), Some("4"));

        trace.exit = true;
        trace.ret = ReturnValue::from_code(-9);
        assert!(trace.to_string().starts_with("close(4) = -1 EBADF ("));
    }

    #[test]
    fn trace_json() {
        let trace = Trace {
            tid: Pid::from_raw(10),
            signature: Arc::new(Signature::unknown(999)),
            args: Vec::new(),
            ret: ReturnValue::from_code(0),
            exit: true,
        };
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["tid"], 10);
        assert_eq!(json["signature"]["name"], "999");
        assert_eq!(json["return"]["description"], "success");

        let unreadable = ArgValue::new(
            Value::Unreadable {
                addr: 0x10,
                errno: Errno::EFAULT,
            },
            "0x10",
        );
        let json = serde_json::to_value(&unreadable).unwrap();
        assert_eq!(json["value"]["kind"], "unreadable");
        assert_eq!(json["value"]["value"]["errno"], 14);
    }
}
