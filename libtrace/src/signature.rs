/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Static descriptions of syscalls: their names and how each argument word is
//! to be decoded.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

/// The maximum number of arguments a syscall can take.
pub const MAX_ARGS: usize = 6;

/// A table of named bits. Renders a word as `A|B|0x40`, with any leftover bits
/// that have no name appended in hex.
#[derive(Debug, Eq, PartialEq)]
pub struct FlagTable {
    /// Name of the table, e.g. `open_flags`.
    pub name: &'static str,

    /// Some flag words carry an enumerated field in their low bits (like the
    /// access mode in `open(2)` flags). This is the mask for that field plus
    /// the names of its values. The field is rendered first.
    pub mode: Option<(u64, &'static [(u64, &'static str)])>,

    /// Single bits (or groups of bits) and their names.
    pub bits: &'static [(u64, &'static str)],
}

impl FlagTable {
    /// Renders a flag word.
    pub fn render(&self, word: u64) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut rest = word;

        if let Some((mask, values)) = self.mode {
            let mode = word & mask;
            match values.iter().find(|(value, _)| *value == mode) {
                Some((_, name)) => parts.push((*name).to_string()),
                None => parts.push(format!("{:#x}", mode)),
            }
            rest &= !mask;
        }

        for (bits, name) in self.bits {
            if *bits != 0 && rest & bits == *bits {
                parts.push((*name).to_string());
                rest &= !bits;
            }
        }

        if rest != 0 {
            parts.push(format!("{:#x}", rest));
        }

        if parts.is_empty() {
            "0".to_string()
        } else {
            parts.join("|")
        }
    }
}

/// A table of named constants. Renders a word by name, falling back to
/// decimal.
#[derive(Debug, Eq, PartialEq)]
pub struct EnumTable {
    /// Name of the table, e.g. `whence`.
    pub name: &'static str,

    /// The known values.
    pub values: &'static [(u64, &'static str)],
}

impl EnumTable {
    /// Renders a constant.
    pub fn render(&self, word: u64) -> String {
        match self.values.iter().find(|(value, _)| *value == word) {
            Some((_, name)) => (*name).to_string(),
            None => (word as i64).to_string(),
        }
    }
}

/// Where the length of a buffer argument comes from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferLen {
    /// The word of another argument of the same call (0-based).
    Arg(usize),

    /// The (non-negative) return value of the call. Only known on exit.
    Return,
}

/// How to decode one raw argument word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgType {
    /// Signed decimal.
    Int,
    /// Unsigned decimal.
    Uint,
    /// An opaque word or a pointer that is not followed.
    Hex,
    /// Permission bits and the like.
    Octal,
    /// A file descriptor. `AT_FDCWD` is rendered by name.
    Fd,
    /// A bit mask.
    Flags(&'static FlagTable),
    /// A constant from a fixed set.
    Enum(&'static EnumTable),
    /// A pointer to a NUL terminated string.
    CString,
    /// A pointer to a buffer of bytes.
    Buffer(BufferLen),
}

impl ArgType {
    /// Returns true if the word is an address that gets dereferenced.
    pub fn is_pointer(&self) -> bool {
        matches!(self, ArgType::CString | ArgType::Buffer(_))
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArgType::Int => f.write_str("int"),
            ArgType::Uint => f.write_str("uint"),
            ArgType::Hex => f.write_str("hex"),
            ArgType::Octal => f.write_str("octal"),
            ArgType::Fd => f.write_str("fd"),
            ArgType::Flags(table) => write!(f, "flags({})", table.name),
            ArgType::Enum(table) => write!(f, "enum({})", table.name),
            ArgType::CString => f.write_str("cstring"),
            ArgType::Buffer(BufferLen::Arg(i)) => write!(f, "buffer(arg{})", i),
            ArgType::Buffer(BufferLen::Return) => f.write_str("buffer(ret)"),
        }
    }
}

impl Serialize for ArgType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Describes one argument of a syscall.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Arg {
    /// Name of the argument, e.g. `pathname`.
    pub name: String,

    /// How the raw word is decoded.
    #[serde(rename = "type")]
    pub ty: ArgType,

    /// True if the call does not modify what this argument refers to. Only
    /// non-constant pointer arguments are decoded again when the call returns.
    #[serde(rename = "const")]
    pub is_const: bool,
}

impl Arg {
    /// Creates a new argument descriptor.
    pub fn new<S: Into<String>>(name: S, ty: ArgType, is_const: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            is_const,
        }
    }

    /// An argument the call only reads.
    pub fn input<S: Into<String>>(name: S, ty: ArgType) -> Self {
        Self::new(name, ty, true)
    }

    /// An argument the call may write through (an out-parameter).
    pub fn output<S: Into<String>>(name: S, ty: ArgType) -> Self {
        Self::new(name, ty, false)
    }
}

/// The signature of a syscall.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Signature {
    /// Syscall number on the traced architecture.
    pub id: usize,

    /// Name of the syscall.
    pub name: String,

    /// Argument descriptors, in register order.
    pub args: Vec<Arg>,
}

impl Signature {
    /// Creates a new signature. Only the first six arguments are kept since no
    /// syscall can take more.
    pub fn new<S: Into<String>>(id: usize, name: S, mut args: Vec<Arg>) -> Self {
        debug_assert!(args.len() <= MAX_ARGS);
        args.truncate(MAX_ARGS);
        Self {
            id,
            name: name.into(),
            args,
        }
    }

    /// The signature used for a syscall number the table does not know. It is
    /// named by its number and has no arguments.
    pub fn unknown(id: usize) -> Self {
        Self::new(id, id.to_string(), Vec::new())
    }
}

/// Maps syscall numbers to signatures. A table must not change while it is
/// being used to trace.
pub trait SignatureTable {
    /// Looks up the signature of a syscall number.
    fn lookup(&self, id: usize) -> Option<Arc<Signature>>;

    /// Returns true if a syscall with this name is in the table.
    fn contains_name(&self, name: &str) -> bool;
}

impl<T: SignatureTable + ?Sized> SignatureTable for &T {
    fn lookup(&self, id: usize) -> Option<Arc<Signature>> {
        (**self).lookup(id)
    }

    fn contains_name(&self, name: &str) -> bool {
        (**self).contains_name(name)
    }
}

impl<T: SignatureTable + ?Sized> SignatureTable for Arc<T> {
    fn lookup(&self, id: usize) -> Option<Arc<Signature>> {
        (**self).lookup(id)
    }

    fn contains_name(&self, name: &str) -> bool {
        (**self).contains_name(name)
    }
}

/// A signature table built at runtime from a list of signatures.
#[derive(Clone, Debug, Default)]
pub struct MapTable {
    by_id: HashMap<usize, Arc<Signature>>,
}

impl MapTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signature, replacing any with the same number.
    pub fn insert(&mut self, signature: Signature) -> &mut Self {
        self.by_id.insert(signature.id, Arc::new(signature));
        self
    }

    /// Number of signatures in the table.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if the table has no signatures.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl SignatureTable for MapTable {
    fn lookup(&self, id: usize) -> Option<Arc<Signature>> {
        self.by_id.get(&id).cloned()
    }

    fn contains_name(&self, name: &str) -> bool {
        self.by_id.values().any(|sig| sig.name == name)
    }
}

impl FromIterator<Signature> for MapTable {
    fn from_iter<I: IntoIterator<Item = Signature>>(iter: I) -> Self {
        let mut table = Self::new();
        for signature in iter {
            table.insert(signature);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static OPEN_FLAGS: FlagTable = FlagTable {
        name: "open_flags",
        mode: Some((0b11, &[(0, "O_RDONLY"), (1, "O_WRONLY"), (2, "O_RDWR")])),
        bits: &[(0o100, "O_CREAT"), (0o2000000, "O_CLOEXEC")],
    };

    static PROT: FlagTable = FlagTable {
        name: "prot",
        mode: None,
        bits: &[(1, "PROT_READ"), (2, "PROT_WRITE"), (4, "PROT_EXEC")],
    };

    static WHENCE: EnumTable = EnumTable {
        name: "whence",
        values: &[(0, "SEEK_SET"), (1, "SEEK_CUR"), (2, "SEEK_END")],
    };

    #[test]
    fn render_flags() {
        assert_eq!(OPEN_FLAGS.render(0), "O_RDONLY");
        assert_eq!(OPEN_FLAGS.render(0o2000101), "O_WRONLY|O_CREAT|O_CLOEXEC");
        assert_eq!(OPEN_FLAGS.render(3), "0x3");
        assert_eq!(PROT.render(0), "0");
        assert_eq!(PROT.render(3), "PROT_READ|PROT_WRITE");
        assert_eq!(PROT.render(0x41), "PROT_READ|0x40");
    }

    #[test]
    fn render_enum() {
        assert_eq!(WHENCE.render(2), "SEEK_END");
        assert_eq!(WHENCE.render(9), "9");
    }

    #[test]
    fn unknown_signature() {
        let sig = Signature::unknown(1234);
        assert_eq!(sig.name, "1234");
        assert!(sig.args.is_empty());
    }

    #[test]
    fn map_table() {
        let table: MapTable = vec![
            Signature::new(
                2,
                "open",
                vec![
                    Arg::output("path", ArgType::CString),
                    Arg::output("flags", ArgType::Int),
                ],
            ),
            Signature::new(3, "close", vec![Arg::input("fd", ArgType::Fd)]),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(2).unwrap().name, "open");
        assert!(table.lookup(4).is_none());
        assert!(table.contains_name("close"));
        assert!(!table.contains_name("read"));
    }

    #[test]
    fn signature_json() {
        let sig = Signature::new(
            0,
            "read",
            vec![
                Arg::input("fd", ArgType::Fd),
                Arg::output("buf", ArgType::Buffer(BufferLen::Return)),
                Arg::input("count", ArgType::Uint),
            ],
        );
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["name"], "read");
        assert_eq!(json["args"][1]["type"], "buffer(ret)");
        assert_eq!(json["args"][1]["const"], false);
    }
}
