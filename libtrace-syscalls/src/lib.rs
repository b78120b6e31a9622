/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Syscall signatures for the host architecture.
//!
//! Every syscall the kernel of the host architecture knows about gets a
//! signature carrying its name. A curated subset (file I/O, paths, memory
//! mapping, processes and sockets) also has typed argument descriptors; the
//! rest are shown without arguments.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg(target_os = "linux")]

#[macro_use]
mod macros;

mod curated;
pub mod flags;

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use libtrace::Arg;
use libtrace::Signature;
use libtrace::SignatureTable;

pub use syscalls::Sysno;

/// Syscall numbers are probed up to here.
const MAX_SYSNO: usize = 1024;

lazy_static! {
    static ref TABLE: LinuxTable = LinuxTable::build();
}

/// The signature table of the host architecture.
#[derive(Debug)]
pub struct LinuxTable {
    by_id: HashMap<usize, Arc<Signature>>,
    by_name: HashMap<&'static str, usize>,
}

impl LinuxTable {
    /// Returns the table. It is built on first use.
    pub fn get() -> &'static LinuxTable {
        &TABLE
    }

    fn build() -> Self {
        let mut curated: HashMap<&'static str, Vec<Arg>> = curated::curated().into_iter().collect();

        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();

        for id in 0..MAX_SYSNO {
            let Some(sysno) = Sysno::new(id) else {
                continue;
            };

            let name = sysno.name();
            let args = curated.remove(name).unwrap_or_default();

            by_id.insert(id, Arc::new(Signature::new(id, name, args)));
            by_name.insert(name, id);
        }

        Self { by_id, by_name }
    }

    /// Looks up a syscall number by name.
    pub fn id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Looks up a signature by syscall name.
    pub fn by_name(&self, name: &str) -> Option<Arc<Signature>> {
        self.id(name).and_then(|id| self.lookup(id))
    }

    /// Number of syscalls in the table.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if the table is empty. It never is on a supported
    /// architecture.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates over all signatures, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Signature>> {
        self.by_id.values()
    }
}

impl SignatureTable for LinuxTable {
    fn lookup(&self, id: usize) -> Option<Arc<Signature>> {
        self.by_id.get(&id).cloned()
    }

    fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use libtrace::decode::Decoder;
    use libtrace::ArgType;
    use libtrace::BufferLen;
    use libtrace_memory::SparseMemory;

    use super::*;

    #[test]
    fn ids_match_sysno() {
        let table = LinuxTable::get();
        assert!(!table.is_empty());

        for name in ["read", "write", "close", "openat", "mmap", "exit_group"] {
            let sysno: Sysno = name.parse().unwrap();
            assert_eq!(table.id(name), Some(sysno.id() as usize), "{}", name);
            assert_eq!(table.lookup(sysno.id() as usize).unwrap().name, name);
        }
    }

    #[test]
    fn read_write() {
        let table = LinuxTable::get();

        let read = table.by_name("read").unwrap();
        let types: Vec<ArgType> = read.args.iter().map(|arg| arg.ty).collect();
        assert_eq!(
            types,
            [ArgType::Fd, ArgType::Buffer(BufferLen::Return), ArgType::Uint]
        );
        assert!(!read.args[1].is_const);

        let write = table.by_name("write").unwrap();
        assert_eq!(write.args[1].ty, ArgType::Buffer(BufferLen::Arg(2)));
        assert!(write.args[1].is_const);
    }

    #[test]
    fn uncurated_has_no_args() {
        let table = LinuxTable::get();
        let sig = table.by_name("sched_yield").unwrap();
        assert!(sig.args.is_empty());
    }

    #[test]
    fn buffer_lengths_in_range() {
        for sig in LinuxTable::get().iter() {
            for arg in &sig.args {
                if let ArgType::Buffer(BufferLen::Arg(i)) = arg.ty {
                    assert!(i < sig.args.len(), "{}: {}", sig.name, arg.name);
                    assert_ne!(sig.args[i].ty, arg.ty);
                }
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn legacy_calls() {
        let table = LinuxTable::get();
        assert!(table.contains_name("open"));
        assert_eq!(table.by_name("open").unwrap().args.len(), 3);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn legacy_calls() {
        let table = LinuxTable::get();
        assert!(!table.contains_name("open"));
        assert!(table.contains_name("openat"));
    }

    #[test]
    fn decode_openat() {
        let openat = LinuxTable::get().by_name("openat").unwrap();
        let mut memory = SparseMemory::new();
        memory.map_cstr(0x1000, "/etc/hosts");

        let words = [
            libc::AT_FDCWD as u64,
            0x1000,
            (libc::O_RDONLY | libc::O_CLOEXEC) as u64,
            0,
            0,
            0,
        ];
        let args = Decoder::default().enter(&openat, &words, &memory);
        let text: Vec<&str> = args.iter().map(|a| a.text.as_str()).collect();
        assert_eq!(text, ["AT_FDCWD", "/etc/hosts", "O_RDONLY|O_CLOEXEC", "0"]);
    }

    #[test]
    fn signature_json() {
        let close = LinuxTable::get().by_name("close").unwrap();
        let json = serde_json::to_value(&*close).unwrap();
        assert_eq!(json["name"], "close");
        assert_eq!(json["args"][0]["type"], "fd");
        assert_eq!(json["args"][0]["const"], true);
    }
}
