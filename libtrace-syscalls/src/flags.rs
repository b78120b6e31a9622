/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Named constants for flag and enum arguments.
//!
//! Bits that contain other bits (`O_SYNC` contains `O_DSYNC`, `O_TMPFILE`
//! contains `O_DIRECTORY`) are listed first so the wider name wins.

use libtrace::EnumTable;
use libtrace::FlagTable;

macro_rules! named {
    ($($name:ident),* $(,)?) => {
        &[$((libc::$name as u64, stringify!($name))),*]
    };
}

/// Flags of `open(2)` and friends.
pub static OPEN_FLAGS: FlagTable = FlagTable {
    name: "open_flags",
    mode: Some((
        libc::O_ACCMODE as u64,
        named![O_RDONLY, O_WRONLY, O_RDWR],
    )),
    bits: named![
        O_CREAT,
        O_EXCL,
        O_NOCTTY,
        O_TRUNC,
        O_APPEND,
        O_NONBLOCK,
        O_SYNC,
        O_DSYNC,
        O_TMPFILE,
        O_DIRECTORY,
        O_NOFOLLOW,
        O_CLOEXEC,
        O_ASYNC,
        O_LARGEFILE,
        O_DIRECT,
        O_PATH,
        O_NOATIME,
    ],
};

/// Flags of `dup3(2)` and `pipe2(2)`.
pub static FD_FLAGS: FlagTable = FlagTable {
    name: "fd_flags",
    mode: None,
    bits: named![O_CLOEXEC, O_NONBLOCK, O_DIRECT],
};

/// `AT_*` flags of the `*at` calls.
pub static AT_FLAGS: FlagTable = FlagTable {
    name: "at_flags",
    mode: None,
    bits: named![
        AT_SYMLINK_NOFOLLOW,
        AT_REMOVEDIR,
        AT_SYMLINK_FOLLOW,
        AT_NO_AUTOMOUNT,
        AT_EMPTY_PATH,
    ],
};

/// Modes of `access(2)`. `F_OK` is zero and renders as `0`.
pub static ACCESS_MODE: FlagTable = FlagTable {
    name: "access_mode",
    mode: None,
    bits: named![R_OK, W_OK, X_OK],
};

/// Memory protection of `mmap(2)` and `mprotect(2)`.
pub static PROT_FLAGS: FlagTable = FlagTable {
    name: "prot",
    mode: None,
    bits: named![
        PROT_READ,
        PROT_WRITE,
        PROT_EXEC,
        PROT_GROWSDOWN,
        PROT_GROWSUP,
    ],
};

/// The sharing type lives in the low bits of the `mmap(2)` flags.
const MAP_TYPE: u64 = 0x0f;

/// Flags of `mmap(2)`.
pub static MAP_FLAGS: FlagTable = FlagTable {
    name: "map_flags",
    mode: Some((
        MAP_TYPE,
        named![MAP_SHARED, MAP_PRIVATE, MAP_SHARED_VALIDATE],
    )),
    bits: named![
        MAP_FIXED,
        MAP_ANONYMOUS,
        MAP_GROWSDOWN,
        MAP_DENYWRITE,
        MAP_EXECUTABLE,
        MAP_LOCKED,
        MAP_NORESERVE,
        MAP_POPULATE,
        MAP_NONBLOCK,
        MAP_STACK,
        MAP_HUGETLB,
        MAP_SYNC,
        MAP_FIXED_NOREPLACE,
    ],
};

/// Socket type, plus the flags `socket(2)` and `accept4(2)` take in the same
/// word.
pub static SOCK_TYPE: FlagTable = FlagTable {
    name: "sock_type",
    mode: Some((
        0x0f,
        named![SOCK_STREAM, SOCK_DGRAM, SOCK_RAW, SOCK_RDM, SOCK_SEQPACKET],
    )),
    bits: named![SOCK_NONBLOCK, SOCK_CLOEXEC],
};

/// `lseek(2)` origin.
pub static WHENCE: EnumTable = EnumTable {
    name: "whence",
    values: named![SEEK_SET, SEEK_CUR, SEEK_END, SEEK_DATA, SEEK_HOLE],
};

/// Address families.
pub static ADDRESS_FAMILY: EnumTable = EnumTable {
    name: "address_family",
    values: named![
        AF_UNSPEC, AF_UNIX, AF_INET, AF_INET6, AF_NETLINK, AF_PACKET, AF_VSOCK,
    ],
};

/// `fcntl(2)` commands.
pub static FCNTL_CMD: EnumTable = EnumTable {
    name: "fcntl_cmd",
    values: named![
        F_DUPFD,
        F_GETFD,
        F_SETFD,
        F_GETFL,
        F_SETFL,
        F_GETLK,
        F_SETLK,
        F_SETLKW,
        F_DUPFD_CLOEXEC,
    ],
};

/// Signal numbers.
pub static SIGNALS: EnumTable = EnumTable {
    name: "signal",
    values: named![
        SIGHUP, SIGINT, SIGQUIT, SIGILL, SIGTRAP, SIGABRT, SIGBUS, SIGFPE, SIGKILL, SIGUSR1,
        SIGSEGV, SIGUSR2, SIGPIPE, SIGALRM, SIGTERM, SIGCHLD, SIGCONT, SIGSTOP, SIGTSTP,
        SIGTTIN, SIGTTOU, SIGURG, SIGXCPU, SIGXFSZ, SIGVTALRM, SIGPROF, SIGWINCH, SIGIO,
        SIGSYS,
    ],
};
