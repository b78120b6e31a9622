/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Syscalls whose arguments are decoded. Names that do not exist on the host
//! architecture (`open` on aarch64, for instance) are ignored.

use libtrace::ArgType::*;
use libtrace::BufferLen;

use crate::flags::*;

signatures! {
    // File I/O
    read(fd: Fd, out buf: Buffer(BufferLen::Return), count: Uint);
    write(fd: Fd, buf: Buffer(BufferLen::Arg(2)), count: Uint);
    pread64(fd: Fd, out buf: Buffer(BufferLen::Return), count: Uint, offset: Int);
    pwrite64(fd: Fd, buf: Buffer(BufferLen::Arg(2)), count: Uint, offset: Int);
    readv(fd: Fd, iov: Hex, iovcnt: Int);
    writev(fd: Fd, iov: Hex, iovcnt: Int);
    lseek(fd: Fd, offset: Int, whence: Enum(&WHENCE));
    close(fd: Fd);
    dup(oldfd: Fd);
    dup2(oldfd: Fd, newfd: Fd);
    dup3(oldfd: Fd, newfd: Fd, flags: Flags(&FD_FLAGS));
    pipe(out fds: Hex);
    pipe2(out fds: Hex, flags: Flags(&FD_FLAGS));
    fcntl(fd: Fd, cmd: Enum(&FCNTL_CMD), arg: Hex);
    ioctl(fd: Fd, request: Hex, arg: Hex);
    fsync(fd: Fd);
    ftruncate(fd: Fd, length: Int);
    getdents64(fd: Fd, out dirp: Hex, count: Uint);

    // Paths
    open(path: CString, flags: Flags(&OPEN_FLAGS), mode: Octal);
    openat(dirfd: Fd, path: CString, flags: Flags(&OPEN_FLAGS), mode: Octal);
    creat(path: CString, mode: Octal);
    access(path: CString, mode: Flags(&ACCESS_MODE));
    faccessat(dirfd: Fd, path: CString, mode: Flags(&ACCESS_MODE));
    faccessat2(dirfd: Fd, path: CString, mode: Flags(&ACCESS_MODE), flags: Flags(&AT_FLAGS));
    stat(path: CString, out statbuf: Hex);
    lstat(path: CString, out statbuf: Hex);
    fstat(fd: Fd, out statbuf: Hex);
    newfstatat(dirfd: Fd, path: CString, out statbuf: Hex, flags: Flags(&AT_FLAGS));
    statx(dirfd: Fd, path: CString, flags: Flags(&AT_FLAGS), mask: Hex, out statxbuf: Hex);
    readlink(path: CString, out buf: Buffer(BufferLen::Return), bufsiz: Uint);
    readlinkat(dirfd: Fd, path: CString, out buf: Buffer(BufferLen::Return), bufsiz: Uint);
    getcwd(out buf: Buffer(BufferLen::Return), size: Uint);
    chdir(path: CString);
    fchdir(fd: Fd);
    mkdir(path: CString, mode: Octal);
    mkdirat(dirfd: Fd, path: CString, mode: Octal);
    rmdir(path: CString);
    unlink(path: CString);
    unlinkat(dirfd: Fd, path: CString, flags: Flags(&AT_FLAGS));
    rename(oldpath: CString, newpath: CString);
    renameat(olddirfd: Fd, oldpath: CString, newdirfd: Fd, newpath: CString);
    renameat2(olddirfd: Fd, oldpath: CString, newdirfd: Fd, newpath: CString, flags: Hex);
    link(oldpath: CString, newpath: CString);
    symlink(target: CString, linkpath: CString);
    symlinkat(target: CString, newdirfd: Fd, linkpath: CString);
    chmod(path: CString, mode: Octal);
    fchmod(fd: Fd, mode: Octal);
    fchmodat(dirfd: Fd, path: CString, mode: Octal);
    chown(path: CString, owner: Int, group: Int);
    fchown(fd: Fd, owner: Int, group: Int);
    truncate(path: CString, length: Int);
    umask(mask: Octal);

    // Memory
    brk(addr: Hex);
    mmap(addr: Hex, length: Uint, prot: Flags(&PROT_FLAGS), flags: Flags(&MAP_FLAGS), fd: Fd, offset: Hex);
    munmap(addr: Hex, length: Uint);
    mprotect(addr: Hex, length: Uint, prot: Flags(&PROT_FLAGS));
    mremap(old_address: Hex, old_size: Uint, new_size: Uint, flags: Hex, new_address: Hex);
    madvise(addr: Hex, length: Uint, advice: Int);

    // Processes
    execve(path: CString, argv: Hex, envp: Hex);
    execveat(dirfd: Fd, path: CString, argv: Hex, envp: Hex, flags: Flags(&AT_FLAGS));
    exit(status: Int);
    exit_group(status: Int);
    wait4(pid: Int, out wstatus: Hex, options: Hex, out rusage: Hex);
    kill(pid: Int, sig: Enum(&SIGNALS));
    tkill(tid: Int, sig: Enum(&SIGNALS));
    tgkill(tgid: Int, tid: Int, sig: Enum(&SIGNALS));
    getpid();
    getppid();
    gettid();
    getuid();
    geteuid();
    getgid();
    getegid();
    set_tid_address(tidptr: Hex);
    nanosleep(req: Hex, out rem: Hex);

    // Sockets
    socket(domain: Enum(&ADDRESS_FAMILY), ty: Flags(&SOCK_TYPE), protocol: Int);
    socketpair(domain: Enum(&ADDRESS_FAMILY), ty: Flags(&SOCK_TYPE), protocol: Int, out sv: Hex);
    connect(fd: Fd, addr: Hex, addrlen: Uint);
    bind(fd: Fd, addr: Hex, addrlen: Uint);
    listen(fd: Fd, backlog: Int);
    accept(fd: Fd, out addr: Hex, out addrlen: Hex);
    accept4(fd: Fd, out addr: Hex, out addrlen: Hex, flags: Flags(&SOCK_TYPE));
    sendto(fd: Fd, buf: Buffer(BufferLen::Arg(2)), len: Uint, flags: Hex, dest_addr: Hex, addrlen: Uint);
    recvfrom(fd: Fd, out buf: Buffer(BufferLen::Return), len: Uint, flags: Hex, out src_addr: Hex, out addrlen: Hex);
    shutdown(fd: Fd, how: Int);
}
