/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Turns raw argument words into typed values.
//!
//! Decoding never fails as a whole. A pointer that can't be followed becomes a
//! [`Value::Unreadable`] and the rest of the call is decoded as usual.

use libtrace_memory::Addr;
use libtrace_memory::Bounded;
use libtrace_memory::MemoryAccess;
use tracing::trace;

use crate::config::DEFAULT_MAX_SIZE;
use crate::signature::Arg;
use crate::signature::ArgType;
use crate::signature::BufferLen;
use crate::signature::Signature;
use crate::signature::MAX_ARGS;
use crate::value::errno_of;
use crate::value::ArgValue;
use crate::value::ReturnValue;
use crate::value::Value;

/// How much data may be copied out of the tracee per argument.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Maximum number of bytes read from a string.
    pub max_string: usize,
    /// Maximum number of bytes read from a buffer.
    pub max_buffer: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_string: DEFAULT_MAX_SIZE,
            max_buffer: DEFAULT_MAX_SIZE,
        }
    }
}

/// Decodes the arguments and return values of syscalls.
#[derive(Copy, Clone, Debug, Default)]
pub struct Decoder {
    limits: Limits,
}

impl Decoder {
    /// Creates a decoder with the given limits.
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Decodes the arguments of a call that is being entered. Buffers whose
    /// length is the return value are [`Value::Unavailable`].
    pub fn enter<M>(
        &self,
        signature: &Signature,
        words: &[u64; MAX_ARGS],
        memory: &M,
    ) -> Vec<ArgValue>
    where
        M: MemoryAccess + ?Sized,
    {
        signature
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| match words.get(i) {
                Some(&word) => self.decode_arg(signature, arg, words, word, None, memory),
                None => ArgValue::unavailable(),
            })
            .collect()
    }

    /// Decodes a call that has returned.
    ///
    /// `words` are the argument words as they were on entry: some
    /// architectures reuse argument registers for the return value. `entered`
    /// are the values decoded on entry, if the entry was decoded. Constant
    /// arguments and non-pointer arguments keep their entry value; pointer
    /// arguments the call may have written through are read again.
    pub fn exit<M>(
        &self,
        signature: &Signature,
        words: &[u64; MAX_ARGS],
        ret: i64,
        entered: Option<&[ArgValue]>,
        memory: &M,
    ) -> (Vec<ArgValue>, ReturnValue)
    where
        M: MemoryAccess + ?Sized,
    {
        let args = signature
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let reusable = arg.ty != ArgType::Buffer(BufferLen::Return)
                    && (arg.is_const || !arg.ty.is_pointer());

                match (entered.and_then(|values| values.get(i)), words.get(i)) {
                    (Some(value), _) if reusable => value.clone(),
                    (_, Some(&word)) => {
                        self.decode_arg(signature, arg, words, word, Some(ret), memory)
                    }
                    (_, None) => ArgValue::unavailable(),
                }
            })
            .collect();

        (args, ReturnValue::from_code(ret))
    }

    fn decode_arg<M>(
        &self,
        signature: &Signature,
        arg: &Arg,
        words: &[u64; MAX_ARGS],
        word: u64,
        ret: Option<i64>,
        memory: &M,
    ) -> ArgValue
    where
        M: MemoryAccess + ?Sized,
    {
        let value = match arg.ty {
            ArgType::Int => ArgValue::new(Value::Int(word as i64), (word as i64).to_string()),
            ArgType::Uint => ArgValue::new(Value::Uint(word), word.to_string()),
            ArgType::Hex => ArgValue::new(Value::Hex(word), format!("{:#x}", word)),
            ArgType::Octal => ArgValue::new(Value::Octal(word), octal(word)),
            ArgType::Fd => {
                let fd = word as i32;
                let text = if fd == libc::AT_FDCWD {
                    "AT_FDCWD".to_string()
                } else {
                    fd.to_string()
                };
                ArgValue::new(Value::Fd(fd), text)
            }
            ArgType::Flags(table) => ArgValue::new(Value::Flags(word), table.render(word)),
            ArgType::Enum(table) => ArgValue::new(Value::Enum(word), table.render(word)),
            ArgType::CString => self.decode_cstring(word, memory),
            ArgType::Buffer(BufferLen::Arg(pos)) => {
                if pos < signature.args.len() && pos < MAX_ARGS {
                    self.decode_buffer(word, words[pos], memory)
                } else {
                    ArgValue::unavailable()
                }
            }
            ArgType::Buffer(BufferLen::Return) => match ret {
                Some(ret) if errno_of(ret).is_none() && ret >= 0 => {
                    self.decode_buffer(word, ret as u64, memory)
                }
                _ => ArgValue::unavailable(),
            },
        };

        trace!(
            syscall = %signature.name,
            arg = %arg.name,
            ty = %arg.ty,
            "decoded {:#x} as {}",
            word,
            value
        );

        value
    }

    fn decode_cstring<M>(&self, word: u64, memory: &M) -> ArgValue
    where
        M: MemoryAccess + ?Sized,
    {
        let addr = match Addr::from_raw(word as usize) {
            Some(addr) => addr,
            None => return null(),
        };

        match memory.read_cstring(addr, self.limits.max_string) {
            Ok(Bounded { bytes, truncated }) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                ArgValue::new(Value::Str { bytes, truncated }, text)
            }
            Err(errno) => unreadable(word, errno),
        }
    }

    fn decode_buffer<M>(&self, word: u64, len: u64, memory: &M) -> ArgValue
    where
        M: MemoryAccess + ?Sized,
    {
        let addr = match Addr::from_raw(word as usize) {
            Some(addr) => addr,
            None => return null(),
        };

        let want = usize::try_from(len).unwrap_or(usize::MAX);

        match memory.read_bytes(addr, want, self.limits.max_buffer) {
            Ok(Bounded { bytes, truncated }) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                ArgValue::new(
                    Value::Buffer {
                        bytes,
                        len,
                        truncated,
                    },
                    text,
                )
            }
            Err(errno) => unreadable(word, errno),
        }
    }
}

fn null() -> ArgValue {
    ArgValue::new(Value::Null, "NULL")
}

fn unreadable(word: u64, errno: syscalls::Errno) -> ArgValue {
    ArgValue::new(
        Value::Unreadable { addr: word, errno },
        format!("{:#x}", word),
    )
}

fn octal(word: u64) -> String {
    if word == 0 {
        "0".to_string()
    } else {
        format!("0{:o}", word)
    }
}
