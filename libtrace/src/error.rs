/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Error handling.

use thiserror::Error;

use crate::control::ControlError;

pub use syscalls::Errno;

/// An error that ends a trace.
///
/// Errors local to one argument or one subscriber never end a trace: they are
/// recorded in the decoded value, or logged and counted in the
/// [`RunSummary`](crate::RunSummary).
#[derive(Error, Debug)]
pub enum Error {
    /// The process-control backend failed in a way the trace cannot recover
    /// from.
    #[error("process control failed: {0}")]
    Control(#[from] ControlError),
}

impl Error {
    /// Extracts the errno from the error, if there is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Control(ControlError::Permission(errno))
            | Error::Control(ControlError::Transient(errno))
            | Error::Control(ControlError::Errno(errno)) => Some(*errno),
            Error::Control(ControlError::Gone(_)) => Some(Errno::ESRCH),
            Error::Control(ControlError::Io(err)) => err.raw_os_error().map(Errno::new),
        }
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Self::Control(ControlError::Errno(Errno::new(err as i32)))
    }
}
