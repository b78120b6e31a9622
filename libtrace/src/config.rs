/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use serde::Deserialize;
use serde::Serialize;

use crate::decode::Limits;

/// The default for both the string and the buffer size limit.
pub const DEFAULT_MAX_SIZE: usize = 32;

/// What to do when a stream subscriber's queue is full.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPolicy {
    /// Wait for the subscriber to make room. The traced threads stay stopped
    /// in the meantime, so no event is lost.
    #[default]
    Block,

    /// Drop the event for that subscriber and count it.
    Drop,
}

/// Settings of a [`Tracer`](crate::Tracer). Fixed once tracing starts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Maximum number of bytes decoded from a string argument.
    pub max_string_size: usize,

    /// Maximum number of bytes decoded from a buffer argument.
    pub max_buffer_size: usize,

    /// Behavior of stream subscribers with a full queue.
    pub stream_policy: StreamPolicy,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            max_string_size: DEFAULT_MAX_SIZE,
            max_buffer_size: DEFAULT_MAX_SIZE,
            stream_policy: StreamPolicy::default(),
        }
    }
}

impl TracerConfig {
    /// The decoding limits of this configuration.
    pub fn limits(&self) -> Limits {
        Limits {
            max_string: self.max_string_size,
            max_buffer: self.max_buffer_size,
        }
    }
}
