/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// Builds the list of arguments of one signature.
///
/// Arguments are written `name: Type`. Arguments the call writes to (output
/// buffers) are prefixed with `out`; they are decoded again when the call
/// returns.
macro_rules! args {
    (@acc [$($out:expr),*]) => {
        vec![$($out),*]
    };
    (@acc [$($out:expr),*] out $name:ident: $ty:expr $(, $($rest:tt)*)?) => {
        args!(@acc [$($out,)* ::libtrace::Arg::output(stringify!($name), $ty)] $($($rest)*)?)
    };
    (@acc [$($out:expr),*] $name:ident: $ty:expr $(, $($rest:tt)*)?) => {
        args!(@acc [$($out,)* ::libtrace::Arg::input(stringify!($name), $ty)] $($($rest)*)?)
    };
    ($($tokens:tt)*) => {
        args!(@acc [] $($tokens)*)
    };
}

/// Declares the curated signatures, keyed by syscall name. Which of them exist
/// is decided at runtime by the syscall numbers of the host architecture.
macro_rules! signatures {
    ($($name:ident($($args:tt)*);)*) => {
        /// Argument descriptors of every curated syscall, by name.
        pub(crate) fn curated() -> Vec<(&'static str, Vec<::libtrace::Arg>)> {
            vec![$((stringify!($name), args!($($args)*)),)*]
        }
    };
}
