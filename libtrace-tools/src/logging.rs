/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

fn set_subscriber_with_writer<T>(writer: T) -> anyhow::Result<()>
where
    T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Installs the global subscriber, filtered by `RUST_LOG`. Logs go to
/// `log_file` if one is given, or stderr otherwise. An existing file is never
/// overwritten: a timestamp is appended to the name instead.
///
/// The returned guard flushes the file when dropped.
pub fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let Some((parent, orig_filename)) =
        log_file.and_then(|lf| Some((lf.parent()?, lf.file_name()?.to_os_string())))
    else {
        set_subscriber_with_writer(io::stderr)?;
        return Ok(None);
    };

    let mut filename = orig_filename.clone();
    for _ in 0..100 {
        if parent.join(&filename).exists() {
            filename = orig_filename.clone();
            filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
        } else {
            break;
        }
    }

    if parent.join(&filename).exists() {
        eprintln!(" [sctrace] WARNING: could not open log file, falling back to stderr");
        set_subscriber_with_writer(io::stderr)?;
        return Ok(None);
    }

    let file_writer = tracing_appender::rolling::never(parent, &filename);
    let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

    eprintln!(" [sctrace] Logging to file at {:?}", parent.join(&filename));
    set_subscriber_with_writer(file_writer)?;

    Ok(Some(guard))
}
