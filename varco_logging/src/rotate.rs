// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Size-triggered rotation of a [`LogStream`](crate::LogStream) file sink.
//!
//! A timer task periodically compares the sink file's size against the
//! threshold. On breach it asks the drainer to close the file, rename it to
//! `<stem>.<yyyyMMddHHmmss>.log` and reopen a fresh file under the original
//! name. Enqueueing lines never blocks during rotation; only the drainer
//! waits for the rename-and-reopen window.

use tokio::io::AsyncWriteExt;

use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::{Duration, SystemTime};

use crate::{clock, record_sink_error, shared_access, Shared};

#[derive(Copy, Clone, Debug)]
pub struct RotationPolicy {
    /// Rotate once the sink file reaches this many bytes.
    pub max_size_bytes: u64,

    /// How often the file size is sampled.
    pub check_interval: Duration,
}

pub(crate) fn spawn_rotation_timer(shared: Weak<Shared>, policy: RotationPolicy) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(policy.check_interval).await;

            let Some(shared) = shared.upgrade() else {
                break;
            };
            let Some(path) = shared_access::current_file_path(&shared) else {
                continue;
            };

            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.len() >= policy.max_size_bytes => {
                    shared_access::request_rotation(&shared);
                }
                _ => {}
            }
        }
    });
}

pub(crate) async fn rotate_file_sink(shared: &Shared, sink: &mut Option<(PathBuf, tokio::fs::File)>) {
    let Some((path, mut file)) = sink.take() else {
        return;
    };

    if let Err(error) = file.flush().await {
        record_sink_error(shared, format!("flush before rotation of {} failed: {error}", path.display()));
    }
    drop(file);

    let target = rotated_path(&path, SystemTime::now());
    if let Err(error) = tokio::fs::rename(&path, &target).await {
        record_sink_error(shared, format!("rotation rename of {} failed: {error}", path.display()));
    }

    match tokio::fs::OpenOptions::new().append(true).create(true).open(&path).await {
        Ok(file) => *sink = Some((path, file)),
        Err(error) => {
            record_sink_error(shared, format!("reopen of {} after rotation failed: {error}", path.display()));
        }
    }
}

/// The archive name for a rotation happening at `when`. Collisions within
/// the same second get a monotonic `-N` suffix.
fn rotated_path(path: &Path, when: SystemTime) -> PathBuf {
    let stem = path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let timestamp = clock::compact_timestamp(when);

    let mut candidate = directory.join(format!("{stem}.{timestamp}.log"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = directory.join(format!("{stem}.{timestamp}-{counter}.log"));
        counter += 1;
    }
    candidate
}
