// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The only code that decides *what* to move, rename, or remove. Each
//! pipeline consumes a slice of [`FileRecord`]s and a [`RunContext`] and
//! produces a [`PipelineResult`].

pub mod deduplicate;
pub mod flatten;
pub mod organize;
pub mod rename;

use crate::discovery::FileRecord;
use crate::operation::{ErrorReason, Operation};

/// Splits `records` into those that pass `validate_for_read` and the
/// `errored` operations produced for those that don't, via a caller-supplied
/// factory (spec.md §9's "generic read-validation partitioner").
pub fn partition_read_safety<'a>(
    guard: &crate::path_guard::PathGuard,
    records: &'a [FileRecord],
) -> (Vec<&'a FileRecord>, Vec<Operation>) {
    let mut safe = Vec::with_capacity(records.len());
    let mut errored = Vec::new();

    for record in records {
        match guard.validate_for_read(&record.path) {
            Ok(()) => safe.push(record),
            Err(err) => {
                let reason = match err {
                    crate::error::Error::SymlinkEscape(_) | crate::error::Error::PathEscape(_) => {
                        ErrorReason::SourcePathEscapesRoot
                    }
                    _ => ErrorReason::Other,
                };
                errored.push(Operation::errored_from(record.path.clone(), reason, &err));
            }
        }
    }

    (safe, errored)
}

/// Progress callback: `(processed, total)`, monotonically increasing.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + 'a;

pub fn report(progress: Option<&ProgressFn<'_>>, processed: u64, total: u64) {
    if let Some(cb) = progress {
        cb(processed, total);
    }
}

/// Inserts `_N` before the extension of `name` (or appends it if there is
/// no extension).
pub fn suffix_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(0) | None => format!("{name}_{n}"),
        Some(idx) => {
            let (stem, ext) = name.split_at(idx);
            format!("{stem}_{n}{ext}")
        }
    }
}

/// Target name is `name` unless taken (on disk, or already produced by this
/// run within `dir`), in which case `base_N.ext` is tried with `N`
/// increasing from 1 until a free name is found. `next_suffix` is the
/// per-`dir` conflict counter, keyed by original name.
pub fn plan_target_name(
    dir: &std::path::Path,
    name: &str,
    next_suffix: &mut std::collections::HashMap<String, u32>,
) -> std::path::PathBuf {
    if !next_suffix.contains_key(name) {
        let candidate = dir.join(name);
        next_suffix.insert(name.to_string(), 1);
        if std::fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
    }

    loop {
        let n = *next_suffix.get(name).unwrap();
        let candidate_name = suffix_name(name, n);
        let candidate = dir.join(&candidate_name);
        next_suffix.insert(name.to_string(), n + 1);
        if std::fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
    }
}
