// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renames each file in place to `YYYY-MM-DD_<sanitized-base>.<ext>`,
//! skipping files already carrying the `TBD` sentinel prefix and folding
//! in-batch or on-disk name collisions into duplicate/conflict handling.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::discovery::FileRecord;
use crate::hash;
use crate::operation::{ErrorReason, Operation, PipelineResult, SkipReason};
use crate::pipelines::{report, ProgressFn};
use crate::run_context::RunContext;
use crate::sanitize::timestamp_prefix;

fn tbd_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-TBD-TBD_").unwrap())
}

/// The in-batch bookkeeping the algorithm keys by `(dir, target_name)`:
/// `count` drives conflict suffixing, `size`/`hash` are recorded once at
/// first sight (spec's open question: not re-hashed at decision time), and
/// `keeper_path` tracks wherever that content currently/eventually lives so
/// later duplicates in the batch re-stat the right file even in dry-run.
struct Entry {
    count: u32,
    size: u64,
    hash: String,
    keeper_path: PathBuf,
}

pub fn run(
    ctx: &RunContext,
    records: &[FileRecord],
    progress: Option<&ProgressFn<'_>>,
) -> PipelineResult {
    let mut result = PipelineResult::default();
    let mut by_target: HashMap<(PathBuf, String), Entry> = HashMap::new();

    let total = records.len() as u64;
    for (processed, record) in records.iter().enumerate() {
        report(progress, processed as u64 + 1, total);

        if tbd_prefix_re().is_match(&record.name) {
            result.push(Operation::skipped(
                record.path.clone(),
                SkipReason::AlreadyHasTbdPrefix,
                record.size,
            ));
            continue;
        }

        if let Err(err) = ctx.guard.validate_for_read(&record.path) {
            result.push(Operation::errored_from(record.path.clone(), ErrorReason::SourcePathEscapesRoot, &err));
            continue;
        }

        let target_name = timestamp_prefix(&record.name, record.mtime);
        if target_name == record.name {
            result.push(Operation::skipped(
                record.path.clone(),
                SkipReason::NameUnchanged,
                record.size,
            ));
            continue;
        }

        let record_hash = match hash::full_hash(&record.path) {
            Ok(h) => h,
            Err(err) => {
                result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
                continue;
            }
        };

        let key = (record.dir.clone(), target_name.clone());
        let is_duplicate = by_target
            .get(&key)
            .map(|e| e.size == record.size && e.hash == record_hash)
            .unwrap_or(false);

        if is_duplicate {
            let keeper_path = by_target.get(&key).unwrap().keeper_path.clone();
            delete_as_duplicate(ctx, &mut result, record, &keeper_path);
            continue;
        }

        let dst = match by_target.get_mut(&key) {
            None => {
                by_target.insert(
                    key.clone(),
                    Entry {
                        count: 1,
                        size: record.size,
                        hash: record_hash.clone(),
                        keeper_path: record.dir.join(&target_name),
                    },
                );
                record.dir.join(&target_name)
            }
            Some(entry) => {
                let suffix = entry.count;
                entry.count += 1;
                record.dir.join(crate::pipelines::suffix_name(&target_name, suffix))
            }
        };

        if let Err(err) = ctx.guard.validate_path(&dst) {
            result.push(Operation::errored_from(record.path.clone(), ErrorReason::DestinationPathEscapesRoot, &err));
            continue;
        }

        if let Ok(dst_meta) = fs::metadata(&dst) {
            match hash::full_hash(&dst) {
                Ok(dst_hash) if dst_meta.len() == record.size && dst_hash == record_hash => {
                    delete_as_duplicate(ctx, &mut result, record, &dst);
                }
                Ok(_) => {
                    result.push(Operation::skipped(
                        record.path.clone(),
                        SkipReason::TargetFileAlreadyExists,
                        record.size,
                    ));
                }
                Err(err) => {
                    result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
                }
            }
            continue;
        }

        match ctx.rename(&record.path, &dst) {
            Ok(()) => {
                if let Some(entry) = by_target.get_mut(&key) {
                    entry.keeper_path = if ctx.dry_run { record.path.clone() } else { dst.clone() };
                }
                result.push(Operation::renamed(record.path.clone(), dst, record.size));
            }
            Err(err) => {
                warn!(path = %record.path.display(), error = %err, "rename: rename failed");
                result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
            }
        }
    }

    result
}

/// Re-checks both sides immediately before deleting a duplicate: the
/// keeper must still exist (`lstat`), and the candidate's content must
/// still match the recorded hash. Refuses and preserves the file on any
/// mismatch.
fn delete_as_duplicate(
    ctx: &RunContext,
    result: &mut PipelineResult,
    record: &FileRecord,
    keeper_path: &std::path::Path,
) {
    if fs::symlink_metadata(keeper_path).is_err() {
        result.push(Operation::errored(
            record.path.clone(),
            ErrorReason::KeptFileMissing,
            "kept file missing",
        ));
        return;
    }
    let current_hash = match hash::full_hash(&record.path) {
        Ok(h) => h,
        Err(err) => {
            result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
            return;
        }
    };
    let keeper_hash = match hash::full_hash(keeper_path) {
        Ok(h) => h,
        Err(_) => {
            result.push(Operation::errored(
                record.path.clone(),
                ErrorReason::KeptFileMissing,
                "kept file missing",
            ));
            return;
        }
    };
    if current_hash != keeper_hash {
        result.push(Operation::errored(
            record.path.clone(),
            ErrorReason::ContentChanged,
            "content changed",
        ));
        return;
    }

    if ctx.dry_run {
        result.push(Operation::deleted(record.path.clone(), None, record.size));
        return;
    }

    match ctx.remove(&record.path) {
        Ok(trashed_to) => result.push(Operation::deleted(record.path.clone(), trashed_to, record.size)),
        Err(err) => result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err)),
    }
}
