// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Removes every file whose content matches another file in the input,
//! keeping exactly one (the lexicographically smallest path) per content
//! group. Size, then partial hash, then full hash progressively narrow
//! each group before any file is touched.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::discovery::FileRecord;
use crate::error::Result;
use crate::hash;
use crate::operation::{ErrorReason, Operation, PipelineResult};
use crate::pipelines::{partition_read_safety, report, ProgressFn};
use crate::run_context::RunContext;

/// Files larger than this are pre-filtered by a head/tail partial hash
/// before paying for a full read. Matches the hasher's own default window
/// scale-up: cheap for typical documents, worthwhile once files are large
/// enough that a full read is expensive.
pub const DEFAULT_PARTIAL_HASH_THRESHOLD: u64 = 10 * 1024 * 1024;

pub fn run(ctx: &RunContext, records: &[FileRecord], progress: Option<&ProgressFn<'_>>) -> PipelineResult {
    run_with_threshold(ctx, records, progress, DEFAULT_PARTIAL_HASH_THRESHOLD)
}

pub fn run_with_threshold(
    ctx: &RunContext,
    records: &[FileRecord],
    progress: Option<&ProgressFn<'_>>,
    partial_hash_threshold: u64,
) -> PipelineResult {
    let mut result = PipelineResult::default();

    let (safe, invalid) = partition_read_safety(&ctx.guard, records);
    if !invalid.is_empty() {
        for op in invalid {
            result.push(op);
        }
        return result;
    }

    // indexed so operations can be re-emitted in original input order even
    // though grouping reshuffles everything.
    let indexed: Vec<(usize, &FileRecord)> = safe.into_iter().enumerate().collect();

    let mut by_size: HashMap<u64, Vec<(usize, &FileRecord)>> = HashMap::new();
    for entry in indexed {
        by_size.entry(entry.1.size).or_default().push(entry);
    }

    let total_groups = by_size.values().filter(|g| g.len() > 1).count() as u64;
    let mut processed_groups = 0u64;
    let mut pending: Vec<(usize, Operation)> = Vec::new();

    for (size, group) in by_size {
        if group.len() < 2 {
            continue;
        }
        processed_groups += 1;
        report(progress, processed_groups, total_groups.max(1));

        let full_hash_groups = if size > partial_hash_threshold {
            let (partial_groups, errs) = hash_and_group(&group, |p| hash::partial_hash(p, size));
            pending.extend(errs);
            let mut out = Vec::new();
            for (_, subgroup) in partial_groups {
                if subgroup.len() < 2 {
                    continue;
                }
                let (final_groups, errs) = hash_and_group(&subgroup, |p| hash::full_hash(p));
                pending.extend(errs);
                out.extend(final_groups.into_values());
            }
            out
        } else {
            let (final_groups, errs) = hash_and_group(&group, |p| hash::full_hash(p));
            pending.extend(errs);
            final_groups.into_values().collect()
        };

        for mut members in full_hash_groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| a.1.path.cmp(&b.1.path));
            let keeper = members[0].1;
            for &(idx, candidate) in &members[1..] {
                let op = delete_candidate(ctx, candidate, keeper);
                pending.push((idx, op));
            }
        }
    }

    pending.sort_by_key(|(idx, _)| *idx);
    for (_, op) in pending {
        result.push(op);
    }

    result
}

/// Hashes every member of `group` (in parallel) with `hasher`, then
/// partitions into (group-by-digest map, error operations for unreadable
/// files).
fn hash_and_group<'a>(
    group: &[(usize, &'a FileRecord)],
    hasher: impl Fn(&std::path::Path) -> Result<String> + Sync,
) -> (HashMap<String, Vec<(usize, &'a FileRecord)>>, Vec<(usize, Operation)>) {
    let hashed: Vec<(usize, &FileRecord, Result<String>)> = group
        .par_iter()
        .map(|(idx, record)| (*idx, *record, hasher(&record.path)))
        .collect();

    let mut grouped: HashMap<String, Vec<(usize, &FileRecord)>> = HashMap::new();
    let mut errors = Vec::new();
    for (idx, record, res) in hashed {
        match res {
            Ok(digest) => grouped.entry(digest).or_default().push((idx, record)),
            Err(err) => errors.push((idx, Operation::errored_from(record.path.clone(), ErrorReason::Other, &err))),
        }
    }
    (grouped, errors)
}

fn delete_candidate(ctx: &RunContext, candidate: &FileRecord, keeper: &FileRecord) -> Operation {
    if std::fs::symlink_metadata(&keeper.path).is_err() {
        return Operation::errored(candidate.path.clone(), ErrorReason::KeptFileMissing, "kept file missing");
    }
    let current_hash = match hash::full_hash(&candidate.path) {
        Ok(h) => h,
        Err(err) => return Operation::errored_from(candidate.path.clone(), ErrorReason::Other, &err),
    };
    let keeper_hash = match hash::full_hash(&keeper.path) {
        Ok(h) => h,
        Err(_) => return Operation::errored(candidate.path.clone(), ErrorReason::KeptFileMissing, "kept file missing"),
    };
    if current_hash != keeper_hash {
        return Operation::errored(candidate.path.clone(), ErrorReason::ContentChanged, "content changed");
    }

    if ctx.dry_run {
        return Operation::deleted(candidate.path.clone(), None, candidate.size);
    }

    match ctx.remove(&candidate.path) {
        Ok(trashed_to) => Operation::deleted(candidate.path.clone(), trashed_to, candidate.size),
        Err(err) => Operation::errored_from(candidate.path.clone(), ErrorReason::Other, &err),
    }
}
