// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Moves every file to root with deterministic conflict and duplicate
//! handling, then removes emptied subdirectories.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::discovery::FileRecord;
use crate::hash;
use crate::operation::{ErrorReason, Operation, PipelineResult, SkipReason};
use crate::pipelines::{partition_read_safety, plan_target_name, report, ProgressFn};
use crate::run_context::RunContext;

pub fn run(
    ctx: &RunContext,
    records: &[FileRecord],
    progress: Option<&ProgressFn<'_>>,
) -> PipelineResult {
    let mut result = PipelineResult::default();

    // Step 1: fail-closed read-safety pre-scan.
    let (safe, invalid) = partition_read_safety(&ctx.guard, records);
    if !invalid.is_empty() {
        for op in invalid {
            result.push(op);
        }
        return result;
    }

    // Step 2: pre-hash. Per-file failures from here are isolated.
    let mut hashed: Vec<(&FileRecord, String)> = Vec::with_capacity(safe.len());
    let mut retained: HashSet<PathBuf> = HashSet::new();
    for record in &safe {
        match hash::full_hash(&record.path) {
            Ok(digest) => hashed.push((record, digest)),
            Err(err) => {
                retained.insert(record.path.clone());
                result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
            }
        }
    }

    // Step 3: plan and execute in input order.
    let root = ctx.guard.root().to_path_buf();
    let mut kept_by_hash: HashMap<String, PathBuf> = HashMap::new();
    let mut next_suffix: HashMap<String, u32> = HashMap::new();
    let mut populated_dirs: HashSet<PathBuf> = HashSet::new();

    let total = hashed.len() as u64;
    for (processed, (record, digest)) in hashed.iter().enumerate() {
        report(progress, processed as u64 + 1, total);

        if record.dir == root {
            result.push(Operation::skipped(
                record.path.clone(),
                SkipReason::AlreadyInRoot,
                record.size,
            ));
            continue;
        }
        for ancestor in ancestors_under_root(&record.dir, &root) {
            populated_dirs.insert(ancestor);
        }

        if let Some(kept_path) = kept_by_hash.get(digest).cloned() {
            handle_duplicate(ctx, &mut result, &mut retained, record, &kept_path);
            continue;
        }

        let target = plan_target_name(&root, &record.name, &mut next_suffix);
        match ctx.rename(&record.path, &target) {
            Ok(()) => {
                // In a real run the content now lives at `target`; in a dry
                // run it never moved, so later duplicates must still verify
                // against `record.path`.
                let effective_keeper = if ctx.dry_run { record.path.clone() } else { target.clone() };
                kept_by_hash.insert(digest.clone(), effective_keeper);
                result.push(Operation::moved(record.path.clone(), target, record.size));
            }
            Err(err) => {
                warn!(path = %record.path.display(), error = %err, "flatten: rename failed");
                retained.insert(record.path.clone());
                result.push(Operation::errored_from(
                    record.path.clone(),
                    ErrorReason::Other,
                    &err,
                ));
            }
        }
    }

    // Step 4: bottom-up directory cleanup.
    cleanup_dirs(ctx, &mut result, populated_dirs.into_iter().collect(), &retained);

    result
}

fn handle_duplicate(
    ctx: &RunContext,
    result: &mut PipelineResult,
    retained: &mut HashSet<PathBuf>,
    record: &FileRecord,
    kept_path: &Path,
) {
    if fs::symlink_metadata(kept_path).is_err() {
        retained.insert(record.path.clone());
        result.push(Operation::errored(
            record.path.clone(),
            ErrorReason::KeptFileMissing,
            "kept file missing",
        ));
        return;
    }
    let current_hash = match hash::full_hash(&record.path) {
        Ok(d) => d,
        Err(err) => {
            retained.insert(record.path.clone());
            result.push(Operation::errored_from(
                record.path.clone(),
                ErrorReason::Other,
                &err,
            ));
            return;
        }
    };
    let kept_hash = match hash::full_hash(kept_path) {
        Ok(d) => d,
        Err(_) => {
            retained.insert(record.path.clone());
            result.push(Operation::errored(
                record.path.clone(),
                ErrorReason::KeptFileMissing,
                "kept file missing",
            ));
            return;
        }
    };
    if current_hash != kept_hash {
        retained.insert(record.path.clone());
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
        Err(err) => {
            retained.insert(record.path.clone());
            result.push(Operation::errored_from(
                record.path.clone(),
                ErrorReason::Other,
                &err,
            ));
        }
    }
}

/// All directories strictly between `dir` (inclusive) and `root` (exclusive).
fn ancestors_under_root(dir: &Path, root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut current = Some(dir.to_path_buf());
    while let Some(d) = current {
        if d == root {
            break;
        }
        out.push(d.clone());
        current = d.parent().map(Path::to_path_buf);
    }
    out
}

/// Removes directories bottom-up. In a real run, emptiness is read straight
/// off the filesystem, since deeper directories are always processed (and
/// physically removed) first. In dry-run, nothing was actually moved or
/// deleted, so emptiness is simulated instead: a directory would end up
/// empty if every file it originally held was moved/deleted (not in
/// `retained`) and every subdirectory it holds would itself end up removed.
fn cleanup_dirs(
    ctx: &RunContext,
    result: &mut PipelineResult,
    mut dirs: Vec<PathBuf>,
    retained: &HashSet<PathBuf>,
) {
    dirs.sort();
    dirs.dedup();
    // deepest first so cascading empties bubble up correctly.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut simulated_removed: HashSet<PathBuf> = HashSet::new();

    for dir in dirs {
        if dir == ctx.guard.root() {
            continue;
        }
        if ctx.dry_run {
            if would_become_empty(&dir, retained, &simulated_removed) {
                simulated_removed.insert(dir);
                result.summary.deleted_dirs += 1;
            }
            continue;
        }
        if is_empty_dir(&dir) && ctx.guard.safe_remove_dir(&dir).is_ok() {
            result.summary.deleted_dirs += 1;
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn would_become_empty(dir: &Path, retained: &HashSet<PathBuf>, simulated_removed: &HashSet<PathBuf>) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).all(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    simulated_removed.contains(&path)
                } else {
                    !retained.contains(&path)
                }
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::run_context::Command;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> RunContext {
        RunContext::new(dir.path(), Command::Flatten, false, true).unwrap()
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("d1")).unwrap();
        fs::create_dir_all(dir.path().join("d2")).unwrap();
        fs::write(dir.path().join("d1/file.txt"), b"x").unwrap();
        fs::write(dir.path().join("d2/file.txt"), b"x").unwrap();

        let ctx = RunContext::new(dir.path(), Command::Flatten, true, true).unwrap();
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 1);
        assert_eq!(result.summary.deleted, 1);
        assert_eq!(result.summary.deleted_dirs, 2);
        assert!(dir.path().join("d1/file.txt").is_file());
        assert!(dir.path().join("d2/file.txt").is_file());
        assert!(!dir.path().join("file.txt").exists());
    }

    #[test]
    fn moves_nested_files_to_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/file.txt"), b"hello").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 1);
        assert!(dir.path().join("file.txt").is_file());
        assert!(!dir.path().join("a").exists());
        assert_eq!(result.summary.deleted_dirs, 1);
    }

    #[test]
    fn keeps_duplicates_safe() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("d1")).unwrap();
        fs::create_dir_all(dir.path().join("d2")).unwrap();
        fs::write(dir.path().join("d1/file.txt"), b"x").unwrap();
        fs::write(dir.path().join("d2/file.txt"), b"x").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 1);
        assert_eq!(result.summary.deleted, 1);
        assert_eq!(result.summary.deleted_dirs, 2);
        assert!(dir.path().join("file.txt").is_file());
        assert!(result.new_paths_are_unique());
    }

    #[test]
    fn conflicting_names_get_suffixed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("d1")).unwrap();
        fs::create_dir_all(dir.path().join("d2")).unwrap();
        fs::write(dir.path().join("d1/file.txt"), b"aaa").unwrap();
        fs::write(dir.path().join("d2/file.txt"), b"bbb").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 2);
        assert!(dir.path().join("file.txt").is_file());
        assert!(dir.path().join("file_1.txt").is_file());
        assert!(result.new_paths_are_unique());
    }

    #[test]
    fn symlink_escape_aborts_before_any_mutation() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(dir.path().join("safe.txt"), b"safe").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("escape_link.txt"),
        )
        .unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        #[cfg(unix)]
        {
            assert_eq!(result.summary.moved, 0);
            assert_eq!(result.summary.errored, 1);
            assert!(dir.path().join("safe.txt").is_file());
        }
    }

    #[test]
    fn already_in_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file.txt"), b"x").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.skipped, 1);
        assert_eq!(result.summary.moved, 0);
    }

    #[test]
    fn running_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/file.txt"), b"x").unwrap();

        {
            let ctx = ctx(&dir);
            let records = discover(dir.path());
            run(&ctx, &records, None);
        }

        let ctx2 = ctx(&dir);
        let records2 = discover(dir.path());
        let result2 = run(&ctx2, &records2, None);
        assert_eq!(result2.summary.moved, 0);
        assert_eq!(result2.summary.renamed, 0);
        assert_eq!(result2.summary.deleted, 0);
    }
}
