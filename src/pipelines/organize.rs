// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Moves each file under `<root>/<ext>/`, `<ext>` being the lowercase
//! extension without the dot, or `other` for extensionless names.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::warn;

use crate::discovery::FileRecord;
use crate::operation::{ErrorReason, Operation, PipelineResult, SkipReason};
use crate::pipelines::{partition_read_safety, plan_target_name, report, ProgressFn};
use crate::run_context::RunContext;
use crate::sanitize::ext_category;

pub fn run(
    ctx: &RunContext,
    records: &[FileRecord],
    progress: Option<&ProgressFn<'_>>,
) -> PipelineResult {
    let mut result = PipelineResult::default();

    let (safe, invalid) = partition_read_safety(&ctx.guard, records);
    if !invalid.is_empty() {
        for op in invalid {
            result.push(op);
        }
        return result;
    }

    let root = ctx.guard.root().to_path_buf();
    let mut per_dir_suffix: HashMap<PathBuf, HashMap<String, u32>> = HashMap::new();
    let mut mkdir_cache: HashSet<PathBuf> = HashSet::new();

    let total = safe.len() as u64;
    for (processed, record) in safe.iter().enumerate() {
        report(progress, processed as u64 + 1, total);

        let ext_dir = root.join(ext_category(&record.name));

        if record.dir == ext_dir {
            result.push(Operation::skipped(
                record.path.clone(),
                SkipReason::AlreadyOrganized,
                record.size,
            ));
            continue;
        }

        let suffix_map = per_dir_suffix.entry(ext_dir.clone()).or_default();
        let target = plan_target_name(&ext_dir, &record.name, suffix_map);

        if let Err(err) = ctx.guard.validate_path(&target) {
            result.push(Operation::errored_from(
                record.path.clone(),
                ErrorReason::DestinationPathEscapesRoot,
                &err,
            ));
            continue;
        }

        if !mkdir_cache.contains(&ext_dir) {
            let dir_existed = ext_dir.is_dir();
            if let Err(err) = ctx.mkdir_all(&ext_dir) {
                result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
                continue;
            }
            mkdir_cache.insert(ext_dir.clone());
            if !dir_existed {
                result.summary.created_dirs += 1;
            }
        }

        match ctx.rename(&record.path, &target) {
            Ok(()) => result.push(Operation::moved(record.path.clone(), target, record.size)),
            Err(err) => {
                warn!(path = %record.path.display(), error = %err, "organize: rename failed");
                result.push(Operation::errored_from(record.path.clone(), ErrorReason::Other, &err));
            }
        }
    }

    result
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
        RunContext::new(dir.path(), Command::Organize, false, true).unwrap()
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("photo.jpg"), b"a").unwrap();

        let ctx = RunContext::new(dir.path(), Command::Organize, true, true).unwrap();
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 1);
        assert_eq!(result.summary.created_dirs, 1);
        assert!(dir.path().join("photo.jpg").is_file());
        assert!(!dir.path().join("jpg").exists());
    }

    #[test]
    fn groups_by_lowercased_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("photo.JPG"), b"a").unwrap();
        fs::write(dir.path().join("image.Jpg"), b"b").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 2);
        assert_eq!(result.summary.created_dirs, 1);
        assert!(dir.path().join("jpg/photo.JPG").is_file());
        assert!(dir.path().join("jpg/image.Jpg").is_file());
    }

    #[test]
    fn dotfiles_go_to_other() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), b"x").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 1);
        assert!(dir.path().join("other/.gitignore").is_file());
    }

    #[test]
    fn already_organized_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("txt")).unwrap();
        fs::write(dir.path().join("txt/a.txt"), b"x").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.skipped, 1);
        assert_eq!(result.summary.moved, 0);
    }

    #[test]
    fn conflicting_names_get_numbered_suffix() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/file.txt"), b"aaa").unwrap();
        fs::write(dir.path().join("b/file.txt"), b"bbb").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        let result = run(&ctx, &records, None);

        assert_eq!(result.summary.moved, 2);
        assert!(dir.path().join("txt/file.txt").is_file());
        assert!(dir.path().join("txt/file_1.txt").is_file());
    }

    #[test]
    fn double_extension_archive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("archive.tar.gz"), b"x").unwrap();

        let ctx = ctx(&dir);
        let records = discover(dir.path());
        run(&ctx, &records, None);

        assert!(dir.path().join("gz/archive.tar.gz").is_file());
    }

    #[test]
    fn running_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();

        {
            let ctx = ctx(&dir);
            let records = discover(dir.path());
            run(&ctx, &records, None);
        }

        let ctx2 = ctx(&dir);
        let records2 = discover(dir.path());
        let result2 = run(&ctx2, &records2, None);
        assert_eq!(result2.summary.moved, 0);
        assert_eq!(result2.summary.skipped, 1);
    }
}
