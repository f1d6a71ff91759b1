// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Boundary cases from spec.md §8 that don't belong to any single
//! pipeline's unit test module because they exercise cross-cutting
//! behavior: the lock, root resolution, and full-pipeline idempotency.

use std::fs;

use btidy::run_context::Command;
use btidy::{discovery, Error, RunContext};
use tempfile::TempDir;

#[test]
fn empty_root_produces_no_operations() {
    let dir = TempDir::new().unwrap();
    let ctx = RunContext::new(dir.path(), Command::Flatten, false, true).unwrap();
    let records = discovery::discover(ctx.guard.root());
    assert!(records.is_empty());
    let result = btidy::pipelines::flatten::run(&ctx, &records, None);
    assert_eq!(result.summary.total, 0);
}

#[test]
fn second_concurrent_run_fails_with_lock_held() {
    let dir = TempDir::new().unwrap();
    let _first = RunContext::new(dir.path(), Command::Flatten, false, true).unwrap();
    let second = RunContext::new(dir.path(), Command::Flatten, false, true);
    assert!(matches!(second, Err(Error::LockHeld(_))));
}

#[cfg(unix)]
#[test]
fn root_as_a_symlink_resolves_to_its_target() {
    let real = TempDir::new().unwrap();
    fs::write(real.path().join("a.txt"), b"x").unwrap();

    let parent = TempDir::new().unwrap();
    let link = parent.path().join("root_link");
    std::os::unix::fs::symlink(real.path(), &link).unwrap();

    let ctx = RunContext::new(&link, Command::Organize, false, true).unwrap();
    assert_eq!(ctx.guard.root(), fs::canonicalize(real.path()).unwrap());

    let records = discovery::discover(ctx.guard.root());
    let result = btidy::pipelines::organize::run(&ctx, &records, None);
    assert_eq!(result.summary.moved, 1);
    assert!(real.path().join("txt/a.txt").is_file());
}

#[cfg(unix)]
#[test]
fn relative_target_symlink_inside_root_is_left_alone() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("target.txt"), b"x").unwrap();
    std::os::unix::fs::symlink("target.txt", dir.path().join("link.txt")).unwrap();

    let ctx = RunContext::new(dir.path(), Command::Deduplicate, false, true).unwrap();
    let records = discovery::discover(ctx.guard.root());
    let result = btidy::pipelines::deduplicate::run(&ctx, &records, None);

    // a symlink and its target never hash-collide merely by name; nothing
    // here is byte-identical, so no deletions happen.
    assert_eq!(result.summary.deleted, 0);
    assert!(dir.path().join("link.txt").exists());
    assert!(dir.path().join("target.txt").exists());
}

#[test]
fn flatten_then_organize_then_deduplicate_is_stable_on_second_pass() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/report.pdf"), b"content").unwrap();
    fs::write(dir.path().join("notes.txt"), b"other").unwrap();

    {
        let ctx = RunContext::new(dir.path(), Command::Flatten, false, true).unwrap();
        let records = discovery::discover(ctx.guard.root());
        btidy::pipelines::flatten::run(&ctx, &records, None);
    }
    {
        let ctx = RunContext::new(dir.path(), Command::Organize, false, true).unwrap();
        let records = discovery::discover(ctx.guard.root());
        btidy::pipelines::organize::run(&ctx, &records, None);
    }

    let ctx = RunContext::new(dir.path(), Command::Organize, false, true).unwrap();
    let records = discovery::discover(ctx.guard.root());
    let result = btidy::pipelines::organize::run(&ctx, &records, None);
    assert_eq!(result.summary.moved, 0);
    assert_eq!(result.summary.skipped, 2);
}
