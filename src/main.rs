// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod cli;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use humansize::{format_size, DECIMAL};
use tracing_subscriber::EnvFilter;

use btidy::operation::{Operation, PipelineResult, SkipReason, Status};
use btidy::pipelines::{deduplicate, flatten, organize, rename};
use btidy::run_context::{Command, RunContext};
use btidy::trash::TrashVault;
use btidy::{discovery, Error};

use cli::{Cli, DeduplicateArgs, PipelineCommand, RunArgs, TrashCommand};

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("btidy: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: PipelineCommand) -> Result<ExitCode, Error> {
    match command {
        PipelineCommand::Flatten(args) => run_pipeline(Command::Flatten, &args, flatten::run),
        PipelineCommand::Rename(args) => run_pipeline(Command::Rename, &args, rename::run),
        PipelineCommand::Organize(args) => run_pipeline(Command::Organize, &args, organize::run),
        PipelineCommand::Deduplicate(args) => run_deduplicate(&args),
        PipelineCommand::Trash { action } => run_trash(action),
    }
}

fn run_pipeline(
    command: Command,
    args: &RunArgs,
    pipeline: fn(&RunContext, &[discovery::FileRecord], Option<&btidy::pipelines::ProgressFn<'_>>) -> PipelineResult,
) -> Result<ExitCode, Error> {
    configure_workers(args.workers);

    let ctx = RunContext::new(&args.root, command, args.dry_run, !args.no_trash)?;
    let records = discovery::discover(ctx.guard.root());
    let total = records.len() as u64;

    let progress = |processed: u64, total: u64| {
        eprint!("\r{command}: {processed}/{total}");
    };
    let progress_fn: &btidy::pipelines::ProgressFn<'_> = &progress;
    let result = pipeline(&ctx, &records, if total > 0 { Some(progress_fn) } else { None });
    if total > 0 {
        eprintln!();
    }

    print_report(command, &ctx, &result);
    Ok(exit_code(&result))
}

fn run_deduplicate(args: &DeduplicateArgs) -> Result<ExitCode, Error> {
    configure_workers(args.run.workers);

    let ctx = RunContext::new(&args.run.root, Command::Deduplicate, args.run.dry_run, !args.run.no_trash)?;
    let records = discovery::discover(ctx.guard.root());
    let total = records.len() as u64;

    let progress = |processed: u64, total: u64| {
        eprint!("\rdeduplicate: {processed}/{total}");
    };
    let progress_fn: &btidy::pipelines::ProgressFn<'_> = &progress;
    let threshold = args
        .partial_hash_threshold
        .unwrap_or(deduplicate::DEFAULT_PARTIAL_HASH_THRESHOLD);
    let result = deduplicate::run_with_threshold(&ctx, &records, if total > 0 { Some(progress_fn) } else { None }, threshold);
    if total > 0 {
        eprintln!();
    }

    print_report(Command::Deduplicate, &ctx, &result);
    Ok(exit_code(&result))
}

fn run_trash(action: TrashCommand) -> Result<ExitCode, Error> {
    match action {
        TrashCommand::List { root } => {
            let ctx = RunContext::new(&root, Command::Flatten, true, true)?;
            let Some(vault) = ctx.trash() else {
                println!("trash disabled for this root");
                return Ok(ExitCode::SUCCESS);
            };
            list_trash(vault);
        }
        TrashCommand::Restore { root, run_id } => {
            let ctx = RunContext::new(&root, Command::Flatten, true, true)?;
            let Some(vault) = ctx.trash() else {
                println!("trash disabled for this root");
                return Ok(ExitCode::SUCCESS);
            };
            let vault = run_scoped_vault(vault, &root, run_id.as_deref())?;
            let restored = vault.restore_all()?;
            println!("restored {} entries", restored.len());
        }
        TrashCommand::Purge { root, run_id } => {
            let ctx = RunContext::new(&root, Command::Flatten, true, true)?;
            let Some(vault) = ctx.trash() else {
                println!("trash disabled for this root");
                return Ok(ExitCode::SUCCESS);
            };
            let vault = run_scoped_vault(vault, &root, run_id.as_deref())?;
            vault.purge()?;
            println!("purged {}", vault.trash_root().display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// A `--run-id` narrows the vault to a single run's subtree; without one the
/// whole `.btidy/trash` tree (every run) is the scope.
fn run_scoped_vault(vault: &TrashVault, root: &Path, run_id: Option<&str>) -> Result<TrashVault, Error> {
    match run_id {
        Some(id) => {
            let guard = btidy::path_guard::PathGuard::new(root)?;
            Ok(TrashVault::new(guard, id))
        }
        None => Ok(vault.clone()),
    }
}

fn list_trash(vault: &TrashVault) {
    if !vault.trash_root().exists() {
        println!("trash is empty");
        return;
    }
    for entry in walkdir::WalkDir::new(vault.trash_root())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        println!("{}", entry.path().display());
    }
}

fn configure_workers(workers: Option<usize>) {
    if let Some(n) = workers {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    }
}

fn exit_code(result: &PipelineResult) -> ExitCode {
    if result.summary.errored > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(command: Command, ctx: &RunContext, result: &PipelineResult) {
    let mode = if ctx.dry_run { "dry-run" } else { "applied" };
    println!("{command} ({mode}) — run {}", ctx.run_id);

    for op in &result.operations {
        if let Some(line) = describe(op) {
            println!("  {line}");
        }
    }

    let s = &result.summary;
    println!(
        "{} files: {} moved, {} renamed, {} deleted, {} skipped, {} errored",
        s.total, s.moved, s.renamed, s.deleted, s.skipped, s.errored
    );
    if s.created_dirs > 0 || s.deleted_dirs > 0 {
        println!("{} directories created, {} removed", s.created_dirs, s.deleted_dirs);
    }
    if s.bytes_recovered > 0 {
        println!("{} recovered", format_size(s.bytes_recovered, DECIMAL));
    }
}

fn describe(op: &Operation) -> Option<String> {
    let path = op.original_path.display();
    match &op.status {
        Status::Moved => Some(format!("moved   {path} -> {}", op.new_path.as_ref()?.display())),
        Status::Renamed => Some(format!("renamed {path} -> {}", op.new_path.as_ref()?.display())),
        Status::Deleted => match &op.trashed_to {
            Some(to) => Some(format!("deleted {path} (trashed to {})", to.display())),
            None => Some(format!("deleted {path}")),
        },
        Status::Skipped(reason) => Some(format!("skipped {path} ({})", skip_reason_text(*reason))),
        Status::Errored(reason) => Some(format!(
            "error   {path} ({}){}",
            reason.as_str(),
            op.error.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
        )),
    }
}

fn skip_reason_text(reason: SkipReason) -> &'static str {
    reason.as_str()
}
