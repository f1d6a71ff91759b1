// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Command-line argument surface. Four pipelines share [`RunArgs`]; trash
//! maintenance is a separate subcommand tree that never starts a mutating
//! pipeline run.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "btidy",
    version,
    about = "Safely flatten, rename, organize, and deduplicate a directory tree in place"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Move every file up into the root, flattening the directory tree
    Flatten(RunArgs),
    /// Prefix every file name with its last-modified date
    Rename(RunArgs),
    /// Move every file into a directory named after its extension
    Organize(RunArgs),
    /// Remove duplicate file content, keeping one copy per group
    Deduplicate(DeduplicateArgs),
    /// Inspect or restore a previous run's trash without starting a new run
    Trash {
        #[command(subcommand)]
        action: TrashCommand,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory to tidy
    #[arg(value_name = "PATH", default_value = ".")]
    pub root: PathBuf,

    /// Report what would happen without touching the filesystem
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Delete files for real instead of moving them into .btidy/trash
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_trash: bool,

    /// Number of worker threads for content hashing (defaults to available parallelism)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DeduplicateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Files larger than this many bytes are pre-filtered by a partial hash
    /// before a full read
    #[arg(long, value_name = "BYTES")]
    pub partial_hash_threshold: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum TrashCommand {
    /// List the entries currently sitting in a root's trash
    List {
        #[arg(value_name = "PATH", default_value = ".")]
        root: PathBuf,
    },
    /// Move every trashed entry (or just one run's) back to its original path
    Restore {
        #[arg(value_name = "PATH", default_value = ".")]
        root: PathBuf,
        /// Restore only this run's trash instead of every run under .btidy/trash
        #[arg(long, value_name = "RUN_ID")]
        run_id: Option<String>,
    },
    /// Permanently delete trashed entries
    Purge {
        #[arg(value_name = "PATH", default_value = ".")]
        root: PathBuf,
        /// Purge only this run's trash instead of the entire trash tree
        #[arg(long, value_name = "RUN_ID")]
        run_id: Option<String>,
    },
}
