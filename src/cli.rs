//! cli
//!
//! Command-line inspection surface.
//!
//! A thin layer over [`Storage`]: parse arguments, delegate, print. The
//! enclosing application normally constructs storages through the
//! factory; this binary exists for operators poking at a repository the
//! way the application would see it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::StorageConfig;
use crate::storage::{Storage, StorageFactory};

/// Repository-metadata cache inspector.
#[derive(Debug, Parser)]
#[command(name = "gitstore", version, about)]
pub struct Cli {
    /// Path to the git executable.
    #[arg(long, global = true, default_value = "git")]
    pub git_bin: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize the cached view of a repository.
    Info {
        /// Repository path (a work tree or a git directory).
        repo: PathBuf,
    },
    /// Resolve a revision name, short hash, branch, or tag.
    Resolve {
        repo: PathBuf,
        /// The name to resolve.
        name: String,
    },
    /// Walk history from the youngest commit.
    Log {
        repo: PathBuf,
        /// Number of commits to print.
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Re-fetch references and rebuild the cache if they changed.
    Sync { repo: PathBuf },
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Info { repo } => info(&*open(&cli.git_bin, &repo)?),
        Command::Resolve { repo, name } => resolve(&*open(&cli.git_bin, &repo)?, &name),
        Command::Log { repo, limit } => log(&*open(&cli.git_bin, &repo)?, limit),
        Command::Sync { repo } => sync(&*open(&cli.git_bin, &repo)?),
    }
}

/// Open a storage for a repository path, accepting either a work tree or
/// the git directory itself.
fn open(git_bin: &Path, repo: &Path) -> anyhow::Result<Arc<Storage>> {
    let dotgit = repo.join(".git");
    let git_dir = if dotgit.is_dir() { dotgit } else { repo.to_path_buf() };
    let mut config = StorageConfig::new(git_dir);
    config.git_bin = git_bin.to_path_buf();
    StorageFactory::get_or_create(config, true)
        .with_context(|| format!("cannot open repository at '{}'", repo.display()))
}

fn info(storage: &Storage) -> anyhow::Result<()> {
    println!("commits:  {}", storage.rev_count()?);
    if let Some(head) = storage.head_branch()? {
        println!("head:     {head}");
    }
    if let Some(youngest) = storage.youngest()? {
        println!("youngest: {}", storage.shorten(&youngest, 7)?);
    }
    if let Some(oldest) = storage.oldest()? {
        println!("oldest:   {}", storage.shorten(&oldest, 7)?);
    }
    let branches = storage.branches()?;
    println!("branches: {}", branches.len());
    for (name, rev) in branches {
        println!("  {} {}", storage.shorten(&rev, 7)?, name);
    }
    let tags = storage.tags()?;
    println!("tags:     {}", tags.len());
    Ok(())
}

fn resolve(storage: &Storage, name: &str) -> anyhow::Result<()> {
    match storage.resolve(name)? {
        Some(rev) => {
            println!("{rev}");
            Ok(())
        }
        None => bail!("'{name}' does not resolve to a revision"),
    }
}

fn log(storage: &Storage, limit: usize) -> anyhow::Result<()> {
    let mut current = storage.youngest()?;
    let mut printed = 0;
    while let Some(rev) = current {
        if printed == limit {
            break;
        }
        let summary = storage
            .commit_record(&rev)?
            .map(|record| record.summary().to_string())
            .unwrap_or_default();
        println!("{} {summary}", storage.shorten(&rev, 7)?);
        printed += 1;
        current = storage.history_relative(&rev, -1)?;
    }
    Ok(())
}

fn sync(storage: &Storage) -> anyhow::Result<()> {
    if storage.sync()? {
        println!("references changed; cache rebuilt");
    } else {
        println!("no changes");
    }
    Ok(())
}
