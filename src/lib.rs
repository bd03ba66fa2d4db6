//! gitstore - repository-metadata cache and git process bridge
//!
//! Gives a larger ticket/wiki application read access to a git
//! repository's commit graph, trees, blobs, and history by invoking the
//! external `git` executable and caching its output in memory. The commit
//! graph can hold hundreds of thousands of nodes, is queried concurrently
//! from many request-handling threads, and stays hot across requests.
//!
//! # Architecture
//!
//! The codebase is layered bottom-up:
//!
//! - [`bridge`] - The single doorway to the external executable: one-shot
//!   invocations plus the two long-lived streaming sub-commands
//! - [`cache`] - The immutable commit-graph snapshot and the bounded FIFO
//!   memoization map
//! - [`storage`] - The query facade owning cache lifecycle and pipes, and
//!   the process-wide instance registry
//! - [`core`] - Validated domain types and commit-record decoding
//! - [`config`] - Configuration schema, loaded from opaque key/value
//!   parameters or TOML
//!
//! # Correctness invariants
//!
//! 1. The revision cache is immutable; refreshes swap a fully built
//!    snapshot in atomically, so queries never observe partial state
//! 2. "Not found" is an explicit outcome, never conflated with transport
//!    or configuration failure
//! 3. A streaming-pipe failure is local to the triggering query; the pipe
//!    is discarded and reopened, later calls are unaffected
//! 4. Configuration problems fail construction eagerly, never degrade
//!    silently

pub mod bridge;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod storage;
