//! bridge
//!
//! The single doorway to the external `git` executable.
//!
//! # Architecture
//!
//! All process spawning flows through [`GitBridge`]: one-shot invocations
//! that run to completion and return captured stdout, plus two long-lived
//! bidirectional sub-commands (object fetch and structural diff) exposed as
//! session objects in [`pipe`]. No other module constructs a
//! `std::process::Command` for the tool.
//!
//! # Failure policy
//!
//! One-shot failures (non-zero exit, stderr output) are logged with the
//! full argument vector and never raised: many one-shot calls are
//! legitimately used as existence probes, so the caller receives whatever
//! stdout was captured, possibly empty, and treats absence as a normal
//! miss. Only spawn/IO failures and streaming-pipe desync are errors.

pub mod pipe;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::warn;

pub use pipe::{CatFilePipe, Change, ChangeKind, DiffInput, DiffTreePipe, FetchedObject, ObjectKind};

/// Minimum supported version of the external tool.
pub const MIN_GIT_VERSION: &[u32] = &[1, 5, 6];

/// Errors from process handling.
///
/// Lookup misses are not errors; they surface as empty output or `None`
/// from the pipes.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The executable could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// Reading or writing a pipe failed.
    #[error("pipe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A streaming conversation left lock-step; the pipe is unusable.
    #[error("streaming pipe desynchronized: {detail}")]
    Desync { detail: String },

    /// The version probe produced unparsable output.
    #[error("cannot parse version from {output:?}")]
    Version { output: String },
}

/// Spawns the external tool against one control directory.
///
/// Cheap to clone; holds no process state. The long-lived pipes it opens
/// are owned and guarded by the storage layer.
#[derive(Debug, Clone)]
pub struct GitBridge {
    git_bin: PathBuf,
    git_dir: PathBuf,
}

impl GitBridge {
    pub fn new(git_bin: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: git_bin.into(),
            git_dir: git_dir.into(),
        }
    }

    /// The control directory this bridge operates on.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The executable this bridge spawns.
    pub fn git_bin(&self) -> &Path {
        &self.git_bin
    }

    /// A command pre-wired to the executable and control directory.
    pub(crate) fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg(format!("--git-dir={}", self.git_dir.display()));
        cmd.args(args);
        cmd
    }

    /// Run a one-shot sub-command to completion and capture stdout.
    ///
    /// Non-zero exit or stderr output is logged, not raised; the captured
    /// stdout is returned either way.
    ///
    /// # Errors
    ///
    /// Only when the process cannot be spawned at all.
    pub fn run(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BridgeError::Spawn {
                program: self.git_bin.clone(),
                source,
            })?;

        if !output.status.success() || !output.stderr.is_empty() {
            warn!(
                git_dir = %self.git_dir.display(),
                args = ?args,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "git invocation reported failure"
            );
        }
        Ok(output.stdout)
    }

    /// Run a one-shot sub-command and capture stdout as lossy UTF-8.
    pub fn run_string(&self, args: &[&str]) -> Result<String, BridgeError> {
        Ok(String::from_utf8_lossy(&self.run(args)?).into_owned())
    }

    /// Probe the tool version.
    pub fn version(&self) -> Result<GitVersion, BridgeError> {
        // --version ignores --git-dir, so a missing directory cannot fail
        // the probe.
        let output = self.run_string(&["--version"])?;
        GitVersion::parse(&output).ok_or(BridgeError::Version { output })
    }
}

/// A tool version, compared component-wise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitVersion(Vec<u32>);

impl GitVersion {
    /// Parse the first whitespace-separated token that starts with a digit
    /// out of a `--version` banner, as a dot-separated numeric tuple.
    ///
    /// Trailing non-numeric components (`2.39.2.windows.1`) are dropped.
    pub fn parse(banner: &str) -> Option<Self> {
        let token = banner
            .split_whitespace()
            .find(|tok| tok.starts_with(|c: char| c.is_ascii_digit()))?;
        let components: Vec<u32> = token
            .split('.')
            .map_while(|part| part.parse().ok())
            .collect();
        if components.is_empty() {
            return None;
        }
        Some(Self(components))
    }

    /// Component-wise comparison against a minimum tuple.
    pub fn at_least(&self, minimum: &[u32]) -> bool {
        for i in 0..minimum.len().max(self.0.len()) {
            let have = self.0.get(i).copied().unwrap_or(0);
            let want = minimum.get(i).copied().unwrap_or(0);
            if have != want {
                return have > want;
            }
        }
        true
    }

    /// Dotted rendering for error messages.
    pub fn to_dotted(&self) -> String {
        self.0
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}
