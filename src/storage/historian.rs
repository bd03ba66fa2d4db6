//! storage::historian
//!
//! Resumable path-history resolution over one open log stream.
//!
//! # Architecture
//!
//! Resolving "which commit last touched this path" one path at a time is
//! expensive when a directory listing needs it for every entry. A
//! [`Historian`] instead holds one scoped `log --name-status` child open
//! and advances it on demand: each unresolved query consumes commits until
//! the path resolves or the log ends. Results accumulate in a first-seen
//! map, so paths the walk already passed answer without touching the
//! child.
//!
//! The cursor is guarded by a mutex, single conversation at a time, the
//! same discipline as the streaming pipes. The child is killed and waited
//! on drop.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Stdio};

use parking_lot::Mutex;
use tracing::debug;

use crate::bridge::{BridgeError, GitBridge};
use crate::core::types::Rev;

/// A resumable walk over a scoped name-status log.
#[derive(Debug)]
pub struct Historian {
    inner: Mutex<Cursor>,
}

#[derive(Debug)]
struct Cursor {
    child: Child,
    lines: BufReader<ChildStdout>,
    /// First commit (newest) seen touching each path.
    resolved: HashMap<String, Rev>,
    current: Option<Rev>,
    exhausted: bool,
}

impl Historian {
    /// Open a log walk starting at `rev`, scoped to `base_path` (empty for
    /// the whole tree).
    pub(crate) fn open(
        bridge: &GitBridge,
        rev: &Rev,
        base_path: &str,
    ) -> Result<Self, BridgeError> {
        let mut args = vec![
            "log",
            "--pretty=format:%H",
            "--name-status",
            rev.as_str(),
            "--",
        ];
        if !base_path.is_empty() {
            args.push(base_path);
        }
        let mut child = bridge
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: bridge.git_bin().to_path_buf(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::Desync {
            detail: "historian stdout unavailable".into(),
        })?;
        debug!(rev = %rev, base = base_path, "opened historian walk");
        Ok(Self {
            inner: Mutex::new(Cursor {
                child,
                lines: BufReader::new(stdout),
                resolved: HashMap::new(),
                current: None,
                exhausted: false,
            }),
        })
    }

    /// Resolve the newest commit touching `path`, advancing the walk as
    /// far as needed.
    ///
    /// `None` once the log is exhausted without the path appearing; the
    /// storage layer then falls back to a dedicated limit-1 query.
    pub fn find(&self, path: &str) -> Option<Rev> {
        let mut cursor = self.inner.lock();
        if let Some(rev) = cursor.resolved.get(path) {
            return Some(rev.clone());
        }
        while !cursor.exhausted {
            if cursor.step(path) {
                return cursor.resolved.get(path).cloned();
            }
        }
        None
    }
}

impl Cursor {
    /// Consume one line; true when `target` just resolved.
    fn step(&mut self, target: &str) -> bool {
        let mut line = String::new();
        match self.lines.read_line(&mut line) {
            Ok(0) | Err(_) => {
                self.exhausted = true;
                return false;
            }
            Ok(_) => {}
        }
        let line = line.trim_end_matches('\n');
        if line.is_empty() {
            return false;
        }
        if let Ok(rev) = Rev::new(line) {
            self.current = Some(rev);
            return false;
        }
        // A name-status line: status code, then tab-separated path(s).
        // Renames carry two paths; both resolve to this commit.
        let Some(current) = self.current.clone() else {
            return false;
        };
        let mut hit = false;
        for path in line.split('\t').skip(1) {
            if self.resolved.contains_key(path) {
                continue;
            }
            self.resolved.insert(path.to_string(), current.clone());
            if path == target {
                hit = true;
            }
        }
        hit
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
