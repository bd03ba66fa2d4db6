//! bridge::pipe
//!
//! Long-lived bidirectional sub-command sessions.
//!
//! # Protocols
//!
//! Exactly two sub-commands are kept open across queries:
//!
//! - **Object fetch** (`cat-file --batch`): write one revision per line,
//!   read back `<id> <kind> <len>` then `len` content bytes plus a newline
//!   separator. Strict request/response lock-step.
//! - **Structural diff** (`diff-tree --stdin --root -z -r -M`): write an
//!   id pair (or one id, diffed against its parents) plus a blank line,
//!   read the echoed input line (NUL-terminated under `-z`), then
//!   NUL-separated records until a bare newline ends the batch.
//!
//! # Desync discipline
//!
//! Any violation of lock-step (short read, malformed header, kind
//! mismatch, unparsable record) returns [`BridgeError::Desync`]. The owner
//! must then drop the session, which tears the child down (stdin closed,
//! process killed and waited), and lazily reopen on the next call. A
//! desync fails only the triggering query, never later unrelated ones.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

use tracing::{debug, warn};

use super::{BridgeError, GitBridge};

/// Kind of a fetched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(Self::Commit),
            "tree" => Some(Self::Tree),
            "blob" => Some(Self::Blob),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

/// One object returned by the fetch pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    /// Full id the tool resolved the request to.
    pub id: String,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Shared plumbing for a spawned bidirectional child.
#[derive(Debug)]
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    fn spawn(bridge: &GitBridge, args: &[&str]) -> Result<Self, BridgeError> {
        let mut child = bridge
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: bridge.git_bin().to_path_buf(),
                source,
            })?;
        // Both handles exist right after a piped spawn.
        let stdin = child.stdin.take().ok_or_else(|| BridgeError::Desync {
            detail: "child stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::Desync {
            detail: "child stdout unavailable".into(),
        })?;
        debug!(args = ?args, "opened streaming git pipe");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn send(&mut self, request: &str) -> Result<(), BridgeError> {
        self.stdin.write_all(request.as_bytes())?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, BridgeError> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line)?;
        if n == 0 {
            return Err(BridgeError::Desync {
                detail: "unexpected end of stream".into(),
            });
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, BridgeError> {
        let mut buf = vec![0; len];
        self.stdout
            .read_exact(&mut buf)
            .map_err(|err| BridgeError::Desync {
                detail: format!("short read of {len} bytes: {err}"),
            })?;
        Ok(buf)
    }

    /// Read one header line, accepting either a newline or a NUL
    /// terminator (`-z` rewrites the terminator of echoed input lines).
    fn read_header(&mut self) -> Result<String, BridgeError> {
        let mut buf = Vec::new();
        loop {
            let (advance, done) = {
                let chunk = self.stdout.fill_buf()?;
                if chunk.is_empty() {
                    return Err(BridgeError::Desync {
                        detail: "unexpected end of stream".into(),
                    });
                }
                match chunk.iter().position(|&b| b == b'\n' || b == 0) {
                    Some(pos) => {
                        buf.extend_from_slice(&chunk[..pos]);
                        (pos + 1, true)
                    }
                    None => {
                        buf.extend_from_slice(chunk);
                        (chunk.len(), false)
                    }
                }
            };
            self.stdout.consume(advance);
            if done {
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
        }
    }

    /// Read one NUL-terminated field.
    fn read_field(&mut self) -> Result<Vec<u8>, BridgeError> {
        let mut buf = Vec::new();
        self.stdout.read_until(0, &mut buf)?;
        match buf.pop() {
            Some(0) => Ok(buf),
            _ => Err(BridgeError::Desync {
                detail: "record field not NUL-terminated".into(),
            }),
        }
    }

    /// True if the next byte is a newline; consumes it when so.
    fn at_batch_end(&mut self) -> Result<bool, BridgeError> {
        let next = self.stdout.fill_buf()?.first().copied();
        match next {
            Some(b'\n') => {
                self.stdout.consume(1);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BridgeError::Desync {
                detail: "stream ended inside a diff batch".into(),
            }),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Closing stdin usually lets the child exit; kill covers the rest.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The object-fetch session (`cat-file --batch`).
#[derive(Debug)]
pub struct CatFilePipe {
    session: Session,
}

impl CatFilePipe {
    /// Spawn the batch sub-process.
    pub fn open(bridge: &GitBridge) -> Result<Self, BridgeError> {
        Ok(Self {
            session: Session::spawn(bridge, &["cat-file", "--batch"])?,
        })
    }

    /// Fetch one object by name, in strict lock-step.
    ///
    /// Returns `Ok(None)` when the tool reports the object missing: that
    /// is a normal lookup miss. When `expect` is given, a different kind
    /// in the header is treated as desync.
    ///
    /// # Errors
    ///
    /// `BridgeError::Desync` on any lock-step violation; the caller must
    /// discard this pipe.
    pub fn fetch(
        &mut self,
        name: &str,
        expect: Option<ObjectKind>,
    ) -> Result<Option<FetchedObject>, BridgeError> {
        self.session.send(&format!("{name}\n"))?;
        let header = self.session.read_line()?;

        let fields: Vec<&str> = header.split(' ').collect();
        match fields.as_slice() {
            [_, "missing"] | ["missing"] => return Ok(None),
            _ => {}
        }
        let &[id, kind_str, len_str] = fields.as_slice() else {
            return Err(BridgeError::Desync {
                detail: format!("malformed object header {header:?}"),
            });
        };
        let kind = ObjectKind::parse(kind_str).ok_or_else(|| BridgeError::Desync {
            detail: format!("unknown object kind {kind_str:?}"),
        })?;
        let len: usize = len_str.parse().map_err(|_| BridgeError::Desync {
            detail: format!("bad object length {len_str:?}"),
        })?;

        let data = self.session.read_exact(len)?;
        // The batch protocol terminates every object with one newline.
        let sep = self.session.read_exact(1)?;
        if sep != b"\n" {
            return Err(BridgeError::Desync {
                detail: "missing object separator".into(),
            });
        }

        if let Some(expected) = expect {
            if kind != expected {
                warn!(%name, got = kind.as_str(), want = expected.as_str(), "object kind mismatch");
                return Err(BridgeError::Desync {
                    detail: format!("expected {} object, got {}", expected.as_str(), kind.as_str()),
                });
            }
        }

        Ok(Some(FetchedObject {
            id: id.to_string(),
            kind,
            data,
        }))
    }
}

/// Kind of a structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Edit,
    Rename,
    Copy,
}

impl ChangeKind {
    /// Map a raw status code (`A`, `D`, `M`, `T`, `R<score>`, `C<score>`)
    /// to a change kind. Mode/type changes count as edits.
    fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'A' => Some(Self::Add),
            'D' => Some(Self::Delete),
            'M' | 'T' | 'U' => Some(Self::Edit),
            'R' => Some(Self::Rename),
            'C' => Some(Self::Copy),
            _ => None,
        }
    }

    fn path_count(self) -> usize {
        match self {
            Self::Rename | Self::Copy => 2,
            _ => 1,
        }
    }
}

/// One record from the structural-diff protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub old_mode: String,
    pub new_mode: String,
    pub old_id: String,
    pub new_id: String,
    pub kind: ChangeKind,
    /// Path in the old tree (the only path for non-rename changes).
    pub old_path: String,
    /// Destination path for renames and copies.
    pub new_path: Option<String>,
}

impl Change {
    /// The path the change lands on in the new tree.
    pub fn path(&self) -> &str {
        self.new_path.as_deref().unwrap_or(&self.old_path)
    }

    /// Parse the meta field of one raw record, without its path fields.
    fn parse_meta(meta: &str) -> Option<(String, String, String, String, ChangeKind)> {
        let meta = meta.strip_prefix(':')?;
        let mut parts = meta.split(' ');
        let old_mode = parts.next()?.to_string();
        let new_mode = parts.next()?.to_string();
        let old_id = parts.next()?.to_string();
        let new_id = parts.next()?.to_string();
        let kind = ChangeKind::from_code(parts.next()?)?;
        Some((old_mode, new_mode, old_id, new_id, kind))
    }
}

/// How the ids on one structural-diff input line are interpreted.
///
/// The tool dispatches on the first object's kind, so the write order
/// must match what the ids actually are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffInput {
    /// Commit ids: the baseline is grafted as a parent, so the line
    /// carries the commit first and the baseline second.
    Commits,
    /// Bare tree ids: diffed left to right, old first.
    Trees,
}

/// The structural-diff session (`diff-tree --stdin --root -z -r -M`).
#[derive(Debug)]
pub struct DiffTreePipe {
    session: Session,
}

impl DiffTreePipe {
    /// Spawn the streaming diff sub-process.
    pub fn open(bridge: &GitBridge) -> Result<Self, BridgeError> {
        Ok(Self {
            session: Session::spawn(bridge, &["diff-tree", "--stdin", "--root", "-z", "-r", "-M"])?,
        })
    }

    /// Diff `old` to `new`, or `new` against its parents when `old` is
    /// absent (the empty tree for a root commit, via `--root`).
    ///
    /// `input` picks the line order: commit lines carry the commit first
    /// and the baseline second, the way the tool reads `<commit>
    /// <parent>` lines; tree lines carry old then new. A trailing blank
    /// line follows; unparsable input passes through the tool verbatim,
    /// so that blank line comes back as the bare newline ending the
    /// batch. The echoed input line itself is NUL-terminated under `-z`.
    ///
    /// # Errors
    ///
    /// `BridgeError::Desync` when the record stream cannot be parsed; the
    /// caller must discard this pipe.
    pub fn changes(
        &mut self,
        old: Option<&str>,
        new: &str,
        input: DiffInput,
    ) -> Result<Vec<Change>, BridgeError> {
        let request = match (old, input) {
            (Some(old), DiffInput::Commits) => format!("{new} {old}\n\n"),
            (Some(old), DiffInput::Trees) => format!("{old} {new}\n\n"),
            (None, _) => format!("{new}\n\n"),
        };
        self.session.send(&request)?;

        // The tool echoes the input ids before the record stream.
        let echoed = self.session.read_header()?;
        if !echoed.contains(new) {
            return Err(BridgeError::Desync {
                detail: format!("unexpected batch header {echoed:?}"),
            });
        }

        let mut changes = Vec::new();
        while !self.session.at_batch_end()? {
            let meta_raw = self.session.read_field()?;
            let meta = String::from_utf8_lossy(&meta_raw).into_owned();
            let (old_mode, new_mode, old_id, new_id, kind) = Change::parse_meta(&meta)
                .ok_or_else(|| BridgeError::Desync {
                    detail: format!("unparsable diff record {meta:?}"),
                })?;

            let old_path = String::from_utf8_lossy(&self.session.read_field()?).into_owned();
            let new_path = if kind.path_count() == 2 {
                Some(String::from_utf8_lossy(&self.session.read_field()?).into_owned())
            } else {
                None
            };

            changes.push(Change {
                old_mode,
                new_mode,
                old_id,
                new_id,
                kind,
                old_path,
                new_path,
            });
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_kind_parsing() {
        assert_eq!(ObjectKind::parse("commit"), Some(ObjectKind::Commit));
        assert_eq!(ObjectKind::parse("blob"), Some(ObjectKind::Blob));
        assert_eq!(ObjectKind::parse("weird"), None);
    }

    #[test]
    fn change_kind_codes() {
        assert_eq!(ChangeKind::from_code("A"), Some(ChangeKind::Add));
        assert_eq!(ChangeKind::from_code("D"), Some(ChangeKind::Delete));
        assert_eq!(ChangeKind::from_code("M"), Some(ChangeKind::Edit));
        assert_eq!(ChangeKind::from_code("T"), Some(ChangeKind::Edit));
        assert_eq!(ChangeKind::from_code("R100"), Some(ChangeKind::Rename));
        assert_eq!(ChangeKind::from_code("C75"), Some(ChangeKind::Copy));
        assert_eq!(ChangeKind::from_code("X"), None);
        assert_eq!(ChangeKind::from_code(""), None);
    }

    #[test]
    fn parses_edit_record_meta() {
        let (old_mode, new_mode, old_id, new_id, kind) = Change::parse_meta(
            ":100644 100755 aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb M",
        )
        .unwrap();
        assert_eq!(old_mode, "100644");
        assert_eq!(new_mode, "100755");
        assert!(old_id.starts_with('a'));
        assert!(new_id.starts_with('b'));
        assert_eq!(kind, ChangeKind::Edit);
    }

    #[test]
    fn rejects_meta_without_colon() {
        assert!(Change::parse_meta("100644 100644 a b M").is_none());
        assert!(Change::parse_meta(":100644 100644 a b").is_none());
    }

    #[test]
    fn rename_carries_two_paths() {
        assert_eq!(ChangeKind::Rename.path_count(), 2);
        assert_eq!(ChangeKind::Copy.path_count(), 2);
        assert_eq!(ChangeKind::Edit.path_count(), 1);
        let change = Change {
            old_mode: "100644".into(),
            new_mode: "100644".into(),
            old_id: "a".repeat(40),
            new_id: "b".repeat(40),
            kind: ChangeKind::Rename,
            old_path: "old.txt".into(),
            new_path: Some("new.txt".into()),
        };
        assert_eq!(change.path(), "new.txt");
    }
}
