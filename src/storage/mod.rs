//! storage
//!
//! The repository storage facade.
//!
//! # Architecture
//!
//! [`Storage`] is the only surface the enclosing application queries. It
//! owns the current [`RevCache`] snapshot, decides when to rebuild it,
//! memoizes decoded commit records in a bounded FIFO cache, and drives the
//! process bridge for everything the snapshot cannot answer.
//!
//! # Concurrency
//!
//! Many request-handling threads share one `Storage`. Three independent
//! critical sections keep them out of each other's way:
//!
//! - the cache slot: held only to capture the current `Arc` or to swap a
//!   finished rebuild in; the slow external scan runs unlocked
//! - the commit-record cache
//! - each streaming pipe, strictly one conversation at a time
//!
//! A completed [`Storage::sync`] is visible to every later query (atomic
//! `Arc` swap, never a partially built cache). Concurrent syncs and
//! overlapping queries have no defined relative ordering.
//!
//! # Error contract
//!
//! "Not found" is `Ok(None)`, never an error. Errors mean the repository
//! or tool is unusable for that one query; they never poison the shared
//! cache or later calls.

pub mod factory;
pub mod historian;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::{
    BridgeError, CatFilePipe, Change, DiffInput, DiffTreePipe, GitBridge, ObjectKind,
    MIN_GIT_VERSION,
};
use crate::cache::{BoundedCache, PrefixLookup, ReachableFrom, RevCache};
use crate::config::{ConfigError, StorageConfig};
use crate::core::commit::CommitRecord;
use crate::core::types::{looks_like_short_rev, Rev};

pub use factory::StorageFactory;
pub use historian::Historian;

/// Commit records memoized per storage.
const RECORD_CACHE_SIZE: usize = 200;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Construction-time configuration failure; fatal, never degraded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The external tool could not be driven for this query.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// One entry from a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: ObjectKind,
    pub id: Rev,
    /// Byte size for blobs; `None` for trees and other non-blobs.
    pub size: Option<u64>,
    /// Path relative to the listed tree, raw bytes decoded lossily.
    pub name: String,
}

/// Read access to one repository's commit graph, trees, blobs, and
/// history.
pub struct Storage {
    config: StorageConfig,
    bridge: GitBridge,
    /// Current snapshot; `None` until the first scan.
    cache: Mutex<Option<Arc<RevCache>>>,
    records: Mutex<BoundedCache<Rev, Arc<CommitRecord>>>,
    cat_file: Mutex<Option<CatFilePipe>>,
    diff_tree: Mutex<Option<DiffTreePipe>>,
}

impl Storage {
    /// Open a repository.
    ///
    /// # Errors
    ///
    /// Eagerly validates the control directory and the tool version;
    /// violations are fatal configuration errors.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        Self::with_initial_cache(config, None)
    }

    /// Open a repository, seeding the cache slot with a persisted
    /// snapshot from a previous instance.
    pub(crate) fn with_initial_cache(
        config: StorageConfig,
        snapshot: Option<Arc<RevCache>>,
    ) -> Result<Self, StorageError> {
        config.validate_git_dir()?;
        let bridge = GitBridge::new(&config.git_bin, &config.git_dir);
        let version = bridge.version()?;
        if !version.at_least(MIN_GIT_VERSION) {
            return Err(ConfigError::VersionTooOld {
                found: version.to_dotted(),
                required: MIN_GIT_VERSION
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join("."),
            }
            .into());
        }
        Ok(Self {
            config,
            bridge,
            cache: Mutex::new(snapshot),
            records: Mutex::new(BoundedCache::new(RECORD_CACHE_SIZE)),
            cat_file: Mutex::new(None),
            diff_tree: Mutex::new(None),
        })
    }

    /// The configuration this storage was opened with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Revision cache lifecycle
    // ------------------------------------------------------------------

    /// The current snapshot, scanning on first use.
    pub fn rev_cache(&self) -> Result<Arc<RevCache>, StorageError> {
        if let Some(cache) = self.cache.lock().as_ref() {
            return Ok(Arc::clone(cache));
        }
        let refs = self.fetch_refs()?;
        let built = Arc::new(self.scan(refs)?);
        let mut slot = self.cache.lock();
        // A concurrent first scan may have won; either snapshot is fine.
        Ok(Arc::clone(slot.get_or_insert(built)))
    }

    /// Re-fetch references and rebuild the snapshot if they changed.
    ///
    /// Returns `true` only when the reference map differs from the cached
    /// one. This is the only externally triggered invalidation path.
    pub fn sync(&self) -> Result<bool, StorageError> {
        let refs = self.fetch_refs()?;
        let current = self.cache.lock().clone();
        if let Some(current) = &current {
            if *current.refs() == refs {
                return Ok(false);
            }
        }
        let changed = match &current {
            Some(current) => *current.refs() != refs,
            None => !refs.is_empty(),
        };
        let rebuilt = Arc::new(self.scan(refs)?);
        *self.cache.lock() = Some(rebuilt);
        Ok(changed)
    }

    fn fetch_refs(&self) -> Result<BTreeMap<String, Rev>, StorageError> {
        let text = self.bridge.run_string(&[
            "for-each-ref",
            "--format=%(objectname) %(objecttype) %(refname) %(*objectname)",
        ])?;
        Ok(parse_refs(&text))
    }

    /// Full parent-linkage scan over every referenced revision.
    fn scan(&self, refs: BTreeMap<String, Rev>) -> Result<RevCache, StorageError> {
        if refs.is_empty() {
            return Ok(RevCache::empty());
        }
        let started = Instant::now();
        let mut args = vec!["rev-list", "--parents", "--topo-order"];
        let mut targets: Vec<&str> = refs.values().map(Rev::as_str).collect();
        targets.sort_unstable();
        targets.dedup();
        args.extend(targets);

        let text = self.bridge.run_string(&args)?;
        let listing = parse_rev_listing(&text);
        let cache = RevCache::build(refs, listing);
        debug!(
            git_dir = %self.config.git_dir.display(),
            commits = cache.commit_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt revision cache"
        );
        Ok(cache)
    }

    // ------------------------------------------------------------------
    // Graph queries
    // ------------------------------------------------------------------

    /// Resolve a name to a full revision.
    ///
    /// Tries, in order: full or short hash against the short index
    /// (falling back to a direct tool query when the cache is stale),
    /// symbolic `HEAD`, branch name, tag name. First match wins;
    /// `Ok(None)` when nothing matches.
    pub fn resolve(&self, name: &str) -> Result<Option<Rev>, StorageError> {
        let cache = self.rev_cache()?;

        if let Ok(rev) = Rev::new(name) {
            if cache.contains(&rev) {
                return Ok(Some(rev));
            }
            // Known-format id the cache has not seen: maybe newer than the
            // last scan.
            if let Some(rev) = self.verify_rev(name)? {
                return Ok(Some(rev));
            }
        } else if looks_like_short_rev(name) {
            match cache.find_prefix(name) {
                PrefixLookup::Unique(rev) => return Ok(Some(rev)),
                // Ambiguous prefixes and stale misses fall through: the
                // name may still be a branch or tag.
                PrefixLookup::Ambiguous => {}
                PrefixLookup::Missing => {
                    if let Some(rev) = self.verify_rev(name)? {
                        return Ok(Some(rev));
                    }
                }
            }
        }
        if name == "HEAD" {
            if let Some(rev) = self.resolve_head(&cache)? {
                return Ok(Some(rev));
            }
        }
        if let Some(rev) = cache.branch(name) {
            return Ok(Some(rev.clone()));
        }
        Ok(cache.tag(name).cloned())
    }

    /// Resolve symbolic `HEAD` through the reference map.
    fn resolve_head(&self, cache: &RevCache) -> Result<Option<Rev>, StorageError> {
        let refname = self.bridge.run_string(&["symbolic-ref", "-q", "HEAD"])?;
        let refname = refname.trim();
        if !refname.is_empty() {
            if let Some(rev) = cache.refs().get(refname) {
                return Ok(Some(rev.clone()));
            }
            // Symbolic target exists but was not scanned; ask the tool.
        }
        self.verify_rev("HEAD")
    }

    /// One-shot revision verification, the disambiguation fallback.
    ///
    /// The `^{object}` suffix forces an existence check: a bare full-hex
    /// name would otherwise echo back without the object being present.
    pub fn verify_rev(&self, name: &str) -> Result<Option<Rev>, StorageError> {
        let probe = format!("{name}^{{object}}");
        let text = self
            .bridge
            .run_string(&["rev-parse", "--verify", "--quiet", &probe])?;
        Ok(text.lines().next().and_then(|line| Rev::new(line.trim()).ok()))
    }

    /// Shortest unique prefix of `rev`, at least `min` (>= 4) characters.
    pub fn shorten(&self, rev: &Rev, min: usize) -> Result<String, StorageError> {
        Ok(self.rev_cache()?.shorten(rev, min))
    }

    /// The commit `delta` steps away in history order; positive steps
    /// toward the youngest.
    pub fn history_relative(&self, rev: &Rev, delta: i64) -> Result<Option<Rev>, StorageError> {
        Ok(self.rev_cache()?.history_relative(rev, delta).cloned())
    }

    /// Lazy breadth-first sequence of all descendants of `rev`, each
    /// yielded once regardless of merges.
    pub fn reachable_from(&self, rev: &Rev) -> Result<ReachableFrom, StorageError> {
        Ok(self.rev_cache()?.descendants_owned(rev))
    }

    /// True if `descendant` can be reached from `ancestor` via child
    /// links.
    pub fn is_ancestor(&self, ancestor: &Rev, descendant: &Rev) -> Result<bool, StorageError> {
        let mut walk = self.reachable_from(ancestor)?;
        Ok(walk.any(|rev| rev == *descendant))
    }

    /// The youngest known commit.
    pub fn youngest(&self) -> Result<Option<Rev>, StorageError> {
        Ok(self.rev_cache()?.youngest().cloned())
    }

    /// The oldest known commit.
    pub fn oldest(&self) -> Result<Option<Rev>, StorageError> {
        Ok(self.rev_cache()?.oldest().cloned())
    }

    /// Number of known commits.
    pub fn rev_count(&self) -> Result<usize, StorageError> {
        Ok(self.rev_cache()?.commit_count())
    }

    /// Branch names with their head revisions, sorted by name.
    pub fn branches(&self) -> Result<Vec<(String, Rev)>, StorageError> {
        let cache = self.rev_cache()?;
        Ok(cache
            .branches()
            .map(|(name, rev)| (name.to_string(), rev.clone()))
            .collect())
    }

    /// Tag names with the commits they point to, sorted by name.
    pub fn tags(&self) -> Result<Vec<(String, Rev)>, StorageError> {
        let cache = self.rev_cache()?;
        Ok(cache
            .tags()
            .map(|(name, rev)| (name.to_string(), rev.clone()))
            .collect())
    }

    /// The branch `HEAD` points at, if it is symbolic.
    pub fn head_branch(&self) -> Result<Option<String>, StorageError> {
        let text = self.bridge.run_string(&["symbolic-ref", "-q", "HEAD"])?;
        let refname = text.trim();
        Ok(refname
            .strip_prefix("refs/heads/")
            .filter(|name| !name.is_empty())
            .map(str::to_string))
    }

    // ------------------------------------------------------------------
    // Object and tree access
    // ------------------------------------------------------------------

    /// Decoded commit record for `rev`, memoized in the bounded cache.
    ///
    /// Cache hits skip the object-fetch protocol entirely.
    pub fn commit_record(&self, rev: &Rev) -> Result<Option<Arc<CommitRecord>>, StorageError> {
        if let Some(record) = self.records.lock().get(rev) {
            return Ok(Some(Arc::clone(record)));
        }
        let fetched = self.with_cat_file(|pipe| pipe.fetch(rev.as_str(), Some(ObjectKind::Commit)))?;
        let Some(object) = fetched else {
            return Ok(None);
        };
        let record = Arc::new(CommitRecord::parse(&object.data));
        self.records.lock().insert(rev.clone(), Arc::clone(&record));
        Ok(Some(record))
    }

    /// Raw blob content by id.
    pub fn cat_blob(&self, rev: &Rev) -> Result<Option<Vec<u8>>, StorageError> {
        let fetched = self.with_cat_file(|pipe| pipe.fetch(rev.as_str(), Some(ObjectKind::Blob)))?;
        Ok(fetched.map(|object| object.data))
    }

    /// List a tree, optionally recursively.
    ///
    /// `path` scopes the listing; empty means the tree root.
    pub fn ls_tree(
        &self,
        rev: &Rev,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<TreeEntry>, StorageError> {
        let mut args = vec!["ls-tree", "-z", "-l"];
        if recursive {
            args.push("-r");
        }
        args.push(rev.as_str());
        if !path.is_empty() {
            args.push("--");
            args.push(path);
        }
        let output = self.bridge.run(&args)?;
        Ok(parse_ls_tree(&output))
    }

    // ------------------------------------------------------------------
    // History queries
    // ------------------------------------------------------------------

    /// The newest commit at or before `rev` that touched `path`.
    ///
    /// With a historian the open log walk is advanced until the path
    /// resolves; a miss after exhaustion (or an out-of-scope query) falls
    /// back to a dedicated limit-1 history query.
    pub fn last_changed(
        &self,
        rev: &Rev,
        path: &str,
        historian: Option<&Historian>,
    ) -> Result<Option<Rev>, StorageError> {
        if let Some(historian) = historian {
            if let Some(found) = historian.find(path) {
                return Ok(Some(found));
            }
        }
        let text = self.bridge.run_string(&[
            "log",
            "--pretty=format:%H",
            "-1",
            rev.as_str(),
            "--",
            path,
        ])?;
        Ok(text.lines().next().and_then(|line| Rev::new(line.trim()).ok()))
    }

    /// Open a resumable path-history walk scoped to `base_path`.
    pub fn get_historian(&self, rev: &Rev, base_path: &str) -> Result<Historian, StorageError> {
        Ok(Historian::open(&self.bridge, rev, base_path)?)
    }

    /// Per-physical-line authorship of `path` at `rev`, ordered by line.
    pub fn blame(&self, rev: &Rev, path: &str) -> Result<Vec<(Rev, u32)>, StorageError> {
        let text = self
            .bridge
            .run_string(&["blame", "-p", rev.as_str(), "--", path])?;
        Ok(parse_blame(&text))
    }

    /// Structural changes between two tree-like objects, scoped to
    /// `path` (empty keeps everything).
    ///
    /// `old = None` diffs `new` against its parents, or the empty tree
    /// for a root commit. Bare tree ids are diffed directly, old to new.
    pub fn changes_between(
        &self,
        old: Option<&Rev>,
        new: &Rev,
        path: &str,
    ) -> Result<Vec<Change>, StorageError> {
        // The pipe dispatches a line on the first object's kind, so the
        // write order has to know whether the ids are commits or trees.
        // Anything the graph snapshot knows is a commit; otherwise ask
        // the object-fetch pipe.
        let input = if old.is_none() || self.rev_cache()?.contains(new) {
            DiffInput::Commits
        } else {
            match self.with_cat_file(|pipe| pipe.fetch(new.as_str(), None))? {
                Some(object) if object.kind == ObjectKind::Tree => DiffInput::Trees,
                _ => DiffInput::Commits,
            }
        };
        let mut changes = self.with_diff_tree(|pipe| {
            pipe.changes(old.map(Rev::as_str), new.as_str(), input)
        })?;
        if !path.is_empty() {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            changes.retain(|change| {
                let matches = |p: &str| p == path || p.starts_with(&prefix);
                matches(&change.old_path) || change.new_path.as_deref().is_some_and(matches)
            });
        }
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Pipe management
    // ------------------------------------------------------------------

    /// Run one object-fetch conversation, tearing the pipe down on any
    /// failure so the next call reopens a fresh one.
    fn with_cat_file<T>(
        &self,
        exchange: impl FnOnce(&mut CatFilePipe) -> Result<T, BridgeError>,
    ) -> Result<T, StorageError> {
        let mut slot = self.cat_file.lock();
        if slot.is_none() {
            *slot = Some(CatFilePipe::open(&self.bridge)?);
        }
        let pipe = slot.as_mut().expect("pipe opened above");
        match exchange(pipe) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "object-fetch pipe failed; discarding");
                *slot = None;
                Err(err.into())
            }
        }
    }

    /// Same discipline for the structural-diff pipe.
    fn with_diff_tree<T>(
        &self,
        exchange: impl FnOnce(&mut DiffTreePipe) -> Result<T, BridgeError>,
    ) -> Result<T, StorageError> {
        let mut slot = self.diff_tree.lock();
        if slot.is_none() {
            *slot = Some(DiffTreePipe::open(&self.bridge)?);
        }
        let pipe = slot.as_mut().expect("pipe opened above");
        match exchange(pipe) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "structural-diff pipe failed; discarding");
                *slot = None;
                Err(err.into())
            }
        }
    }

    /// Explicit teardown: close both streaming pipes.
    ///
    /// Safe to call more than once; queries after `close` reopen pipes on
    /// demand.
    pub fn close(&self) {
        *self.cat_file.lock() = None;
        *self.diff_tree.lock() = None;
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.config.persist_cache {
            if let Some(cache) = self.cache.lock().clone() {
                StorageFactory::save_cache(&self.config.git_dir, cache);
            }
        }
        self.close();
    }
}

// ----------------------------------------------------------------------
// Output parsing
// ----------------------------------------------------------------------

/// Parse `for-each-ref` output into the reference map, dereferencing
/// annotated tags.
fn parse_refs(text: &str) -> BTreeMap<String, Rev> {
    let mut refs = BTreeMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(' ').collect();
        let (objectname, objecttype, refname, deref) = match fields.as_slice() {
            &[o, t, r] | &[o, t, r, ""] => (o, t, r, None),
            &[o, t, r, d] => (o, t, r, Some(d)),
            _ => continue,
        };
        let target = match (objecttype, deref) {
            ("tag", Some(deref)) => deref,
            _ => objectname,
        };
        if let Ok(rev) = Rev::new(target) {
            refs.insert(refname.to_string(), rev);
        }
    }
    refs
}

/// Parse `rev-list --parents` output into (commit, parents) entries,
/// preserving the listing order.
fn parse_rev_listing(text: &str) -> Vec<(Rev, Vec<Rev>)> {
    let mut listing = Vec::new();
    for line in text.lines() {
        let mut ids = line.split(' ').filter_map(|tok| Rev::new(tok).ok());
        let Some(rev) = ids.next() else { continue };
        listing.push((rev, ids.collect()));
    }
    listing
}

/// Parse `ls-tree -z -l` output.
fn parse_ls_tree(output: &[u8]) -> Vec<TreeEntry> {
    let text = String::from_utf8_lossy(output);
    let mut entries = Vec::new();
    for record in text.split('\0') {
        // "<mode> SP <type> SP <id> SP <size> TAB <name>"
        let Some((meta, name)) = record.split_once('\t') else {
            continue;
        };
        let fields: Vec<&str> = meta.split_whitespace().collect();
        let &[mode, kind, id, size] = fields.as_slice() else {
            continue;
        };
        let Some(kind) = parse_object_kind(kind) else {
            continue;
        };
        let Ok(id) = Rev::new(id) else { continue };
        entries.push(TreeEntry {
            mode: mode.to_string(),
            kind,
            id,
            size: size.parse().ok(),
            name: name.to_string(),
        });
    }
    entries
}

fn parse_object_kind(s: &str) -> Option<ObjectKind> {
    match s {
        "commit" => Some(ObjectKind::Commit),
        "tree" => Some(ObjectKind::Tree),
        "blob" => Some(ObjectKind::Blob),
        "tag" => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// Parse `blame -p` porcelain output into (revision, source line) per
/// physical line.
///
/// The stream alternates between metadata blocks and content: a line
/// without a leading tab starts or continues a block, a tab-prefixed line
/// is the content the pending header describes.
fn parse_blame(text: &str) -> Vec<(Rev, u32)> {
    let mut lines_out = Vec::new();
    let mut pending: Option<(Rev, u32)> = None;
    for line in text.lines() {
        if line.starts_with('\t') {
            if let Some(entry) = pending.take() {
                lines_out.push(entry);
            }
            continue;
        }
        // Header lines: "<sha> <orig> <final> [count]"; other metadata
        // (author, filename, ...) never starts with 40 hex chars.
        let mut fields = line.split(' ');
        let (Some(id), Some(orig)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(rev) = Rev::new(id) else { continue };
        let Ok(orig) = orig.parse::<u32>() else { continue };
        pending = Some((rev, orig));
    }
    lines_out
}
