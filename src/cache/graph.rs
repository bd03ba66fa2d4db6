//! cache::graph
//!
//! Immutable snapshot of the commit graph.
//!
//! # Architecture
//!
//! A [`RevCache`] is built in one pass over the parent-linkage listing the
//! external tool produces in combined topological+chronological order,
//! newest first. It is never mutated afterwards: a refresh builds a new
//! instance and the storage layer swaps it in atomically.
//!
//! # Invariants
//!
//! - Either every field is populated or all are empty.
//! - A commit's ordinal is its 1-based position in the listing
//!   (1 = youngest); no two commits share an ordinal.
//! - For every commit r and parent p: r is in p's child set and p's
//!   reachable-head set is a superset of r's.
//! - The builder requires the newest-first listing order: a node is only
//!   visited as a parent after all its children have contributed their
//!   reachable-head sets, so no node needs re-visiting.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::core::types::{Rev, BUCKET_LEN};

/// Graph data for one known commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitNode {
    /// Ordered parent list; the first parent is the mainline.
    pub parents: Vec<Rev>,
    /// Every commit that lists this one as a parent.
    pub children: HashSet<Rev>,
    /// 1-based rank in the canonical listing, 1 = youngest.
    ///
    /// `None` for commits seen only as parents (grafted or shallow
    /// history); such nodes carry adjacency but no history position.
    pub ordinal: Option<usize>,
    /// Branch-head revisions from which this commit is reachable.
    pub heads: HashSet<Rev>,
}

/// Outcome of a short-prefix lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixLookup {
    /// Exactly one cached revision carries the prefix.
    Unique(Rev),
    /// Two or more cached revisions carry the prefix.
    Ambiguous,
    /// No cached revision carries the prefix.
    Missing,
}

/// An immutable commit-graph snapshot.
#[derive(Debug, Default)]
pub struct RevCache {
    nodes: HashMap<Rev, CommitNode>,
    /// `by_ordinal[i]` is the commit with ordinal `i + 1`.
    by_ordinal: Vec<Rev>,
    /// Full reference name to target revision, tags dereferenced.
    refs: BTreeMap<String, Rev>,
    /// First-four-hex-chars bucket to the revisions sharing it, sorted.
    short: HashMap<String, Vec<Rev>>,
}

impl RevCache {
    /// An empty snapshot, used until the first scan and for repositories
    /// with no commits.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from the reference map and the parent-linkage
    /// listing.
    ///
    /// `listing` must be in the tool's combined topological+chronological
    /// order, newest first, each entry a commit followed by its ordered
    /// parents. The reachable-head propagation leans on that order.
    pub fn build(refs: BTreeMap<String, Rev>, listing: Vec<(Rev, Vec<Rev>)>) -> Self {
        let head_set: HashSet<&Rev> = refs
            .iter()
            .filter(|(name, _)| name.starts_with("refs/heads/"))
            .map(|(_, rev)| rev)
            .collect();

        let mut nodes: HashMap<Rev, CommitNode> = HashMap::with_capacity(listing.len());
        let mut by_ordinal: Vec<Rev> = Vec::with_capacity(listing.len());

        for (idx, (rev, parents)) in listing.into_iter().enumerate() {
            let node = nodes.entry(rev.clone()).or_default();
            node.ordinal = Some(idx + 1);
            node.parents = parents.clone();
            if head_set.contains(&rev) {
                node.heads.insert(rev.clone());
            }
            // All children of `rev` precede it in the listing, so its head
            // set is complete here and safe to push down once.
            let heads = node.heads.clone();
            for parent in parents {
                let p = nodes.entry(parent).or_default();
                p.children.insert(rev.clone());
                p.heads.extend(heads.iter().cloned());
            }
            by_ordinal.push(rev);
        }

        let mut short: HashMap<String, Vec<Rev>> = HashMap::new();
        for rev in nodes.keys() {
            short
                .entry(rev.bucket().to_string())
                .or_default()
                .push(rev.clone());
        }
        for bucket in short.values_mut() {
            bucket.sort();
        }

        Self {
            nodes,
            by_ordinal,
            refs,
            short,
        }
    }

    /// True when the snapshot holds no commits and no references.
    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }

    /// Number of commits in the canonical listing.
    pub fn commit_count(&self) -> usize {
        self.by_ordinal.len()
    }

    /// Graph data for a revision, if known.
    pub fn node(&self, rev: &Rev) -> Option<&CommitNode> {
        self.nodes.get(rev)
    }

    /// True if the revision is a known commit.
    pub fn contains(&self, rev: &Rev) -> bool {
        self.nodes.contains_key(rev)
    }

    /// The youngest commit: first entry of the canonical ordering.
    pub fn youngest(&self) -> Option<&Rev> {
        self.by_ordinal.first()
    }

    /// The oldest commit: last entry of the canonical ordering.
    pub fn oldest(&self) -> Option<&Rev> {
        self.by_ordinal.last()
    }

    /// The reference map this snapshot was built from.
    pub fn refs(&self) -> &BTreeMap<String, Rev> {
        &self.refs
    }

    /// Target of a branch reference, by short name or full ref name.
    pub fn branch(&self, name: &str) -> Option<&Rev> {
        self.refs
            .get(&format!("refs/heads/{name}"))
            .or_else(|| self.refs.get(name).filter(|_| name.starts_with("refs/")))
    }

    /// Target of a tag reference (annotated tags already dereferenced).
    pub fn tag(&self, name: &str) -> Option<&Rev> {
        self.refs.get(&format!("refs/tags/{name}"))
    }

    /// Branch names and their head revisions.
    pub fn branches(&self) -> impl Iterator<Item = (&str, &Rev)> {
        self.refs
            .iter()
            .filter_map(|(name, rev)| Some((name.strip_prefix("refs/heads/")?, rev)))
    }

    /// Tag names and the commits they point to.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &Rev)> {
        self.refs
            .iter()
            .filter_map(|(name, rev)| Some((name.strip_prefix("refs/tags/")?, rev)))
    }

    /// Look up a hex prefix (>= 4 characters) in the short index.
    pub fn find_prefix(&self, prefix: &str) -> PrefixLookup {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.len() < BUCKET_LEN {
            return PrefixLookup::Missing;
        }
        let Some(bucket) = self.short.get(&prefix[..BUCKET_LEN]) else {
            return PrefixLookup::Missing;
        };
        let mut matches = bucket.iter().filter(|rev| rev.as_str().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(rev), None) => PrefixLookup::Unique(rev.clone()),
            (Some(_), Some(_)) => PrefixLookup::Ambiguous,
            (None, _) => PrefixLookup::Missing,
        }
    }

    /// Shortest unique prefix of `rev`, at least `min` characters.
    ///
    /// Competitors are the other members of the revision's 4-character
    /// bucket; the prefix grows one character at a time until it is
    /// unambiguous. Worst case the full id is returned.
    pub fn shorten(&self, rev: &Rev, min: usize) -> String {
        let min = min.max(BUCKET_LEN);
        let full = rev.as_str();
        let competitors: Vec<&Rev> = self
            .short
            .get(rev.bucket())
            .map(|bucket| bucket.iter().filter(|other| *other != rev).collect())
            .unwrap_or_default();

        for len in min..full.len() {
            let prefix = &full[..len];
            if !competitors.iter().any(|c| c.as_str().starts_with(prefix)) {
                return prefix.to_string();
            }
        }
        full.to_string()
    }

    /// The commit `delta` steps away in history order, if in range.
    ///
    /// Positive `delta` steps toward the youngest commit, negative toward
    /// the oldest. `None` when `rev` is unknown, carries no ordinal, or
    /// the target falls outside `[oldest, youngest]`.
    pub fn history_relative(&self, rev: &Rev, delta: i64) -> Option<&Rev> {
        let ordinal = self.node(rev)?.ordinal? as i64;
        let target = ordinal - delta;
        if target < 1 || target > self.by_ordinal.len() as i64 {
            return None;
        }
        Some(&self.by_ordinal[(target - 1) as usize])
    }

    /// Lazy breadth-first traversal of all descendants of `rev`.
    ///
    /// Each descendant is yielded exactly once regardless of how many merge
    /// paths reach it; `rev` itself is not yielded.
    pub fn descendants<'a>(&'a self, rev: &Rev) -> Descendants<'a> {
        let mut queue = VecDeque::new();
        if let Some(node) = self.node(rev) {
            let mut first: Vec<&Rev> = node.children.iter().collect();
            first.sort_by_key(|child| self.nodes[*child].ordinal);
            queue.extend(first);
        }
        Descendants {
            cache: self,
            queue,
            seen: HashSet::new(),
        }
    }

    /// True if `descendant` is reachable from `ancestor` via child links.
    pub fn is_ancestor(&self, ancestor: &Rev, descendant: &Rev) -> bool {
        self.descendants(ancestor).any(|rev| rev == *descendant)
    }

    /// Like [`RevCache::descendants`], but the iterator shares ownership
    /// of the snapshot, so it stays valid after the storage layer swaps a
    /// newer cache in.
    pub fn descendants_owned(self: &Arc<Self>, rev: &Rev) -> ReachableFrom {
        let mut queue = VecDeque::new();
        if let Some(node) = self.node(rev) {
            let mut first: Vec<&Rev> = node.children.iter().collect();
            first.sort_by_key(|child| self.nodes[*child].ordinal);
            queue.extend(first.into_iter().cloned());
        }
        ReachableFrom {
            cache: Arc::clone(self),
            queue,
            seen: HashSet::new(),
        }
    }
}

/// Owning breadth-first descendant iterator.
pub struct ReachableFrom {
    cache: Arc<RevCache>,
    queue: VecDeque<Rev>,
    seen: HashSet<Rev>,
}

impl Iterator for ReachableFrom {
    type Item = Rev;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(rev) = self.queue.pop_front() {
            if !self.seen.insert(rev.clone()) {
                continue;
            }
            if let Some(node) = self.cache.node(&rev) {
                let mut children: Vec<&Rev> = node.children.iter().collect();
                children.sort_by_key(|child| self.cache.nodes[*child].ordinal);
                self.queue.extend(children.into_iter().cloned());
            }
            return Some(rev);
        }
        None
    }
}

/// Breadth-first descendant iterator over a [`RevCache`].
pub struct Descendants<'a> {
    cache: &'a RevCache,
    queue: VecDeque<&'a Rev>,
    seen: HashSet<&'a Rev>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = Rev;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(rev) = self.queue.pop_front() {
            if !self.seen.insert(rev) {
                continue;
            }
            if let Some(node) = self.cache.node(rev) {
                // Younger children first keeps the traversal deterministic.
                let mut children: Vec<&Rev> = node.children.iter().collect();
                children.sort_by_key(|child| self.cache.nodes[*child].ordinal);
                self.queue.extend(children);
            }
            return Some(rev.clone());
        }
        None
    }
}
