//! Integration tests for the storage facade.
//!
//! These tests build real repositories with the `git` CLI in temporary
//! directories and query them through [`Storage`], covering the cache
//! lifecycle, resolution, history, diffs, and pipe recovery. Every test
//! returns early when no `git` executable is available.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use gitstore::bridge::ChangeKind;
use gitstore::config::StorageConfig;
use gitstore::core::types::Rev;
use gitstore::storage::{Storage, StorageFactory};

/// True when a `git` binary can be spawned; tests no-op otherwise.
fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("skipping: git executable not available");
            return;
        }
    };
}

/// Test fixture that creates a real git repository.
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create an empty repository with a deterministic default branch.
    fn empty() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);
        run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
        Self { dir }
    }

    /// Create a repository with an initial commit.
    fn new() -> Self {
        let repo = Self::empty();
        repo.commit_file("README.md", "# Test Repo\n", "Initial commit");
        repo
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git_dir(&self) -> PathBuf {
        self.path().join(".git")
    }

    /// Open a storage for this repository.
    fn storage(&self) -> Storage {
        Storage::new(StorageConfig::new(self.git_dir())).expect("failed to open test repo")
    }

    /// Create or overwrite a file and commit it, returning the new rev.
    fn commit_file(&self, path: &str, content: &str, message: &str) -> Rev {
        std::fs::write(self.path().join(path), content).unwrap();
        run_git(self.path(), &["add", path]);
        run_git(self.path(), &["commit", "--quiet", "-m", message]);
        self.head()
    }

    fn head(&self) -> Rev {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(self.path())
            .output()
            .expect("git rev-parse failed");
        Rev::new(String::from_utf8(output.stdout).unwrap().trim()).unwrap()
    }

    fn checkout(&self, args: &[&str]) {
        let mut full = vec!["checkout", "--quiet"];
        full.extend(args);
        run_git(self.path(), &full);
    }
}

/// Run a git command in the given directory, panicking on failure.
fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn construction_rejects_non_repository() {
    require_git!();
    let dir = TempDir::new().unwrap();
    assert!(Storage::new(StorageConfig::new(dir.path())).is_err());
}

// =============================================================================
// Empty repository
// =============================================================================

#[test]
fn empty_repository_is_empty_until_first_commit() {
    require_git!();
    let repo = TestRepo::empty();
    let storage = repo.storage();

    assert_eq!(storage.resolve("HEAD").unwrap(), None);
    assert_eq!(storage.rev_count().unwrap(), 0);
    assert_eq!(storage.youngest().unwrap(), None);
    assert_eq!(storage.oldest().unwrap(), None);
    assert!(storage.branches().unwrap().is_empty());

    // No change, no rebuild.
    assert!(!storage.sync().unwrap());
    assert!(!storage.sync().unwrap());

    // The first commit flips sync exactly once.
    let rev = repo.commit_file("a.txt", "a\n", "first");
    assert!(storage.sync().unwrap());
    assert!(!storage.sync().unwrap());
    assert_eq!(storage.resolve("HEAD").unwrap(), Some(rev));
}

// =============================================================================
// Linear history
// =============================================================================

#[test]
fn linear_history_ordinals_and_traversal() {
    require_git!();
    let repo = TestRepo::empty();
    let a = repo.commit_file("f.txt", "1\n", "A");
    let b = repo.commit_file("f.txt", "2\n", "B");
    let c = repo.commit_file("f.txt", "3\n", "C");
    let storage = repo.storage();

    assert_eq!(storage.rev_count().unwrap(), 3);
    assert_eq!(storage.youngest().unwrap(), Some(c.clone()));
    assert_eq!(storage.oldest().unwrap(), Some(a.clone()));

    assert_eq!(storage.history_relative(&c, -1).unwrap(), Some(b.clone()));
    assert_eq!(storage.history_relative(&c, -2).unwrap(), Some(a.clone()));
    assert_eq!(storage.history_relative(&a, 1).unwrap(), Some(b.clone()));
    assert_eq!(storage.history_relative(&a, -1).unwrap(), None);
    assert_eq!(storage.history_relative(&c, 1).unwrap(), None);

    // Breadth-first, each exactly once.
    let walk: Vec<Rev> = storage.reachable_from(&a).unwrap().collect();
    assert_eq!(walk, vec![b.clone(), c.clone()]);
    assert!(storage.is_ancestor(&a, &c).unwrap());
    assert!(!storage.is_ancestor(&c, &a).unwrap());
}

#[test]
fn history_relative_round_trip() {
    require_git!();
    let repo = TestRepo::empty();
    let a = repo.commit_file("f.txt", "1\n", "A");
    let b = repo.commit_file("f.txt", "2\n", "B");
    repo.commit_file("f.txt", "3\n", "C");
    let storage = repo.storage();

    for rev in [&a, &b] {
        let younger = storage.history_relative(rev, 1).unwrap().unwrap();
        assert_eq!(
            storage.history_relative(&younger, -1).unwrap().as_ref(),
            Some(rev)
        );
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn resolves_branches_tags_and_hashes() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    run_git(repo.path(), &["tag", "-a", "v1", "-m", "release one"]);
    let second = repo.commit_file("b.txt", "b\n", "second");
    run_git(repo.path(), &["branch", "feature", first.as_str()]);
    let storage = repo.storage();

    assert_eq!(storage.resolve("main").unwrap(), Some(second.clone()));
    assert_eq!(storage.resolve("feature").unwrap(), Some(first.clone()));
    // Annotated tag dereferences to the commit it points to.
    assert_eq!(storage.resolve("v1").unwrap(), Some(first.clone()));
    assert_eq!(storage.resolve("HEAD").unwrap(), Some(second.clone()));
    assert_eq!(storage.head_branch().unwrap().as_deref(), Some("main"));

    assert_eq!(storage.resolve(second.as_str()).unwrap(), Some(second));
    assert_eq!(storage.resolve("no-such-name").unwrap(), None);
    assert_eq!(storage.resolve("deadbeef").unwrap(), None);

    // A well-formed but absent full id is a miss, not a hit: the
    // verification fallback must check the object exists instead of
    // echoing the hash back.
    let absent = "deadbeef".repeat(5);
    assert_eq!(storage.resolve(&absent).unwrap(), None);
}

#[test]
fn shorten_resolve_round_trip() {
    require_git!();
    let repo = TestRepo::empty();
    let mut revs = Vec::new();
    for i in 0..5 {
        revs.push(repo.commit_file("f.txt", &format!("{i}\n"), &format!("commit {i}")));
    }
    let storage = repo.storage();

    for rev in &revs {
        let short = storage.shorten(rev, 4).unwrap();
        assert!(short.len() >= 4);
        assert_eq!(storage.resolve(&short).unwrap().as_ref(), Some(rev));
    }
}

// =============================================================================
// Sync
// =============================================================================

#[test]
fn unchanged_sync_keeps_the_same_snapshot() {
    require_git!();
    let repo = TestRepo::new();
    let storage = repo.storage();

    let before = storage.rev_cache().unwrap();
    assert!(!storage.sync().unwrap());
    let after = storage.rev_cache().unwrap();
    assert!(Arc::ptr_eq(&before, &after), "unchanged sync must not rebuild");

    repo.commit_file("c.txt", "c\n", "third");
    assert!(storage.sync().unwrap());
    let rebuilt = storage.rev_cache().unwrap();
    assert!(!Arc::ptr_eq(&before, &rebuilt));
}

#[test]
fn sync_completed_before_query_is_visible() {
    require_git!();
    let repo = TestRepo::new();
    let storage = Arc::new(repo.storage());
    storage.rev_cache().unwrap();

    let second = repo.commit_file("b.txt", "b\n", "second");
    assert!(storage.sync().unwrap());

    // Another thread sees the new generation.
    let shared = Arc::clone(&storage);
    let seen = std::thread::spawn(move || shared.resolve("HEAD").unwrap())
        .join()
        .unwrap();
    assert_eq!(seen, Some(second));
}

// =============================================================================
// Merges and reachable heads
// =============================================================================

#[test]
fn diamond_merge_reachability_and_heads() {
    require_git!();
    let repo = TestRepo::empty();
    let a = repo.commit_file("base.txt", "base\n", "A");
    repo.checkout(&["-b", "topic"]);
    let c = repo.commit_file("topic.txt", "t\n", "C");
    repo.checkout(&["main"]);
    let b = repo.commit_file("main.txt", "m\n", "B");
    run_git(
        repo.path(),
        &["merge", "--quiet", "--no-ff", "-m", "D", "topic"],
    );
    let d = repo.head();
    let storage = repo.storage();

    assert!(storage.is_ancestor(&a, &d).unwrap());
    assert!(storage.is_ancestor(&b, &d).unwrap());
    assert!(storage.is_ancestor(&c, &d).unwrap());
    assert!(!storage.is_ancestor(&b, &c).unwrap());

    // d reached once despite two inbound paths.
    let walk: Vec<Rev> = storage.reachable_from(&a).unwrap().collect();
    assert_eq!(walk.len(), 3);
    assert_eq!(walk.iter().filter(|rev| **rev == d).count(), 1);

    // The base commit reaches both branch heads.
    let cache = storage.rev_cache().unwrap();
    let heads = &cache.node(&a).unwrap().heads;
    assert!(heads.contains(&d), "main head reachable from A");
    assert!(heads.contains(&c), "topic head reachable from A");

    // The merge lists the mainline parent first.
    let node = cache.node(&d).unwrap();
    assert_eq!(node.parents, vec![b, c]);
}

// =============================================================================
// Objects, trees, blobs
// =============================================================================

#[test]
fn commit_record_roundtrip_and_memoization() {
    require_git!();
    let repo = TestRepo::new();
    let rev = repo.head();
    let storage = repo.storage();

    let record = storage.commit_record(&rev).unwrap().unwrap();
    assert_eq!(record.summary(), "Initial commit");
    assert!(record.parents().is_empty());
    assert!(record.author().unwrap().contains("Test User"));

    // Second lookup answers from the bounded cache.
    let again = storage.commit_record(&rev).unwrap().unwrap();
    assert!(Arc::ptr_eq(&record, &again));
}

#[test]
fn ls_tree_and_cat_blob() {
    require_git!();
    let repo = TestRepo::new();
    repo.commit_file("src.rs", "fn main() {}\n", "add source");
    let head = repo.head();
    let storage = repo.storage();

    let entries = storage.ls_tree(&head, "", false).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["README.md", "src.rs"]);

    let readme = &entries[0];
    assert_eq!(readme.mode, "100644");
    assert_eq!(readme.size, Some("# Test Repo\n".len() as u64));

    let content = storage.cat_blob(&readme.id).unwrap().unwrap();
    assert_eq!(content, b"# Test Repo\n");

    // Missing object is a miss, not an error.
    let absent = Rev::new("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef").unwrap();
    assert_eq!(storage.cat_blob(&absent).unwrap(), None);
}

#[test]
fn object_fetch_desync_recovers_on_next_call() {
    require_git!();
    let repo = TestRepo::new();
    let rev = repo.head();
    let storage = repo.storage();

    // Asking for a commit as a blob violates lock-step expectations and
    // must fail only this call.
    assert!(storage.cat_blob(&rev).is_err());

    // The pipe reopens; an unrelated fetch on the same storage succeeds.
    let record = storage.commit_record(&rev).unwrap().unwrap();
    assert_eq!(record.summary(), "Initial commit");
}

// =============================================================================
// Structural diff
// =============================================================================

#[test]
fn changes_between_commits() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    repo.commit_file("README.md", "# Test Repo\nmore\n", "edit readme");
    let second = repo.commit_file("new.txt", "new\n", "add file");
    let storage = repo.storage();

    let changes = storage.changes_between(Some(&first), &second, "").unwrap();
    let mut kinds: Vec<(ChangeKind, String)> = changes
        .iter()
        .map(|change| (change.kind, change.path().to_string()))
        .collect();
    kinds.sort_by(|x, y| x.1.cmp(&y.1));
    assert_eq!(
        kinds,
        vec![
            (ChangeKind::Edit, "README.md".to_string()),
            (ChangeKind::Add, "new.txt".to_string()),
        ]
    );

    // A root commit with no baseline diffs against the empty tree.
    let initial = storage.changes_between(None, &first, "").unwrap();
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].kind, ChangeKind::Add);
    assert_eq!(initial[0].path(), "README.md");

    // Scoped to a path that never changed.
    let scoped = storage
        .changes_between(Some(&first), &second, "elsewhere")
        .unwrap();
    assert!(scoped.is_empty());
}

#[test]
fn changes_between_completes_promptly() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    let second = repo.commit_file("x.txt", "x\n", "add x");

    // Run on a worker so a wedged diff batch fails the test instead of
    // hanging the suite; two back-to-back batches keep the pipe honest.
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let storage = Storage::new(StorageConfig::new(repo.git_dir())).unwrap();
        let pair = storage.changes_between(Some(&first), &second, "").unwrap().len();
        let again = storage.changes_between(Some(&first), &second, "").unwrap().len();
        tx.send((pair, again)).unwrap();
    });
    let (pair, again) = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("diff batch must terminate");
    assert_eq!(pair, 1);
    assert_eq!(again, 1);
}

#[test]
fn tree_pair_diff_keeps_direction() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    let second = repo.commit_file("added.txt", "x\n", "add file");
    let storage = repo.storage();

    let tree_of = |rev: &Rev| {
        let record = storage.commit_record(rev).unwrap().unwrap();
        Rev::new(record.header("tree").unwrap()).unwrap()
    };
    let (old_tree, new_tree) = (tree_of(&first), tree_of(&second));

    // Bare trees diff old to new: the file added in the second commit
    // must come back as an addition, not a deletion.
    let changes = storage.changes_between(Some(&old_tree), &new_tree, "").unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Add);
    assert_eq!(changes[0].path(), "added.txt");
}

#[test]
fn changes_between_identical_trees_is_empty() {
    require_git!();
    let repo = TestRepo::new();
    let rev = repo.head();
    let storage = repo.storage();
    assert!(storage.changes_between(Some(&rev), &rev, "").unwrap().is_empty());
}

// =============================================================================
// Path history
// =============================================================================

#[test]
fn last_changed_without_historian() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    let second = repo.commit_file("other.txt", "x\n", "touch other");
    let storage = repo.storage();

    assert_eq!(
        storage.last_changed(&second, "README.md", None).unwrap(),
        Some(first)
    );
    assert_eq!(
        storage.last_changed(&second, "other.txt", None).unwrap(),
        Some(second.clone())
    );
    assert_eq!(
        storage.last_changed(&second, "missing.txt", None).unwrap(),
        None
    );
}

#[test]
fn historian_resolves_paths_incrementally() {
    require_git!();
    let repo = TestRepo::new();
    let first = repo.head();
    let second = repo.commit_file("a.txt", "a\n", "touch a");
    let third = repo.commit_file("b.txt", "b\n", "touch b");
    let storage = repo.storage();

    let historian = storage.get_historian(&third, "").unwrap();
    // Queries in any order, each resolved by advancing the shared walk.
    assert_eq!(
        storage.last_changed(&third, "README.md", Some(&historian)).unwrap(),
        Some(first)
    );
    assert_eq!(
        storage.last_changed(&third, "b.txt", Some(&historian)).unwrap(),
        Some(third.clone())
    );
    assert_eq!(
        storage.last_changed(&third, "a.txt", Some(&historian)).unwrap(),
        Some(second)
    );
    // Unknown path exhausts the walk, then falls back to the one-shot
    // query, which also misses.
    assert_eq!(
        storage.last_changed(&third, "nope.txt", Some(&historian)).unwrap(),
        None
    );
}

// =============================================================================
// Blame
// =============================================================================

#[test]
fn blame_attributes_each_line() {
    require_git!();
    let repo = TestRepo::empty();
    let first = repo.commit_file("poem.txt", "one\ntwo\n", "first draft");
    let second = repo.commit_file("poem.txt", "one\ntwo\nthree\n", "extend");
    let storage = repo.storage();

    let blame = storage.blame(&second, "poem.txt").unwrap();
    assert_eq!(blame.len(), 3);
    assert_eq!(blame[0].0, first);
    assert_eq!(blame[1].0, first);
    assert_eq!(blame[2].0, second);
}

// =============================================================================
// Factory
// =============================================================================

#[test]
fn factory_shares_instances_per_path() {
    require_git!();
    let repo = TestRepo::new();
    let config = StorageConfig::new(repo.git_dir());

    let one = StorageFactory::get_or_create(config.clone(), true).unwrap();
    let two = StorageFactory::get_or_create(config, true).unwrap();
    assert!(Arc::ptr_eq(&one, &two));

    StorageFactory::forget(&repo.git_dir());
}

#[test]
fn factory_strong_retention_survives_callers() {
    require_git!();
    let repo = TestRepo::new();
    let config = StorageConfig::new(repo.git_dir());

    let held = StorageFactory::get_or_create(config.clone(), false).unwrap();
    let raw = Arc::as_ptr(&held);
    drop(held);

    // Retained: the same instance comes back after all callers released.
    let again = StorageFactory::get_or_create(config, true).unwrap();
    assert_eq!(Arc::as_ptr(&again), raw);

    // The weak call above removed the retention; releasing the last
    // handle lets the instance die.
    let probe = Arc::downgrade(&again);
    drop(again);
    assert!(probe.upgrade().is_none(), "retention should be gone");

    StorageFactory::forget(&repo.git_dir());
}

#[test]
fn persisted_cache_survives_instance_churn() {
    require_git!();
    let repo = TestRepo::new();
    let mut config = StorageConfig::new(repo.git_dir());
    config.persist_cache = true;

    let first = StorageFactory::get_or_create(config.clone(), true).unwrap();
    let snapshot = first.rev_cache().unwrap();
    drop(first);

    // The next instance starts from the handed-over snapshot instead of
    // rescanning.
    let second = StorageFactory::get_or_create(config, true).unwrap();
    let attached = second.rev_cache().unwrap();
    assert!(Arc::ptr_eq(&snapshot, &attached));

    StorageFactory::forget(&repo.git_dir());
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn close_is_idempotent_and_queries_reopen() {
    require_git!();
    let repo = TestRepo::new();
    let rev = repo.head();
    let storage = repo.storage();

    storage.commit_record(&rev).unwrap().unwrap();
    storage.close();
    storage.close();

    // Pipes reopen on demand after teardown.
    assert!(storage.cat_blob(&rev).is_err()); // kind mismatch, fresh pipe
    let record = storage.commit_record(&rev).unwrap().unwrap();
    assert_eq!(record.summary(), "Initial commit");
}
