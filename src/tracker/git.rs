//! git2-backed tracker and committer.

use super::{ChangeStats, ChangeTracker, CommitOutcome, Committer, task_message};
use crate::errors::CommitError;
use crate::util::truncate_text;
use git2::{
    Commit, Delta, DiffFormat, DiffOptions, IndexAddOption, Oid, Repository, Signature, Tree,
};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Read-only view of what changed in the working tree.
///
/// `git2::Repository` is not `Sync`, so the handle lives behind a mutex to
/// satisfy the `ChangeTracker: Send + Sync` bound.
pub struct GitTracker {
    repo: Mutex<Repository>,
}

impl std::fmt::Debug for GitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTracker").finish_non_exhaustive()
    }
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self, CommitError> {
        let repo = Repository::open(project_dir)
            .map_err(|_| CommitError::NoRepository(project_dir.display().to_string()))?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    fn head_commit(repo: &Repository) -> Option<Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    fn tree_of<'r>(repo: &'r Repository, sha: &str) -> Result<Tree<'r>, CommitError> {
        let oid = Oid::from_str(sha)?;
        Ok(repo.find_commit(oid)?.tree()?)
    }
}

impl ChangeTracker for GitTracker {
    fn head_sha(&self) -> Option<String> {
        let repo = self.repo.lock().unwrap();
        Self::head_commit(&repo).map(|c| c.id().to_string())
    }

    /// Untracked files count as added; the index is included.
    fn stats_since(&self, base_sha: &str) -> Result<ChangeStats, CommitError> {
        let repo = self.repo.lock().unwrap();
        let tree = Self::tree_of(&repo, base_sha)?;
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;

        let mut stats = ChangeStats::default();
        for delta in diff.deltas() {
            stats.files_changed += 1;
            match delta.status() {
                Delta::Added | Delta::Untracked => stats.files_added += 1,
                Delta::Deleted => stats.files_deleted += 1,
                _ => {}
            }
        }
        let totals = diff.stats()?;
        stats.insertions = totals.insertions();
        stats.deletions = totals.deletions();
        Ok(stats)
    }

    fn diff_since(&self, base_sha: &str, max_chars: usize) -> Result<String, CommitError> {
        let repo = self.repo.lock().unwrap();
        let tree = Self::tree_of(&repo, base_sha)?;
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;

        let mut buf = Vec::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => buf.push(line.origin() as u8),
                _ => {}
            }
            buf.extend_from_slice(line.content());
            true
        })?;
        Ok(truncate_text(&String::from_utf8_lossy(&buf), max_chars))
    }
}

/// Stages everything and writes one commit per request.
///
/// Tasks run one at a time, so everything dirty in the tree belongs to the
/// task being committed; stage-all keeps partial-staging mistakes out of the
/// loop.
pub struct GitCommitter {
    repo: Mutex<Repository>,
    name: String,
    email: String,
}

impl GitCommitter {
    pub fn new(project_dir: &Path) -> Result<Self, CommitError> {
        let repo = Repository::open(project_dir)
            .map_err(|_| CommitError::NoRepository(project_dir.display().to_string()))?;
        Ok(Self {
            repo: Mutex::new(repo),
            name: "foreman".to_string(),
            email: "foreman@localhost".to_string(),
        })
    }

    fn head_commit(repo: &Repository) -> Option<Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    fn commit_with_message(&self, message: &str) -> Result<CommitOutcome, CommitError> {
        let repo = self.repo.lock().unwrap();
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // update_all drops index entries whose files are gone, so the
        // commit carries deletions too.
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = Self::head_commit(&repo);
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            debug!(target: "tracker", "tree unchanged, nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let tree = repo.find_tree(tree_id)?;
        let parent_tree = match &parent {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };
        let files = repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?
            .deltas()
            .len();

        let sig = Signature::now(&self.name, &self.email)?;
        let sha = match &parent {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };
        info!(target: "tracker", sha = %sha, files, "committed");
        Ok(CommitOutcome::Committed {
            sha: sha.to_string(),
            files,
        })
    }
}

impl Committer for GitCommitter {
    fn commit_task(
        &self,
        task_id: &str,
        title: &str,
        plan_path: &Path,
    ) -> Result<CommitOutcome, CommitError> {
        debug!(target: "tracker", task = task_id, plan = %plan_path.display(), "committing task");
        self.commit_with_message(&task_message(task_id, title))
    }

    fn commit_all(&self, message: &str) -> Result<CommitOutcome, CommitError> {
        self.commit_with_message(message)
    }
}

// ===== Tests =====
