//! Per-branch state tracked by the history engine.
//!
//! A branch is born when the mapper assigns a ref to a VSS directory,
//! accumulates staged changes revision by revision, and dies when the
//! directory is deleted. A directory deleted and re-created produces a
//! second, distinct branch record.

use std::collections::BTreeMap;

use crate::file_mode::FileMode;
use crate::revision::ContentId;
use crate::scheduler::{JobId, ParentRef};

/// Lifecycle states. `Nonexistent` is represented by the absence of a
/// record; revival creates a fresh record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BranchState {
    Active,
    Deleted,
}

/// What identifies one worktree file for fast-forward and dedup purposes:
/// same content, same formatting, same mode means the same blob.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileIdent {
    pub content: ContentId,
    pub format_digest: [u8; 20],
    pub mode: FileMode,
}

/// Changes staged on a branch since its last commit.
#[derive(Clone, Debug, Default)]
pub struct PendingChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<(String, String)>,
    /// Set for worktree-shape changes that have no file list of their own
    /// (empty directory creation under a placeholder config).
    pub touched: bool,
    /// Labels applied at the current revision.
    pub labels: Vec<String>,
}

impl PendingChanges {
    pub fn has_changes(&self) -> bool {
        self.touched
            || !self.added.is_empty()
            || !self.modified.is_empty()
            || !self.deleted.is_empty()
            || !self.renamed.is_empty()
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn note_added(&mut self, path: &str) {
        if !self.added.iter().any(|p| p == path) {
            self.added.push(path.to_string());
        }
    }

    pub fn note_modified(&mut self, path: &str) {
        if self.added.iter().any(|p| p == path) {
            return;
        }
        if !self.modified.iter().any(|p| p == path) {
            self.modified.push(path.to_string());
        }
    }

    pub fn note_deleted(&mut self, path: &str) {
        // Adding then deleting within the staged window cancels out.
        if let Some(pos) = self.added.iter().position(|p| p == path) {
            self.added.remove(pos);
            self.touched = true;
            return;
        }
        self.modified.retain(|p| p != path);
        if !self.deleted.iter().any(|p| p == path) {
            self.deleted.push(path.to_string());
        }
    }

    pub fn note_renamed(&mut self, from: &str, to: &str) {
        self.renamed.push((from.to_string(), to.to_string()));
    }

    pub fn clear_changes(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.deleted.clear();
        self.renamed.clear();
        self.touched = false;
        self.labels.clear();
    }
}

/// One branch record.
#[derive(Clone, Debug)]
pub struct Branch {
    /// VSS directory this branch is mapped from.
    pub path: String,
    /// Final ref name; `None` when a `<MapRef>` suppressed emission.
    pub refname: Option<String>,
    pub revisions_ref: Option<String>,
    pub label_ref_root: String,
    pub delete_if_merged: bool,
    /// Deciding project / rule indices into the config model.
    pub project: usize,
    pub rule: usize,
    /// Projects active for this branch's path, in walk order.
    pub active_projects: Vec<usize>,

    pub created_rev: u32,
    pub deleted_rev: Option<u32>,
    pub state: BranchState,

    /// Fork point for the first commit; `None` until detection ran.
    pub parent: Option<ParentRef>,
    /// Parent detection runs once, at the first commit.
    pub parent_detected: bool,

    /// Head commit job and the revision that produced it.
    pub head_job: Option<JobId>,
    pub head_rev: u32,
    /// Per-commit (revision, job) pairs, ascending.
    pub commits: Vec<(u32, JobId)>,
    /// Worktree identity as of the head commit.
    pub head_ident: BTreeMap<String, FileIdent>,

    /// Another branch absorbed this branch's head by fast-forward.
    pub merged: bool,

    /// Carry-over message text from `<SkipCommit>` revisions.
    pub carry_over: String,

    pub pending: PendingChanges,
}

impl Branch {
    pub fn new(path: &str, created_rev: u32) -> Branch {
        Branch {
            path: path.to_string(),
            refname: None,
            revisions_ref: None,
            label_ref_root: "refs/tags/".to_string(),
            delete_if_merged: false,
            project: 0,
            rule: 0,
            active_projects: Vec::new(),
            created_rev,
            deleted_rev: None,
            state: BranchState::Active,
            parent: None,
            parent_detected: false,
            head_job: None,
            head_rev: 0,
            commits: Vec::new(),
            head_ident: BTreeMap::new(),
            merged: false,
            carry_over: String::new(),
            pending: PendingChanges::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == BranchState::Active
    }

    /// The commit job current as of revision `rev` (the last commit whose
    /// revision is <= `rev`), used by `<CopyPath FromRev>`.
    pub fn job_at_rev(&self, rev: u32) -> Option<JobId> {
        self.commits
            .iter()
            .rev()
            .find(|(commit_rev, _)| *commit_rev <= rev)
            .map(|(_, job)| *job)
    }

    /// Multiset of content ids at the head commit, for overlap detection.
    pub fn head_contents(&self) -> BTreeMap<&ContentId, usize> {
        let mut counts = BTreeMap::new();
        for ident in self.head_ident.values() {
            *counts.entry(&ident.content).or_insert(0) += 1;
        }
        counts
    }
}
