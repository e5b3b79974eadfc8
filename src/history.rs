//! The history reconstruction engine.
//!
//! A single consumer thread owns the project tree and all branch state. It
//! applies each revision's operations, allocates branches through the
//! mapper, stages per-branch change sets, and turns them into commit jobs
//! for the parallel writer. Blob bytes are fetched and formatted here, then
//! handed to the hash pool; everything downstream is content-addressed.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;

use crate::authors::AuthorsMap;
use crate::branch::{Branch, BranchState, FileIdent};
use crate::config::{ConfigModel, EditMsgRule};
use crate::content::{BlobCache, BlobKey, Claim, HashJob, HashPool};
use crate::errors::{Error, Result, Warning};
use crate::file_mode::FileMode;
use crate::format::{ContentNote, FormatSpec, IndentFormatter, PassthroughFormatter};
use crate::git::GitRepo;
use crate::log::Log;
use crate::mapper::{MapDecision, MappedBranch, Mapper};
use crate::message::{self, ChangeSummary};
use crate::oid::ObjectId;
use crate::options::RunOptions;
use crate::project_tree::{normalize_path, ProjectTree};
use crate::refname;
use crate::refs;
use crate::revision::{ChangeOp, ContentId, Revision, RevisionSource};
use crate::scheduler::{CommitJob, CommitWriter, JobFile, JobId, ParentRef};

/// End-of-run figures, also printed to the log.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub revisions_processed: u32,
    pub commits_made: usize,
    pub files_hashed: u64,
    pub bytes_hashed: u64,
    pub refs_written: usize,
    pub warning_count: usize,
}

pub struct Converter {
    options: RunOptions,
    config: ConfigModel,
    log: Log,

    mapper: Mapper,
    tree: ProjectTree,
    branches: Vec<Branch>,
    /// Active branch index by VSS directory path.
    branch_at: HashMap<String, usize>,

    repo: Arc<GitRepo>,
    cache: Arc<BlobCache>,
    pool: Option<HashPool>,
    writer: Option<CommitWriter>,
    reindenter: Box<dyn IndentFormatter>,

    authors: AuthorsMap,
    /// Bytes for content the configuration injects (no parser id exists).
    synthetic: HashMap<String, Vec<u8>>,

    tag_refs: Vec<(String, JobId)>,
    revision_refs: Vec<(String, JobId)>,
    /// Refs under an `--append-to-refs` namespace used as fork parents.
    consumed_append_refs: Vec<String>,
    /// Extracted file bytes awaiting write-out.
    extracted: Vec<(std::path::PathBuf, Vec<u8>)>,

    commits_made: usize,
    last_revision: Option<Revision>,
}

impl Converter {
    pub fn new(options: RunOptions, config: ConfigModel, mut log: Log) -> Result<Converter> {
        for warning in &config.load_warnings {
            log.warning(&Warning::Mapping(warning.clone()));
        }

        let repo = match &options.target_repo {
            Some(path) => Arc::new(GitRepo::open(path).or_else(|_| GitRepo::init(path))?),
            None => {
                // No target: convert into a scratch repository so the
                // pipeline still runs end to end (useful with --verbose and
                // --make-authors-map).
                let scratch = std::env::temp_dir()
                    .join(format!("vss2git-scratch-{}", std::process::id()));
                log.line(&format!(
                    "no --target-repository; using scratch repo {}",
                    scratch.display()
                ));
                Arc::new(GitRepo::init(&scratch)?)
            }
        };

        let cache = Arc::new(BlobCache::new());
        if let Some(path) = &options.sha1_map {
            let loaded = cache.load_sha1_map(path)?;
            if loaded > 0 {
                log.line(&format!("loaded {} sha1-map entries", loaded));
            }
        }

        let authors = match &options.authors_map {
            Some(path) => AuthorsMap::load(path)?,
            None => AuthorsMap::new(),
        };

        let pool = HashPool::new(repo.clone(), cache.clone(), options.hash_workers);
        let writer = CommitWriter::new(repo.clone(), cache.clone(), options.commit_workers);

        let mapper = Mapper::new(&options.label_ref_root, options.project_filter.clone());

        Ok(Converter {
            options,
            config,
            log,
            mapper,
            tree: ProjectTree::new(),
            branches: Vec::new(),
            branch_at: HashMap::new(),
            repo,
            cache,
            pool: Some(pool),
            writer: Some(writer),
            reindenter: Box::new(PassthroughFormatter),
            authors,
            synthetic: HashMap::new(),
            tag_refs: Vec::new(),
            revision_refs: Vec::new(),
            consumed_append_refs: Vec::new(),
            extracted: Vec::new(),
            commits_made: 0,
            last_revision: None,
        })
    }

    /// Consume the whole revision stream and finalize the target repo.
    pub fn run(mut self, source: &mut dyn RevisionSource) -> Result<RunReport> {
        let progress = self.make_progress();

        let mut processed = 0;
        while let Some(revision) = source.next_revision()? {
            if let Some(end) = self.options.end_revision {
                if revision.rev > end {
                    break;
                }
            }

            self.process_revision(&revision, source)?;
            processed += 1;

            if let Some(bar) = &progress {
                bar.set_message(format!("r{}", revision.rev));
                bar.inc(1);
            }
        }

        if let Some(bar) = &progress {
            bar.finish_and_clear();
        }

        // Changes still staged (for example after a trailing <SkipCommit>)
        // land in one final commit per branch, while content can still be
        // fetched.
        if let Some(last) = self.last_revision.clone() {
            let leftovers: Vec<usize> = (0..self.branches.len())
                .filter(|&i| {
                    self.branches[i].is_active() && self.branches[i].pending.has_changes()
                })
                .collect();
            for idx in leftovers {
                self.build_commit(idx, &last, Some(&mut *source))?;
            }
        }

        self.finish(processed)
    }

    fn make_progress(&self) -> Option<indicatif::ProgressBar> {
        if self.options.quiet {
            return None;
        }
        let period = match self.options.progress {
            Some(period) => period,
            None if console_is_tty() => 1.0,
            None => return None,
        };

        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner} {pos} revisions {msg}")
                .expect("static template"),
        );
        bar.enable_steady_tick(std::time::Duration::from_secs_f64(period.max(0.1)));
        Some(bar)
    }

    // ---- revision processing -------------------------------------------

    fn process_revision(
        &mut self,
        revision: &Revision,
        source: &mut dyn RevisionSource,
    ) -> Result<()> {
        self.log.dump_revision(revision);

        for op in revision.ops.clone() {
            if !self.passes_path_filter(op.path()) {
                continue;
            }
            self.apply_op(revision, &op, source)?;
        }

        self.apply_config_rules(revision)?;
        self.commit_round(revision, source)?;
        self.capture_extracts(revision, source)?;

        self.last_revision = Some(revision.clone());
        Ok(())
    }

    fn passes_path_filter(&self, path: &str) -> bool {
        match &self.options.path_filter {
            Some(filter) => filter.matches(normalize_path(path), false).is_some()
                || filter.matches(normalize_path(path), true).is_some(),
            None => true,
        }
    }

    fn apply_op(
        &mut self,
        revision: &Revision,
        op: &ChangeOp,
        source: &mut dyn RevisionSource,
    ) -> Result<()> {
        match op {
            ChangeOp::AddDir { path } => self.add_dir(revision, normalize_path(path)),
            ChangeOp::DeleteDir { path } => {
                self.delete_dir(revision, &normalize_path(path).to_string(), source)
            }
            ChangeOp::AddFile { path, content } => {
                let path = normalize_path(path).to_string();
                self.tree.put_file(&path, content.clone(), revision.rev);
                if let Some(owner) = self.owner_branch(&path) {
                    let rel = self.relative(owner, &path);
                    self.branches[owner].pending.note_added(&rel);
                }
                Ok(())
            }
            ChangeOp::ModifyFile { path, content } => {
                let path = normalize_path(path).to_string();
                if !self.tree.modify_file(&path, content.clone()) {
                    self.tree.put_file(&path, content.clone(), revision.rev);
                }
                if let Some(owner) = self.owner_branch(&path) {
                    let rel = self.relative(owner, &path);
                    self.branches[owner].pending.note_modified(&rel);
                }
                Ok(())
            }
            ChangeOp::DeleteFile { path } => {
                let path = normalize_path(path).to_string();
                if self.tree.delete_file(&path) {
                    if let Some(owner) = self.owner_branch(&path) {
                        let rel = self.relative(owner, &path);
                        self.branches[owner].pending.note_deleted(&rel);
                    }
                }
                Ok(())
            }
            ChangeOp::RenameFile { from, to } => {
                let from = normalize_path(from).to_string();
                let to = normalize_path(to).to_string();
                let content = match self.tree.file_content(&from).cloned() {
                    Some(content) => content,
                    None => {
                        self.warn(Warning::Mapping(format!(
                            "rename of missing file `{}` at r{}",
                            from, revision.rev
                        )));
                        return Ok(());
                    }
                };
                self.tree.delete_file(&from);
                self.tree.put_file(&to, content, revision.rev);

                let from_owner = self.owner_branch(&from);
                let to_owner = self.owner_branch(&to);
                match (from_owner, to_owner) {
                    (Some(a), Some(b)) if a == b => {
                        let rel_from = self.relative(a, &from);
                        let rel_to = self.relative(a, &to);
                        self.branches[a].pending.note_renamed(&rel_from, &rel_to);
                    }
                    _ => {
                        if let Some(a) = from_owner {
                            let rel = self.relative(a, &from);
                            self.branches[a].pending.note_deleted(&rel);
                        }
                        if let Some(b) = to_owner {
                            let rel = self.relative(b, &to);
                            self.branches[b].pending.note_added(&rel);
                        }
                    }
                }
                Ok(())
            }
            ChangeOp::ShareFile { from, to } => {
                let from = normalize_path(from).to_string();
                let to = normalize_path(to).to_string();
                match self.tree.file_content(&from).cloned() {
                    Some(content) => {
                        self.tree.put_file(&to, content, revision.rev);
                        if let Some(owner) = self.owner_branch(&to) {
                            let rel = self.relative(owner, &to);
                            self.branches[owner].pending.note_added(&rel);
                        }
                    }
                    None => self.warn(Warning::Mapping(format!(
                        "share of missing file `{}` at r{}",
                        from, revision.rev
                    ))),
                }
                Ok(())
            }
            ChangeOp::Label { path, label } => {
                let path = normalize_path(path).to_string();
                let target = self
                    .branch_at
                    .get(&path)
                    .copied()
                    .or_else(|| self.owner_branch(&path));
                match target {
                    Some(idx) => self.branches[idx].pending.labels.push(label.clone()),
                    None => self.warn(Warning::Mapping(format!(
                        "label `{}` on unmapped path `{}` at r{}",
                        label, path, revision.rev
                    ))),
                }
                Ok(())
            }
        }
    }

    fn add_dir(&mut self, revision: &Revision, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let path = path.to_string();
        self.tree.add_dir(&path, revision.rev);

        if let Some(owner) = self.owner_branch(&path) {
            // Inner directory of an existing branch; only matters when a
            // placeholder would have to represent it.
            if self.placeholder_for(owner).is_some() {
                self.branches[owner].pending.touched = true;
            }
            return Ok(());
        }

        let mut warnings = Vec::new();
        let decision = self.mapper.map_directory(&self.config, &path, &mut warnings);
        for warning in warnings {
            self.warn(warning);
        }

        if let MapDecision::Mapped(mapped) = decision {
            self.create_branch(revision, &path, mapped);
        }
        Ok(())
    }

    fn create_branch(&mut self, revision: &Revision, path: &str, mapped: MappedBranch) {
        let mut branch = Branch::new(path, revision.rev);
        branch.refname = mapped.refname;
        branch.revisions_ref = mapped.revisions_ref;
        branch.label_ref_root = mapped.label_ref_root;
        branch.delete_if_merged = mapped.delete_if_merged;
        branch.project = mapped.project;
        branch.rule = mapped.rule;
        branch.active_projects = self.mapper.active_projects(&self.config, path);

        // Configuration-injected files enter the tree like parser content.
        let injections: Vec<(String, Vec<u8>)> = self.config.projects[mapped.project].map_rules
            [mapped.rule]
            .inject_files
            .iter()
            .map(|rule| (rule.path.clone(), rule.data.clone()))
            .collect();
        for (rel, data) in injections {
            let content = self.synthetic_content(&data);
            let full = format!("{}/{}", path, rel);
            self.tree.put_file(&full, content, revision.rev);
            branch.pending.note_added(&rel);
        }

        if self.log.verbosity.revs {
            self.log.line(&format!(
                "r{}: branch `{}` -> {}",
                revision.rev,
                path,
                branch.refname.as_deref().unwrap_or("(no ref)")
            ));
        }

        let idx = self.branches.len();
        self.branches.push(branch);
        self.branch_at.insert(path.to_string(), idx);
    }

    fn delete_dir(
        &mut self,
        revision: &Revision,
        path: &str,
        source: &mut dyn RevisionSource,
    ) -> Result<()> {
        // Branches rooted at or below the deleted directory die with it.
        let prefix = format!("{}/", path);
        let doomed: Vec<usize> = self
            .branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_active() && (b.path == *path || b.path.starts_with(&prefix)))
            .map(|(i, _)| i)
            .collect();
        for idx in doomed {
            self.delete_branch(idx, revision, source)?;
        }

        // Content deleted inside a surviving branch becomes staged removals.
        if let Some(owner) = self.owner_branch(path) {
            for (rel_under, _) in self.tree.files_under(path) {
                let full = format!("{}/{}", path, rel_under);
                let rel = self.relative(owner, &full);
                self.branches[owner].pending.note_deleted(&rel);
            }
        }

        self.tree.delete_dir(path);
        Ok(())
    }

    fn delete_branch(
        &mut self,
        idx: usize,
        revision: &Revision,
        source: &mut dyn RevisionSource,
    ) -> Result<()> {
        if self.branches[idx].pending.has_changes() {
            // Deletion is not a commit of its own, but staged changes must
            // land before the head is sealed.
            self.build_commit(idx, revision, Some(source))?;
        } else if self.branches[idx].pending.has_labels() {
            self.emit_labels_at_head(idx, revision);
        }

        let branch = &mut self.branches[idx];
        branch.state = BranchState::Deleted;
        branch.deleted_rev = Some(revision.rev);
        self.branch_at.remove(&branch.path.clone());

        if self.log.verbosity.revs {
            let path = self.branches[idx].path.clone();
            self.log
                .line(&format!("r{}: branch `{}` deleted", revision.rev, path));
        }
        Ok(())
    }

    // ---- per-revision configuration rules ------------------------------

    fn apply_config_rules(&mut self, revision: &Revision) -> Result<()> {
        // <AddFile>: config-supplied files entering matching projects.
        for p in 0..self.config.projects.len() {
            for r in 0..self.config.projects[p].add_files.len() {
                let rule = &self.config.projects[p].add_files[r];
                if !rule_matches_revision(&rule.revs, &rule.rev_id, revision) {
                    continue;
                }
                let path = normalize_path(&rule.path).to_string();
                let data = rule.data.clone();
                let content = self.synthetic_content(&data);
                self.tree.put_file(&path, content, revision.rev);
                if let Some(owner) = self.owner_branch(&path) {
                    let rel = self.relative(owner, &path);
                    self.branches[owner].pending.note_added(&rel);
                }
            }
        }

        // <DeletePath>: drop matching files from every active branch.
        // Branches walk in creation order, keeping runs deterministic.
        let mut deletions: Vec<(usize, String, String)> = Vec::new();
        for project in &self.config.projects {
            for rule in &project.delete_paths {
                if !rule_matches_revision(&rule.revs, &rule.rev_id, revision) {
                    continue;
                }
                for (idx, branch) in self.branches.iter().enumerate() {
                    if !branch.is_active() {
                        continue;
                    }
                    for (rel, _) in self.tree.files_under(&branch.path) {
                        let full = format!("{}/{}", branch.path, rel);
                        if rule.pattern.matches(&full, false).is_some() {
                            deletions.push((idx, full, rel));
                        }
                    }
                }
            }
        }
        for (idx, full, rel) in deletions {
            if self.tree.delete_file(&full) {
                self.branches[idx].pending.note_deleted(&rel);
            }
        }

        Ok(())
    }

    // ---- commit emission -----------------------------------------------

    fn commit_round(&mut self, revision: &Revision, source: &mut dyn RevisionSource) -> Result<()> {
        let candidates: Vec<usize> = (0..self.branches.len())
            .filter(|&i| {
                self.branches[i].is_active()
                    && (self.branches[i].pending.has_changes()
                        || self.branches[i].pending.has_labels())
            })
            .collect();

        for idx in candidates {
            let has_changes = self.branches[idx].pending.has_changes();
            let has_labels = self.branches[idx].pending.has_labels();

            if !has_changes {
                // Labels without content changes tag the current head.
                self.emit_labels_at_head(idx, revision);
                continue;
            }

            let merge_parents = self.merge_parent_jobs(idx, revision);
            if self.should_skip(idx, revision) {
                if has_labels {
                    self.warn(Warning::Mapping(format!(
                        "<SkipCommit> matched labeled revision r{}; ignored",
                        revision.rev
                    )));
                } else if merge_parents.is_empty() {
                    self.carry_over_message(idx, revision);
                    continue;
                }
            }

            self.build_commit(idx, revision, Some(&mut *source))?;
        }
        Ok(())
    }

    fn should_skip(&self, idx: usize, revision: &Revision) -> bool {
        self.branches[idx].active_projects.iter().any(|&p| {
            self.config.projects[p]
                .skip_commits
                .iter()
                .any(|rule| rule_matches_revision(&rule.revs, &rule.rev_id, revision))
        })
    }

    /// The edited message of a skipped revision joins the carry-over
    /// buffer; the staged changes stay put for the next commit.
    fn carry_over_message(&mut self, idx: usize, revision: &Revision) {
        let summary = self.pending_summary(idx);
        let chain = self.edit_chain(idx);
        let edited = message::assemble(&revision.message, revision.rev, &chain, &summary);

        let branch = &mut self.branches[idx];
        if !edited.is_empty() {
            if !branch.carry_over.is_empty() {
                branch.carry_over.push('\n');
            }
            branch.carry_over.push_str(&edited);
        }

        if self.log.verbosity.revs {
            let path = self.branches[idx].path.clone();
            self.log
                .line(&format!("r{}: `{}` commit skipped", revision.rev, path));
        }
    }

    fn emit_labels_at_head(&mut self, idx: usize, revision: &Revision) {
        let labels = std::mem::take(&mut self.branches[idx].pending.labels);
        match self.branches[idx].head_job {
            Some(job) => {
                for label in labels {
                    self.emit_label(idx, &label, job);
                }
            }
            None => self.warn(Warning::Mapping(format!(
                "label on branch `{}` before its first commit at r{}",
                self.branches[idx].path, revision.rev
            ))),
        }
    }

    fn emit_label(&mut self, idx: usize, label: &str, job: JobId) {
        let branch = &self.branches[idx];

        // <Replace> applies to the label component, not the root.
        let mut text = label.to_string();
        for &p in &branch.active_projects {
            for (from, to) in &self.config.projects[p].replaces {
                text = text.replace(from.as_str(), to.as_str());
            }
        }
        let text = refname::scrub(&text);

        let root = branch.label_ref_root.trim_end_matches('/');
        let tag_ref = format!("{}/{}", root, text);
        let claim_key = format!("{}#label={}", branch.path, label);

        let mut warnings = Vec::new();
        if let Some(unique) = self.mapper.claim_unique(&tag_ref, &claim_key, &mut warnings) {
            self.tag_refs.push((unique, job));
        }
        for warning in warnings {
            self.warn(warning);
        }
    }

    fn build_commit(
        &mut self,
        idx: usize,
        revision: &Revision,
        source: Option<&mut dyn RevisionSource>,
    ) -> Result<()> {
        let snapshot = self.snapshot_worktree(idx);

        // Fork-point detection runs once, before the first commit.
        if self.branches[idx].head_job.is_none() && !self.branches[idx].parent_detected {
            self.detect_fork_parent(idx, &snapshot)?;
        }

        let merge_parents = self.merge_parent_jobs(idx, revision);

        // Fast-forward instead of committing an identical tree.
        if let Some(ff_job) = self.fast_forward_target(idx, &snapshot) {
            let labels = std::mem::take(&mut self.branches[idx].pending.labels);
            let branch = &mut self.branches[idx];
            branch.head_job = Some(ff_job);
            branch.head_rev = revision.rev;
            branch.commits.push((revision.rev, ff_job));
            branch.head_ident = snapshot;
            branch.pending.clear_changes();
            for label in labels {
                self.emit_label(idx, &label, ff_job);
            }
            if self.log.verbosity.commits {
                let path = self.branches[idx].path.clone();
                self.log
                    .line(&format!("r{}: `{}` fast-forwarded", revision.rev, path));
            }
            return Ok(());
        }

        // Resolve blobs for the snapshot.
        let attrs_digest = attributes_digest(&snapshot);
        let mut files = Vec::with_capacity(snapshot.len());
        for (rel, ident) in &snapshot {
            let key = BlobKey::new(&ident.content, &ident.format_digest, rel, &attrs_digest);
            if self.cache.claim(key) == Claim::MustHash {
                let data = self.fetch_content(&ident.content, source.as_deref())?;
                let spec = self.format_spec_for(idx, rel);
                let data = if spec.is_noop() {
                    data
                } else {
                    let (formatted, notes) = spec.apply(&data, self.reindenter.as_ref());
                    for note in notes {
                        self.content_warning(rel, note);
                    }
                    formatted
                };
                if let Some(pool) = &self.pool {
                    pool.submit(HashJob {
                        key,
                        data,
                        path: rel.clone(),
                    });
                }
            }
            files.push(JobFile {
                path: rel.clone(),
                mode: ident.mode,
                key,
            });
        }

        // Parents: previous commit on this branch, else the fork point;
        // plus explicit merge links.
        let mut parents = Vec::new();
        let mut deps = Vec::new();
        match self.branches[idx].head_job {
            Some(job) => {
                parents.push(ParentRef::Job(job));
                deps.push(job);
            }
            None => {
                if let Some(parent) = self.branches[idx].parent {
                    parents.push(parent);
                    if let ParentRef::Job(job) = parent {
                        deps.push(job);
                    }
                }
            }
        }
        for job in merge_parents {
            if !parents.contains(&ParentRef::Job(job)) {
                parents.push(ParentRef::Job(job));
                deps.push(job);
            }
        }

        // Message assembly.
        let summary = self.pending_summary(idx);
        let chain = self.edit_chain(idx);
        let assembled = message::assemble(&revision.message, revision.rev, &chain, &summary);
        let carry = std::mem::take(&mut self.branches[idx].carry_over);
        let final_message = message::prepend_carry_over(&assembled, &carry);

        let (author_name, author_email) = self.authors.resolve(&revision.author);
        let author =
            crate::attribution::Attribution::new(&author_name, &author_email, revision.timestamp);

        let branch_ref = self.branches[idx]
            .refname
            .clone()
            .unwrap_or_else(|| format!("({})", self.branches[idx].path));

        let job = CommitJob {
            branch: branch_ref.clone(),
            rev: revision.rev,
            files,
            parents,
            message: final_message.clone(),
            author: author.clone(),
            committer: author,
            decorations: self.options.decorations,
        };

        let writer = self.writer.as_ref().expect("writer lives until finish");
        let job_id = writer.add_job(job, &deps);
        self.commits_made += 1;

        let labels = std::mem::take(&mut self.branches[idx].pending.labels);
        {
            let branch = &mut self.branches[idx];
            branch.head_job = Some(job_id);
            branch.head_rev = revision.rev;
            branch.commits.push((revision.rev, job_id));
            branch.head_ident = snapshot;
            branch.pending.clear_changes();
        }

        for label in labels {
            self.emit_label(idx, &label, job_id);
        }

        if self.options.create_revision_refs {
            if let Some(rref) = self.branches[idx].revisions_ref.clone() {
                self.revision_refs
                    .push((format!("{}/r{}", rref, revision.rev), job_id));
            }
        }

        self.log.commit_note(
            &branch_ref,
            revision.rev,
            final_message.lines().next().unwrap_or(""),
        );
        Ok(())
    }

    /// Build the branch's full worktree identity snapshot.
    fn snapshot_worktree(&mut self, idx: usize) -> BTreeMap<String, FileIdent> {
        let branch_path = self.branches[idx].path.clone();
        let mut snapshot = BTreeMap::new();

        for (rel, content) in self.tree.files_under(&branch_path) {
            if self.is_ignored(idx, &rel) {
                continue;
            }
            let spec = self.format_spec_for(idx, &rel);
            let mode = self.mode_for(idx, &rel);
            snapshot.insert(
                rel,
                FileIdent {
                    content,
                    format_digest: spec.digest(),
                    mode,
                },
            );
        }

        if let Some(placeholder) = self.placeholder_for(idx) {
            let empty = self.synthetic_content(b"");
            for dir in self.tree.empty_dirs_under(&branch_path) {
                let rel = format!("{}/{}", dir, placeholder);
                snapshot.entry(rel).or_insert(FileIdent {
                    content: empty.clone(),
                    format_digest: FormatSpec::default().digest(),
                    mode: FileMode::Normal,
                });
            }
        }

        snapshot
    }

    fn is_ignored(&self, idx: usize, rel: &str) -> bool {
        self.branches[idx].active_projects.iter().any(|&p| {
            self.config.projects[p]
                .ignore_files
                .iter()
                .any(|pattern| pattern.matches(rel, false).is_some())
        })
    }

    fn mode_for(&self, idx: usize, rel: &str) -> FileMode {
        for &p in &self.branches[idx].active_projects {
            for rule in &self.config.projects[p].chmods {
                if rule.pattern.matches(rel, false).is_some() {
                    return rule.mode;
                }
            }
        }
        FileMode::Normal
    }

    /// The effective formatting for a worktree file: MapPath-scope rules
    /// first, then the active projects'. The first rule whose `<Path>`
    /// matches and whose `<NoReindent>` does not wins.
    fn format_spec_for(&self, idx: usize, rel: &str) -> FormatSpec {
        let branch = &self.branches[idx];
        let rule_formatting = &self.config.projects[branch.project].map_rules[branch.rule]
            .formatting;

        let project_formatting = branch
            .active_projects
            .iter()
            .flat_map(|&p| self.config.projects[p].formatting.iter());

        for rule in rule_formatting.iter().chain(project_formatting) {
            if rule.pattern.matches(rel, false).is_none() {
                continue;
            }
            if let Some(no_reindent) = &rule.no_reindent {
                if no_reindent.matches(rel, false).is_some() {
                    continue;
                }
            }

            let mut spec = rule.spec.clone();
            if self.options.no_indent_reformat {
                spec.reindent = false;
            }
            if self.options.retab_only {
                spec.reindent = false;
            }
            return spec;
        }

        FormatSpec::default()
    }

    fn placeholder_for(&self, idx: usize) -> Option<String> {
        let branch = &self.branches[idx];
        let rule = &self.config.projects[branch.project].map_rules[branch.rule];
        if let Some(name) = &rule.empty_dir_placeholder {
            return Some(name.clone());
        }
        branch
            .active_projects
            .iter()
            .find_map(|&p| self.config.projects[p].empty_dir_placeholder.clone())
    }

    fn pending_summary(&self, idx: usize) -> ChangeSummary {
        let pending = &self.branches[idx].pending;
        ChangeSummary {
            added: pending.added.clone(),
            modified: pending.modified.clone(),
            deleted: pending.deleted.clone(),
            renamed: pending.renamed.clone(),
        }
    }

    fn edit_chain(&self, idx: usize) -> Vec<&EditMsgRule> {
        let branch = &self.branches[idx];
        let mut chain: Vec<&EditMsgRule> = self.config.projects[branch.project].map_rules
            [branch.rule]
            .edit_msgs
            .iter()
            .collect();
        for &p in &branch.active_projects {
            chain.extend(self.config.projects[p].edit_msgs.iter());
        }
        chain
    }

    // ---- parent detection and fast-forward -----------------------------

    fn detect_fork_parent(
        &mut self,
        idx: usize,
        snapshot: &BTreeMap<String, FileIdent>,
    ) -> Result<()> {
        self.branches[idx].parent_detected = true;

        // <CopyPath> overrides detection with an explicit link.
        for &p in &self.branches[idx].active_projects.clone() {
            for rule in &self.config.projects[p].copy_paths.clone() {
                if normalize_path(&rule.path) != self.branches[idx].path {
                    continue;
                }
                let from = normalize_path(&rule.from_path).to_string();
                let source_idx = self.latest_branch_record(&from);
                let job = source_idx.and_then(|i| match rule.from_rev {
                    Some(rev) => self.branches[i].job_at_rev(rev),
                    None => self.branches[i].head_job,
                });
                match job {
                    Some(job) => {
                        self.branches[idx].parent = Some(ParentRef::Job(job));
                        return Ok(());
                    }
                    None => self.warn(Warning::Mapping(format!(
                        "<CopyPath> source `{}` has no commit to fork from",
                        from
                    ))),
                }
            }
        }

        // Content overlap against every active branch head. The branch
        // with the best overlap of at least half our files (and one shared
        // file) becomes the fork point.
        let mut my_contents: BTreeMap<&ContentId, usize> = BTreeMap::new();
        for ident in snapshot.values() {
            *my_contents.entry(&ident.content).or_insert(0) += 1;
        }
        let total: usize = my_contents.values().sum();

        let mut best: Option<(usize, u32, String, JobId)> = None;
        if total > 0 {
            for (i, other) in self.branches.iter().enumerate() {
                if i == idx || !other.is_active() {
                    continue;
                }
                let head_job = match other.head_job {
                    Some(job) => job,
                    None => continue,
                };

                let other_contents = other.head_contents();
                let overlap: usize = my_contents
                    .iter()
                    .map(|(content, count)| {
                        other_contents.get(*content).copied().unwrap_or(0).min(*count)
                    })
                    .sum();

                if overlap == 0 || overlap * 2 < total {
                    continue;
                }

                let refname = other.refname.as_deref().unwrap_or("").to_string();
                let better = match &best {
                    None => true,
                    Some((best_overlap, best_rev, best_ref, _)) => {
                        (overlap, other.head_rev) > (*best_overlap, *best_rev)
                            || (overlap == *best_overlap
                                && other.head_rev == *best_rev
                                && refname < *best_ref)
                    }
                };
                if better {
                    best = Some((overlap, other.head_rev, refname, head_job));
                }
            }
        }

        if let Some((_, _, _, job)) = best {
            self.branches[idx].parent = Some(ParentRef::Job(job));
            return Ok(());
        }

        // Still rootless: an --append-to-refs namespace may hold the
        // previous conversion's head to reparent onto.
        if let Some(refname) = self.branches[idx].refname.clone() {
            let suffix = refname.strip_prefix("refs/").unwrap_or(&refname);
            for ns in &self.options.append_to_refs.clone() {
                let candidate = format!("{}/{}", ns.trim_end_matches('/'), suffix);
                if let Some(id) = self.repo.resolve_ref(&candidate)? {
                    self.branches[idx].parent = Some(ParentRef::Existing(id));
                    self.consumed_append_refs.push(candidate);
                    break;
                }
            }
        }

        Ok(())
    }

    /// The newest branch record for a path, active or not.
    fn latest_branch_record(&self, path: &str) -> Option<usize> {
        self.branches
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| b.path == path)
            .map(|(i, _)| i)
    }

    fn merge_parent_jobs(&self, idx: usize, revision: &Revision) -> Vec<JobId> {
        let mut jobs = Vec::new();
        for &p in &self.branches[idx].active_projects {
            for rule in &self.config.projects[p].merge_paths {
                if normalize_path(&rule.path) != self.branches[idx].path {
                    continue;
                }
                if !rule.revs.is_empty() && !rule.revs.contains(revision.rev) {
                    continue;
                }
                let from = normalize_path(&rule.from_path).to_string();
                if let Some(i) = self.latest_branch_record(&from) {
                    if let Some(job) = self.branches[i].head_job {
                        jobs.push(job);
                    }
                }
            }
        }
        jobs
    }

    /// A commit whose tree would equal the head tree of a branch that
    /// forked from this branch's head (a descendant-in-waiting) is a merge
    /// back: the branch fast-forwards onto that head instead of writing a
    /// duplicate commit.
    fn fast_forward_target(
        &mut self,
        idx: usize,
        snapshot: &BTreeMap<String, FileIdent>,
    ) -> Option<JobId> {
        if snapshot.is_empty() || self.branches[idx].head_job.is_none() {
            return None;
        }

        let my_head = self.branches[idx].head_job;
        let mut target: Option<(usize, JobId)> = None;
        for (i, other) in self.branches.iter().enumerate() {
            if i == idx || !other.is_active() {
                continue;
            }
            let other_job = match other.head_job {
                Some(job) => job,
                None => continue,
            };
            let forked_from_us = match other.parent {
                Some(ParentRef::Job(job)) => my_head == Some(job),
                _ => false,
            };
            if forked_from_us && other.head_ident == *snapshot {
                target = Some((i, other_job));
                break;
            }
        }

        if let Some((i, job)) = target {
            self.branches[i].merged = true;
            return Some(job);
        }
        None
    }

    // ---- content handling ----------------------------------------------

    /// Register config-supplied bytes under a synthetic content id.
    fn synthetic_content(&mut self, data: &[u8]) -> ContentId {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest: [u8; 20] = hasher.finalize().into();
        let id = format!("cfg:{}", ObjectId::from_raw(digest));
        self.synthetic.insert(id.clone(), data.to_vec());
        ContentId::new(&id)
    }

    fn fetch_content(
        &self,
        content: &ContentId,
        source: Option<&dyn RevisionSource>,
    ) -> Result<Vec<u8>> {
        if let Some(data) = self.synthetic.get(content.as_str()) {
            return Ok(data.clone());
        }
        match source {
            Some(source) => Ok(source.fetch(content)?),
            None => Err(Error::Parser(crate::errors::ParserError::MissingContent {
                id: content.as_str().to_string(),
            })),
        }
    }

    fn content_warning(&mut self, path: &str, note: ContentNote) {
        let text = match note {
            ContentNote::LoneCr => format!("`{}` contains a stray CR character", path),
            ContentNote::MissingFinalEol => format!("`{}` ends without EOL", path),
        };
        self.log.format_note(path, &text);
        self.warn(Warning::Content(text));
    }

    // ---- helpers -------------------------------------------------------

    fn owner_branch(&self, path: &str) -> Option<usize> {
        for (i, c) in path.char_indices().rev() {
            if c == '/' {
                if let Some(&idx) = self.branch_at.get(&path[..i]) {
                    if self.branches[idx].is_active() {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    fn relative(&self, idx: usize, full: &str) -> String {
        let base = &self.branches[idx].path;
        full.strip_prefix(base.as_str())
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| full.to_string())
    }

    fn warn(&mut self, warning: Warning) {
        self.log.warning(&warning);
    }

    fn capture_extracts(
        &mut self,
        revision: &Revision,
        source: &mut dyn RevisionSource,
    ) -> Result<()> {
        let requests: Vec<_> = self
            .options
            .extract_files
            .iter()
            .filter(|x| x.rev == revision.rev)
            .cloned()
            .collect();

        for request in requests {
            match self.tree.file_content(normalize_path(&request.path)).cloned() {
                Some(content) => {
                    let data = self.fetch_content(&content, Some(&*source))?;
                    self.extracted.push((request.dest.clone(), data));
                }
                None => self.warn(Warning::Mapping(format!(
                    "--extract-file: `{}` does not exist at r{}",
                    request.path, request.rev
                ))),
            }
        }
        Ok(())
    }

    // ---- finalization --------------------------------------------------

    fn finish(mut self, processed: u32) -> Result<RunReport> {
        if let Some(path) = &self.options.make_authors_map {
            self.authors.write_template(path)?;
        }
        let unmapped_authors = self
            .authors
            .unmapped()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        if !unmapped_authors.is_empty() {
            self.log.line(&format!(
                "Authors without map entries: {}",
                unmapped_authors.join(", ")
            ));
        }

        // Settle every commit; keep the sha1-map even if writing failed.
        let writer = self.writer.take().expect("writer set in new");
        let results = writer.finish();
        let (files_hashed, bytes_hashed) =
            self.pool.take().expect("pool set in new").finish();

        if let Some(path) = &self.options.sha1_map {
            self.cache.save_sha1_map(path)?;
        }
        let results = results?;

        for (dest, data) in &self.extracted {
            fs::write(dest, data)?;
        }

        let produced = self.collect_refs(&results);
        let prune = self.prune_namespaces();
        let refs_written = refs::finalize(
            &self.repo,
            &produced,
            &self.consumed_append_refs,
            &self.options.append_to_refs,
            &prune,
        )?;

        let report = RunReport {
            revisions_processed: processed,
            commits_made: self.commits_made,
            files_hashed,
            bytes_hashed,
            refs_written,
            warning_count: self.log.warning_count(),
        };

        self.log.line(&format!(
            "Git hash-object invoked: {} times, {} MiB hashed",
            report.files_hashed,
            report.bytes_hashed / 0x100000
        ));
        self.log
            .line(&format!("Git commits made: {}", report.commits_made));
        self.log
            .line(&format!("Refs written: {}", report.refs_written));
        self.log.flush();

        Ok(report)
    }

    /// Final (refname, commit) write-set: branch heads, deleted-branch
    /// keepsakes, labels, revision refs.
    fn collect_refs(&mut self, results: &[ObjectId]) -> Vec<(String, ObjectId)> {
        let mut produced = Vec::new();

        for branch in &self.branches {
            let refname = match &branch.refname {
                Some(refname) => refname.clone(),
                None => continue,
            };
            let head = match branch.head_job {
                Some(job) => results[job],
                None => continue,
            };

            match branch.state {
                BranchState::Active => {
                    if branch.merged && branch.delete_if_merged {
                        continue;
                    }
                    produced.push((refname, head));
                }
                BranchState::Deleted => {
                    if branch.merged {
                        continue;
                    }
                    let rev = branch.deleted_rev.unwrap_or(branch.head_rev);
                    produced.push((format!("{}_deleted@r{}", refname, rev), head));
                }
            }
        }

        for (refname, job) in &self.tag_refs {
            produced.push((refname.clone(), results[*job]));
        }
        for (refname, job) in &self.revision_refs {
            produced.push((refname.clone(), results[*job]));
        }

        produced
    }

    fn prune_namespaces(&self) -> Vec<String> {
        let mut namespaces = self.options.prune_namespaces();
        for project in &self.config.projects {
            for ns in &project.prune_refs {
                let ns = ns.strip_prefix("refs/").unwrap_or(ns);
                let ns = format!("{}/", ns.trim_end_matches('/'));
                if !namespaces.contains(&ns) {
                    namespaces.push(ns);
                }
            }
        }
        namespaces
    }
}

fn rule_matches_revision(
    revs: &crate::rev_ranges::RevRanges,
    rev_id: &Option<String>,
    revision: &Revision,
) -> bool {
    if revs.contains(revision.rev) {
        return true;
    }
    match (rev_id, &revision.rev_id) {
        (Some(want), Some(have)) => want == have,
        _ => false,
    }
}

/// Digest of the `.gitattributes` context a snapshot carries: contents of
/// every `.gitattributes` file, keyed by its place in the tree.
fn attributes_digest(snapshot: &BTreeMap<String, FileIdent>) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();

    for (path, ident) in snapshot {
        if path == ".gitattributes" || path.ends_with("/.gitattributes") {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(ident.content.as_str().as_bytes());
            hasher.update(b"\0");
        }
    }

    hasher.finalize().into()
}

fn console_is_tty() -> bool {
    // indicatif draws to stderr; it knows whether that is a terminal.
    !indicatif::ProgressDrawTarget::stderr().is_hidden()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_digest_reacts_to_gitattributes_only() {
        let ident = |content: &str| FileIdent {
            content: ContentId::new(content),
            format_digest: [0; 20],
            mode: FileMode::Normal,
        };

        let mut a = BTreeMap::new();
        a.insert("src/main.c".to_string(), ident("c1"));
        let mut b = a.clone();
        b.insert("src/other.c".to_string(), ident("c2"));
        // Plain files do not change the attributes context.
        assert_eq!(attributes_digest(&a), attributes_digest(&b));

        let mut c = a.clone();
        c.insert(".gitattributes".to_string(), ident("c3"));
        assert_ne!(attributes_digest(&a), attributes_digest(&c));

        let mut d = a.clone();
        d.insert("sub/.gitattributes".to_string(), ident("c3"));
        assert_ne!(attributes_digest(&c), attributes_digest(&d));
    }

    #[test]
    fn rule_revision_matching() {
        let revision = Revision {
            rev: 7,
            rev_id: Some("1234".to_string()),
            author: "kim".to_string(),
            timestamp: 0,
            message: String::new(),
            ops: Vec::new(),
        };

        let revs = crate::rev_ranges::RevRanges::parse("5-9").unwrap();
        assert!(rule_matches_revision(&revs, &None, &revision));

        let none = crate::rev_ranges::RevRanges::default();
        assert!(!rule_matches_revision(&none, &None, &revision));
        assert!(rule_matches_revision(
            &none,
            &Some("1234".to_string()),
            &revision
        ));
        assert!(!rule_matches_revision(
            &none,
            &Some("9999".to_string()),
            &revision
        ));
    }
}
