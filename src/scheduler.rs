//! Dependency-ordered, parallel commit writing.
//!
//! The revision stream consumer produces commit jobs; each job depends on
//! the previous commit of its branch and on any parent commits from other
//! branches. The scheduler keeps the dependency graph and hands ready jobs
//! to a bounded pool of writer threads. Commits on one branch are thereby
//! serialized while distinct branches commit in parallel.
//!
//! A job may not run until all of its parent commits are written and all of
//! its blob hashes are known; the first condition is a graph edge, the
//! second is enforced by blocking on the blob cache.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;

use crate::attribution::Attribution;
use crate::content::{BlobCache, BlobKey};
use crate::errors::Error;
use crate::file_mode::FileMode;
use crate::git::{GitRepo, IndexEntry};
use crate::message::{self, Decorations};
use crate::oid::ObjectId;

pub type JobId = usize;

/// A commit parent: either another job in this run or a commit that
/// already exists in the target repository.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParentRef {
    Job(JobId),
    Existing(ObjectId),
}

/// One file of the commit's worktree snapshot.
#[derive(Clone, Debug)]
pub struct JobFile {
    pub path: String,
    pub mode: FileMode,
    pub key: BlobKey,
}

/// Everything needed to write one commit once its dependencies settle.
#[derive(Clone, Debug)]
pub struct CommitJob {
    /// Branch ref for diagnostics.
    pub branch: String,
    pub rev: u32,
    pub files: Vec<JobFile>,
    pub parents: Vec<ParentRef>,
    pub message: String,
    pub author: Attribution,
    pub committer: Attribution,
    pub decorations: Decorations,
}

struct JobSlot {
    job: Option<CommitJob>,
    deps_remaining: usize,
    dependents: Vec<JobId>,
    result: Option<ObjectId>,
}

#[derive(Default)]
struct Graph {
    slots: Vec<JobSlot>,
    outstanding: usize,
    failure: Option<String>,
}

struct Shared {
    graph: Mutex<Graph>,
    settled: Condvar,
}

enum Msg {
    Run(JobId),
    Stop,
}

/// The commit writer pool.
pub struct CommitWriter {
    shared: Arc<Shared>,
    ready_tx: chan::Sender<Msg>,
    workers: Vec<JoinHandle<()>>,
}

impl CommitWriter {
    pub fn new(repo: Arc<GitRepo>, cache: Arc<BlobCache>, worker_count: usize) -> CommitWriter {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            graph: Mutex::new(Graph::default()),
            settled: Condvar::new(),
        });
        let (ready_tx, ready_rx) = chan::unbounded::<Msg>();

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = shared.clone();
            let ready_rx = ready_rx.clone();
            let ready_tx = ready_tx.clone();
            let repo = repo.clone();
            let cache = cache.clone();

            workers.push(thread::spawn(move || {
                for msg in ready_rx.iter() {
                    match msg {
                        Msg::Run(id) => run_job(&shared, &ready_tx, &repo, &cache, id),
                        Msg::Stop => break,
                    }
                }
            }));
        }

        CommitWriter {
            shared,
            ready_tx,
            workers,
        }
    }

    /// Register a job. `deps` are jobs that must be written first; parent
    /// jobs referenced by `ParentRef::Job` must be listed.
    pub fn add_job(&self, job: CommitJob, deps: &[JobId]) -> JobId {
        let mut graph = self.shared.graph.lock().unwrap();
        let id = graph.slots.len();

        let mut deps_remaining = 0;
        let mut seen: Vec<JobId> = Vec::with_capacity(deps.len());
        for &dep in deps {
            if seen.contains(&dep) {
                continue;
            }
            seen.push(dep);
            // A dep that already settled imposes no wait.
            if graph.slots[dep].result.is_none() {
                graph.slots[dep].dependents.push(id);
                deps_remaining += 1;
            }
        }

        graph.slots.push(JobSlot {
            job: Some(job),
            deps_remaining,
            dependents: Vec::new(),
            result: None,
        });
        graph.outstanding += 1;

        if deps_remaining == 0 {
            let _ = self.ready_tx.send(Msg::Run(id));
        }

        id
    }

    /// Wait until every registered job is settled, then stop the workers.
    /// Returns per-job commit ids, in registration order.
    pub fn finish(mut self) -> Result<Vec<ObjectId>, Error> {
        {
            let mut graph = self.shared.graph.lock().unwrap();
            while graph.outstanding > 0 && graph.failure.is_none() {
                graph = self.shared.settled.wait(graph).unwrap();
            }
        }

        for _ in 0..self.workers.len() {
            let _ = self.ready_tx.send(Msg::Stop);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let graph = self.shared.graph.lock().unwrap();
        if let Some(detail) = &graph.failure {
            return Err(Error::Git(crate::errors::GitError::Exit {
                cmd: detail.clone(),
                code: 1,
            }));
        }

        Ok(graph
            .slots
            .iter()
            .map(|slot| slot.result.expect("all jobs settled"))
            .collect())
    }
}

impl Drop for CommitWriter {
    fn drop(&mut self) {
        // An abandoned writer (error path) must not leave workers parked
        // on the channel. Workers stuck mid-job exit with the process.
        for _ in 0..self.workers.len() {
            let _ = self.ready_tx.send(Msg::Stop);
        }
    }
}

fn run_job(
    shared: &Shared,
    ready_tx: &chan::Sender<Msg>,
    repo: &GitRepo,
    cache: &BlobCache,
    id: JobId,
) {
    let (job, parents) = {
        let mut graph = shared.graph.lock().unwrap();
        if graph.failure.is_some() {
            settle(&mut graph, shared, ready_tx, id, ObjectId::zero());
            return;
        }
        let job = graph.slots[id].job.take().expect("job queued twice");
        let parents: Vec<ObjectId> = job
            .parents
            .iter()
            .map(|parent| match parent {
                ParentRef::Existing(id) => *id,
                ParentRef::Job(dep) => graph.slots[*dep]
                    .result
                    .expect("dependency settled before dependent"),
            })
            .collect();
        (job, parents)
    };

    match write_commit(repo, cache, &job, &parents) {
        Ok(commit) => {
            let mut graph = shared.graph.lock().unwrap();
            settle(&mut graph, shared, ready_tx, id, commit);
        }
        Err(detail) => {
            let mut graph = shared.graph.lock().unwrap();
            if graph.failure.is_none() {
                graph.failure = Some(detail);
            }
            settle(&mut graph, shared, ready_tx, id, ObjectId::zero());
        }
    }
}

fn settle(
    graph: &mut Graph,
    shared: &Shared,
    ready_tx: &chan::Sender<Msg>,
    id: JobId,
    result: ObjectId,
) {
    graph.slots[id].result = Some(result);
    graph.outstanding -= 1;

    let dependents = std::mem::take(&mut graph.slots[id].dependents);
    for dependent in dependents {
        graph.slots[dependent].deps_remaining -= 1;
        if graph.slots[dependent].deps_remaining == 0 {
            let _ = ready_tx.send(Msg::Run(dependent));
        }
    }

    if graph.outstanding == 0 || graph.failure.is_some() {
        shared.settled.notify_all();
    }
}

fn write_commit(
    repo: &GitRepo,
    cache: &BlobCache,
    job: &CommitJob,
    parents: &[ObjectId],
) -> Result<ObjectId, String> {
    let mut entries = Vec::with_capacity(job.files.len());
    for file in &job.files {
        let id = cache
            .wait(file.key, &file.path)
            .map_err(|err| err.to_string())?;
        entries.push(IndexEntry {
            mode: file.mode,
            id,
            path: file.path.clone(),
        });
    }

    let tree = repo
        .write_tree(&entries)
        .map_err(|err| format!("{} ({}@r{})", err, job.branch, job.rev))?;

    let message = message::append_taglines(
        &job.message,
        job.rev,
        job.decorations,
        parents,
        &job.author,
        &job.committer,
    );

    repo.commit_tree(tree, parents, &message, &job.author, &job.committer)
        .map_err(|err| format!("{} ({}@r{})", err, job.branch, job.rev))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::content::Claim;
    use crate::format::FormatSpec;
    use crate::revision::ContentId;

    fn setup() -> (TempDir, Arc<GitRepo>, Arc<BlobCache>) {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(GitRepo::init(dir.path()).unwrap());
        let cache = Arc::new(BlobCache::new());
        (dir, repo, cache)
    }

    fn blob(repo: &GitRepo, cache: &BlobCache, content: &str, path: &str) -> BlobKey {
        let key = BlobKey::new(
            &ContentId::new(content),
            &FormatSpec::default().digest(),
            path,
            &[0u8; 20],
        );
        if cache.claim(key) == Claim::MustHash {
            let id = repo.hash_object(content.as_bytes()).unwrap();
            cache.complete(key, id);
        }
        key
    }

    fn job(branch: &str, rev: u32, files: Vec<JobFile>, parents: Vec<ParentRef>) -> CommitJob {
        let author = Attribution::new("kim", "kim@localhost", 1_000_000 + rev as i64);
        CommitJob {
            branch: branch.to_string(),
            rev,
            files,
            parents,
            message: format!("r{}\n", rev),
            author: author.clone(),
            committer: author,
            decorations: Decorations::default(),
        }
    }

    #[test]
    fn chain_of_commits_settles_in_order() {
        let (_dir, repo, cache) = setup();
        let writer = CommitWriter::new(repo.clone(), cache.clone(), 4);

        let f1 = JobFile {
            path: "a.txt".to_string(),
            mode: FileMode::Normal,
            key: blob(&repo, &cache, "one\n", "a.txt"),
        };
        let first = writer.add_job(job("refs/heads/main", 1, vec![f1.clone()], vec![]), &[]);

        let f2 = JobFile {
            path: "a.txt".to_string(),
            mode: FileMode::Normal,
            key: blob(&repo, &cache, "two\n", "a.txt"),
        };
        let second = writer.add_job(
            job(
                "refs/heads/main",
                2,
                vec![f2],
                vec![ParentRef::Job(first)],
            ),
            &[first],
        );

        let results = writer.finish().unwrap();
        assert_eq!(results.len(), 2);
        assert_ne!(results[first], results[second]);

        // The second commit's parent is the first commit.
        let out = std::process::Command::new("git")
            .args(&["log", "--format=%H", &results[second].to_string()])
            .current_dir(repo.path())
            .output()
            .unwrap();
        let log = String::from_utf8_lossy(&out.stdout);
        let ids: Vec<&str> = log.lines().collect();
        assert_eq!(ids[0], results[second].to_string());
        assert_eq!(ids[1], results[first].to_string());
    }

    #[test]
    fn cross_branch_parent_dependency() {
        let (_dir, repo, cache) = setup();
        let writer = CommitWriter::new(repo.clone(), cache.clone(), 2);

        let trunk_file = JobFile {
            path: "a.txt".to_string(),
            mode: FileMode::Normal,
            key: blob(&repo, &cache, "hi\n", "a.txt"),
        };
        let trunk = writer.add_job(
            job("refs/heads/main", 1, vec![trunk_file.clone()], vec![]),
            &[],
        );
        // Branch forks from trunk's head.
        let branch = writer.add_job(
            job(
                "refs/heads/feat",
                2,
                vec![trunk_file],
                vec![ParentRef::Job(trunk)],
            ),
            &[trunk],
        );

        let results = writer.finish().unwrap();
        assert_ne!(results[trunk], results[branch]);
    }

    #[test]
    fn existing_parent_needs_no_dep() {
        let (_dir, repo, cache) = setup();

        // Prepare a pre-existing commit.
        let author = Attribution::new("kim", "kim@localhost", 5);
        let tree = repo.write_tree(&[]).unwrap();
        let existing = repo
            .commit_tree(tree, &[], "seed\n", &author, &author)
            .unwrap();

        let writer = CommitWriter::new(repo.clone(), cache.clone(), 2);
        let id = writer.add_job(
            job(
                "refs/heads/main",
                1,
                vec![],
                vec![ParentRef::Existing(existing)],
            ),
            &[],
        );

        let results = writer.finish().unwrap();
        assert_ne!(results[id], existing);
    }

    #[test]
    fn empty_graph_finishes() {
        let (_dir, repo, cache) = setup();
        let writer = CommitWriter::new(repo, cache, 2);
        assert!(writer.finish().unwrap().is_empty());
    }

    #[test]
    fn identical_inputs_identical_commits() {
        let (_dir, repo, cache) = setup();

        let run = |cache: &Arc<BlobCache>| {
            let writer = CommitWriter::new(repo.clone(), cache.clone(), 2);
            let file = JobFile {
                path: "a.txt".to_string(),
                mode: FileMode::Normal,
                key: blob(&repo, cache, "hi\n", "a.txt"),
            };
            let id = writer.add_job(job("refs/heads/main", 1, vec![file], vec![]), &[]);
            writer.finish().unwrap()[id]
        };

        assert_eq!(run(&cache), run(&cache));
    }
}
