//! Blob deduplication and the hash worker pool.
//!
//! Every worktree file resolves to a git blob through a [`BlobKey`]: the
//! digest of (content id, formatting spec digest, worktree path,
//! gitattributes context). Identical keys are hashed once per run and
//! remembered across runs in the `--sha1-map` file, which is append-only
//! while running and persisted atomically (write temporary, rename) at the
//! end.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;
use sha1::{Digest, Sha1};

use crate::errors::HasherError;
use crate::git::GitRepo;
use crate::oid::ObjectId;
use crate::revision::ContentId;

/// The dedup key determining a blob's identity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlobKey {
    digest: [u8; 20],
}

impl BlobKey {
    pub fn new(
        content: &ContentId,
        format_digest: &[u8; 20],
        path: &str,
        attributes_digest: &[u8; 20],
    ) -> BlobKey {
        let mut hasher = Sha1::new();
        hasher.update(content.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(format_digest);
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(attributes_digest);

        BlobKey {
            digest: hasher.finalize().into(),
        }
    }

    pub fn to_hex(self) -> String {
        ObjectId::from_raw(self.digest).to_string()
    }

    pub fn from_hex(hex: &str) -> Option<BlobKey> {
        ObjectId::from_hex(hex).ok().map(|id| {
            let mut digest = [0u8; 20];
            digest.copy_from_slice(id.as_bytes());
            BlobKey { digest }
        })
    }
}

/// What the caller should do about a key it just looked up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Claim {
    /// Blob id already known.
    Ready(ObjectId),
    /// Caller owns this key now and must submit a hash job.
    MustHash,
    /// Some other claim already submitted a job.
    InFlight,
}

#[derive(Clone, Copy, Debug)]
enum BlobState {
    Pending,
    Ready(ObjectId),
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<BlobKey, BlobState>,
    /// Entries produced this run, in completion order.
    appended: Vec<(BlobKey, ObjectId)>,
    /// Entries loaded from a previous run's sha1-map.
    loaded: Vec<(BlobKey, ObjectId)>,
    failure: Option<String>,
}

/// Thread-shared dedup cache.
#[derive(Default)]
pub struct BlobCache {
    inner: Mutex<CacheInner>,
    ready: Condvar,
}

impl BlobCache {
    pub fn new() -> BlobCache {
        BlobCache::default()
    }

    /// Load a sha1-map written by a previous run. Unparsable lines are
    /// skipped; the count of loaded entries is returned.
    pub fn load_sha1_map(&self, path: &Path) -> io::Result<usize> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            let mut fields = line.split('\t');
            let key = fields.next().and_then(BlobKey::from_hex);
            let id = fields.next().and_then(|hex| ObjectId::from_hex(hex).ok());
            if let (Some(key), Some(id)) = (key, id) {
                inner.map.insert(key, BlobState::Ready(id));
                inner.loaded.push((key, id));
                count += 1;
            }
        }

        Ok(count)
    }

    /// Persist the full map (loaded plus appended entries) atomically.
    pub fn save_sha1_map(&self, path: &Path) -> io::Result<()> {
        let inner = self.inner.lock().unwrap();

        let mut text = String::new();
        for (key, id) in inner.loaded.iter().chain(inner.appended.iter()) {
            text.push_str(&format!("{}\t{}\n", key.to_hex(), id));
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }

    /// Look up a key, claiming it for hashing when unknown.
    pub fn claim(&self, key: BlobKey) -> Claim {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(&key) {
            Some(BlobState::Ready(id)) => Claim::Ready(*id),
            Some(BlobState::Pending) => Claim::InFlight,
            None => {
                inner.map.insert(key, BlobState::Pending);
                Claim::MustHash
            }
        }
    }

    /// Record a finished hash and wake waiters.
    pub fn complete(&self, key: BlobKey, id: ObjectId) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(key, BlobState::Ready(id));
        inner.appended.push((key, id));
        drop(inner);
        self.ready.notify_all();
    }

    /// Mark the whole pipeline failed; all waiters see the error.
    pub fn fail(&self, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.failure.is_none() {
            inner.failure = Some(detail.to_string());
        }
        drop(inner);
        self.ready.notify_all();
    }

    /// Block until the blob id for `key` is known.
    pub fn wait(&self, key: BlobKey, path: &str) -> Result<ObjectId, HasherError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(detail) = &inner.failure {
                return Err(HasherError {
                    path: path.to_string(),
                    detail: detail.clone(),
                });
            }
            match inner.map.get(&key) {
                Some(BlobState::Ready(id)) => return Ok(*id),
                Some(BlobState::Pending) => {
                    inner = self.ready.wait(inner).unwrap();
                }
                None => {
                    return Err(HasherError {
                        path: path.to_string(),
                        detail: "blob was never submitted for hashing".to_string(),
                    })
                }
            }
        }
    }

    pub fn new_entry_count(&self) -> usize {
        self.inner.lock().unwrap().appended.len()
    }
}

/// A unit of hashing work: formatted bytes bound for `git hash-object`.
pub struct HashJob {
    pub key: BlobKey,
    pub data: Vec<u8>,
    /// Worktree path, for diagnostics only.
    pub path: String,
}

/// Bounded pool of hash workers feeding hasher subprocesses.
///
/// Submission blocks when all workers are busy and the queue is full, which
/// keeps the producer from racing ahead of the hashers.
pub struct HashPool {
    sender: Option<chan::Sender<HashJob>>,
    workers: Vec<JoinHandle<()>>,
    hashed_files: Arc<AtomicU64>,
    hashed_bytes: Arc<AtomicU64>,
}

/// Default worker count, per the conversion pipeline contract.
pub const DEFAULT_HASH_WORKERS: usize = 8;

impl HashPool {
    pub fn new(repo: Arc<GitRepo>, cache: Arc<BlobCache>, worker_count: usize) -> HashPool {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = chan::bounded::<HashJob>(worker_count * 4);

        let hashed_files = Arc::new(AtomicU64::new(0));
        let hashed_bytes = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let repo = repo.clone();
            let cache = cache.clone();
            let hashed_files = hashed_files.clone();
            let hashed_bytes = hashed_bytes.clone();

            workers.push(thread::spawn(move || {
                for job in receiver.iter() {
                    // One retry per hash before giving up on the run.
                    let result = repo
                        .hash_object(&job.data)
                        .or_else(|_| repo.hash_object(&job.data));

                    match result {
                        Ok(id) => {
                            hashed_files.fetch_add(1, Ordering::Relaxed);
                            hashed_bytes.fetch_add(job.data.len() as u64, Ordering::Relaxed);
                            cache.complete(job.key, id);
                        }
                        Err(err) => {
                            cache.fail(&format!("{} ({})", err, job.path));
                        }
                    }
                }
            }));
        }

        HashPool {
            sender: Some(sender),
            workers,
            hashed_files,
            hashed_bytes,
        }
    }

    /// Queue a job; blocks while the pool is saturated.
    pub fn submit(&self, job: HashJob) {
        if let Some(sender) = &self.sender {
            // Send fails only when every worker is gone, which the cache
            // failure flag already reports.
            let _ = sender.send(job);
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub fn finish(mut self) -> (u64, u64) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        (
            self.hashed_files.load(Ordering::Relaxed),
            self.hashed_bytes.load(Ordering::Relaxed),
        )
    }
}
