//! Git plumbing via subprocesses.
//!
//! Object construction goes through the standard plumbing commands:
//! `hash-object` for blobs, `update-index --index-info` plus `write-tree`
//! for trees (against a private index file, so branches can build trees
//! concurrently), `commit-tree` for commits, and `update-ref --stdin` for
//! batched ref updates. The engine never writes repository files itself;
//! git's content-addressed store makes partially written runs harmless.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::attribution::Attribution;
use crate::errors::GitError;
use crate::file_mode::FileMode;
use crate::oid::ObjectId;

/// One staged tree entry.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub mode: FileMode,
    pub id: ObjectId,
    pub path: String,
}

/// One batched ref operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RefUpdate {
    Update { refname: String, id: ObjectId },
    Delete { refname: String },
}

/// Handle to the target repository.
pub struct GitRepo {
    path: PathBuf,
    index_serial: AtomicU64,
}

impl GitRepo {
    /// Open an existing repository (workdir or bare).
    pub fn open(path: &Path) -> Result<GitRepo, GitError> {
        let output = Command::new("git")
            .args(&["rev-parse", "--git-dir"])
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| GitError::Spawn {
                cmd: "git rev-parse".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::NotARepository {
                path: path.to_path_buf(),
            });
        }

        Ok(GitRepo {
            path: path.to_path_buf(),
            index_serial: AtomicU64::new(0),
        })
    }

    /// Create a repository at `path` and open it.
    pub fn init(path: &Path) -> Result<GitRepo, GitError> {
        std::fs::create_dir_all(path).map_err(|source| GitError::Spawn {
            cmd: "git init".to_string(),
            source,
        })?;
        run_quiet(Command::new("git").args(&["init", "-q"]).current_dir(path))?;
        GitRepo::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash file bytes into the object database, returning the blob id.
    /// The bytes are stored exactly as given; filters never apply.
    pub fn hash_object(&self, data: &[u8]) -> Result<ObjectId, GitError> {
        let cmd = "git hash-object";
        let mut child = Command::new("git")
            .args(&[
                "-c",
                "core.safecrlf=false",
                "hash-object",
                "-t",
                "blob",
                "-w",
                "--stdin",
                "--no-filters",
            ])
            .current_dir(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(data)
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        let output = child.wait_with_output().map_err(|source| GitError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
        check_status(cmd, output.status)?;

        parse_id(cmd, &output.stdout)
    }

    /// Stage `entries` into a fresh private index and write the tree.
    pub fn write_tree(&self, entries: &[IndexEntry]) -> Result<ObjectId, GitError> {
        let index_file = self.scratch_index_path();
        let result = self.write_tree_with_index(entries, &index_file);
        let _ = std::fs::remove_file(&index_file);
        result
    }

    fn scratch_index_path(&self) -> PathBuf {
        let serial = self.index_serial.fetch_add(1, Ordering::Relaxed);
        env::temp_dir().join(format!(
            "vss2git-index-{}-{}",
            std::process::id(),
            serial
        ))
    }

    fn write_tree_with_index(
        &self,
        entries: &[IndexEntry],
        index_file: &Path,
    ) -> Result<ObjectId, GitError> {
        let cmd = "git update-index";
        let mut child = Command::new("git")
            .args(&["update-index", "--add", "--index-info"])
            .current_dir(&self.path)
            .env("GIT_INDEX_FILE", index_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            let mut lines = String::new();
            for entry in entries {
                lines.push_str(&format!(
                    "{} {}\t{}\n",
                    entry.mode.index_text(),
                    entry.id,
                    entry.path
                ));
            }
            stdin
                .write_all(lines.as_bytes())
                .map_err(|source| GitError::Spawn {
                    cmd: cmd.to_string(),
                    source,
                })?;
        }

        let status = child.wait().map_err(|source| GitError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
        check_status(cmd, status)?;

        let cmd = "git write-tree";
        let output = Command::new("git")
            .arg("write-tree")
            .current_dir(&self.path)
            .env("GIT_INDEX_FILE", index_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .output()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;
        check_status(cmd, output.status)?;

        parse_id(cmd, &output.stdout)
    }

    /// Write a commit object. The message goes through stdin, so its length
    /// and content are unconstrained.
    pub fn commit_tree(
        &self,
        tree: ObjectId,
        parents: &[ObjectId],
        message: &str,
        author: &Attribution,
        committer: &Attribution,
    ) -> Result<ObjectId, GitError> {
        let cmd = "git commit-tree";

        let mut args = vec!["commit-tree".to_string(), tree.to_string()];
        for parent in parents {
            args.push("-p".to_string());
            args.push(parent.to_string());
        }

        let mut child = Command::new("git")
            .args(&args)
            .current_dir(&self.path)
            .env("GIT_AUTHOR_NAME", author.sanitized_name())
            .env("GIT_AUTHOR_EMAIL", author.sanitized_email())
            .env("GIT_AUTHOR_DATE", author.git_date())
            .env("GIT_COMMITTER_NAME", committer.sanitized_name())
            .env("GIT_COMMITTER_EMAIL", committer.sanitized_email())
            .env("GIT_COMMITTER_DATE", committer.git_date())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(message.as_bytes())
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        let output = child.wait_with_output().map_err(|source| GitError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
        check_status(cmd, output.status)?;

        parse_id(cmd, &output.stdout)
    }

    /// Apply ref updates in one `update-ref --stdin` batch.
    pub fn update_refs(&self, updates: &[RefUpdate]) -> Result<(), GitError> {
        if updates.is_empty() {
            return Ok(());
        }

        let cmd = "git update-ref";
        let mut child = Command::new("git")
            .args(&["update-ref", "--stdin"])
            .current_dir(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            let mut lines = String::new();
            for update in updates {
                match update {
                    RefUpdate::Update { refname, id } => {
                        lines.push_str(&format!("update \"{}\" {}\n", refname, id));
                    }
                    RefUpdate::Delete { refname } => {
                        lines.push_str(&format!("delete \"{}\"\n", refname));
                    }
                }
            }
            stdin
                .write_all(lines.as_bytes())
                .map_err(|source| GitError::Spawn {
                    cmd: cmd.to_string(),
                    source,
                })?;
        }

        let status = child.wait().map_err(|source| GitError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
        check_status(cmd, status)
    }

    /// Refs under `prefix` (e.g. `refs/heads/`), with their target ids.
    pub fn for_each_ref(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>, GitError> {
        let cmd = "git for-each-ref";
        let output = Command::new("git")
            .args(&[
                "for-each-ref",
                "--format=%(objectname) %(refname)",
                prefix,
            ])
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .output()
            .map_err(|source| GitError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;
        check_status(cmd, output.status)?;

        let text = String::from_utf8_lossy(&output.stdout);
        let mut refs = Vec::new();
        for line in text.lines() {
            if let Some((id, refname)) = line.split_once(' ') {
                let id = ObjectId::from_hex(id).map_err(|_| GitError::BadId {
                    cmd: cmd.to_string(),
                    output: line.to_string(),
                })?;
                refs.push((refname.to_string(), id));
            }
        }

        Ok(refs)
    }

    /// Resolve a single ref, if it exists.
    pub fn resolve_ref(&self, refname: &str) -> Result<Option<ObjectId>, GitError> {
        let mut refs = self.for_each_ref(refname)?;
        Ok(refs
            .iter()
            .position(|(name, _)| name == refname)
            .map(|pos| refs.swap_remove(pos).1))
    }
}

fn run_quiet(command: &mut Command) -> Result<(), GitError> {
    let cmd = "git init";
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .map_err(|source| GitError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
    check_status(cmd, status)
}

fn check_status(cmd: &str, status: std::process::ExitStatus) -> Result<(), GitError> {
    if status.success() {
        Ok(())
    } else {
        Err(GitError::Exit {
            cmd: cmd.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

fn parse_id(cmd: &str, stdout: &[u8]) -> Result<ObjectId, GitError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().next().unwrap_or("");
    ObjectId::from_hex(line.trim()).map_err(|_| GitError::BadId {
        cmd: cmd.to_string(),
        output: line.to_string(),
    })
}
