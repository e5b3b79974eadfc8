// Shared by the integration test binaries; not every binary uses every
// helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use vss2git::config::{ConfigModel, LoadOptions};
use vss2git::log::{Log, Verbosity};
use vss2git::options::RunOptions;
use vss2git::{ChangeOp, ContentId, Converter, ParserError, Revision, RevisionSource, RunReport};

/// An in-memory revision stream standing in for the VSS parser.
pub struct MemorySource {
    revisions: VecDeque<Revision>,
    contents: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource {
            revisions: VecDeque::new(),
            contents: HashMap::new(),
        }
    }

    pub fn content(&mut self, id: &str, bytes: &[u8]) -> &mut Self {
        self.contents.insert(id.to_string(), bytes.to_vec());
        self
    }

    pub fn revision(&mut self, rev: u32, author: &str, message: &str, ops: Vec<ChangeOp>) -> &mut Self {
        self.revisions.push_back(Revision {
            rev,
            rev_id: None,
            author: author.to_string(),
            timestamp: 1_000_000_000 + (rev as i64) * 60,
            message: message.to_string(),
            ops,
        });
        self
    }
}

impl RevisionSource for MemorySource {
    fn next_revision(&mut self) -> Result<Option<Revision>, ParserError> {
        Ok(self.revisions.pop_front())
    }

    fn fetch(&self, content: &ContentId) -> Result<Vec<u8>, ParserError> {
        self.contents
            .get(content.as_str())
            .cloned()
            .ok_or_else(|| ParserError::MissingContent {
                id: content.as_str().to_string(),
            })
    }
}

// Op constructors, to keep the test fixtures readable.

pub fn add_dir(path: &str) -> ChangeOp {
    ChangeOp::AddDir {
        path: path.to_string(),
    }
}

pub fn delete_dir(path: &str) -> ChangeOp {
    ChangeOp::DeleteDir {
        path: path.to_string(),
    }
}

pub fn add_file(path: &str, content: &str) -> ChangeOp {
    ChangeOp::AddFile {
        path: path.to_string(),
        content: ContentId::new(content),
    }
}

pub fn modify_file(path: &str, content: &str) -> ChangeOp {
    ChangeOp::ModifyFile {
        path: path.to_string(),
        content: ContentId::new(content),
    }
}

pub fn delete_file(path: &str) -> ChangeOp {
    ChangeOp::DeleteFile {
        path: path.to_string(),
    }
}

pub fn rename_file(from: &str, to: &str) -> ChangeOp {
    ChangeOp::RenameFile {
        from: from.to_string(),
        to: to.to_string(),
    }
}

pub fn label(path: &str, text: &str) -> ChangeOp {
    ChangeOp::Label {
        path: path.to_string(),
        label: text.to_string(),
    }
}

/// Run a conversion into a fresh target repository.
pub fn convert(source: &mut MemorySource, config_xml: Option<&str>) -> (TempDir, RunReport) {
    let target = TempDir::new().unwrap();
    let report = convert_into(source, config_xml, target.path(), |_| ());
    (target, report)
}

/// Run a conversion into an existing target, with option tweaks.
pub fn convert_into(
    source: &mut MemorySource,
    config_xml: Option<&str>,
    target: &Path,
    tweak: impl FnOnce(&mut RunOptions),
) -> RunReport {
    let mut options = RunOptions::default();
    options.target_repo = Some(target.to_path_buf());
    options.quiet = true;
    tweak(&mut options);

    let load_options: LoadOptions = options.load_options();
    let config = match config_xml {
        Some(xml) => {
            ConfigModel::load_str(xml, Path::new("test-config.xml"), &load_options).unwrap()
        }
        None => ConfigModel::builtin(&load_options).unwrap(),
    };

    let converter = Converter::new(options, config, Log::sink(Verbosity::default())).unwrap();
    converter.run(source).unwrap()
}

/// Run a git command in a repo and return trimmed stdout.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

/// Like `git`, but failure returns None instead of panicking.
pub fn try_git(repo: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        None
    }
}
