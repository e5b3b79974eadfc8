//! The virtual VSS directory tree, maintained revision by revision.
//!
//! At any point the tree holds exactly the files and directories that
//! survive all additions and deletions applied so far. A path deleted and
//! later re-added gets a fresh node with a new creation revision.

use std::collections::BTreeMap;

use crate::revision::ContentId;

/// Strip the VSS root prefix and surrounding slashes from a database path.
pub fn normalize_path(path: &str) -> &str {
    let path = path.strip_prefix("$/").unwrap_or(path);
    path.trim_matches('/')
}

#[derive(Clone, Debug)]
pub struct FileNode {
    pub created: u32,
    pub content: ContentId,
}

#[derive(Clone, Debug, Default)]
pub struct DirNode {
    pub created: u32,
    dirs: BTreeMap<String, DirNode>,
    files: BTreeMap<String, FileNode>,
}

impl DirNode {
    fn descend(&self, path: &str) -> Option<&DirNode> {
        let mut node = self;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node.dirs.get(part)?;
        }
        Some(node)
    }

    fn descend_mut(&mut self, path: &str, create_rev: Option<u32>) -> Option<&mut DirNode> {
        let mut node = self;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = match create_rev {
                Some(rev) => node
                    .dirs
                    .entry(part.to_string())
                    .or_insert_with(|| DirNode {
                        created: rev,
                        ..DirNode::default()
                    }),
                None => node.dirs.get_mut(part)?,
            };
        }
        Some(node)
    }

    fn collect_files(&self, prefix: &str, out: &mut Vec<(String, ContentId)>) {
        for (name, file) in &self.files {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            out.push((path, file.content.clone()));
        }
        for (name, dir) in &self.dirs {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            dir.collect_files(&path, out);
        }
    }

    fn collect_empty_dirs(&self, prefix: &str, out: &mut Vec<String>) -> bool {
        let mut has_files = !self.files.is_empty();

        for (name, dir) in &self.dirs {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if dir.collect_empty_dirs(&path, out) {
                has_files = true;
            } else {
                out.push(path);
            }
        }

        has_files
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

/// The whole project tree, rooted at the VSS database root.
#[derive(Clone, Debug, Default)]
pub struct ProjectTree {
    root: DirNode,
}

impl ProjectTree {
    pub fn new() -> ProjectTree {
        ProjectTree::default()
    }

    /// Create a directory (and any missing parents) at `rev`.
    pub fn add_dir(&mut self, path: &str, rev: u32) {
        self.root.descend_mut(normalize_path(path), Some(rev));
    }

    /// Remove a directory subtree. Returns false if the path was absent.
    pub fn delete_dir(&mut self, path: &str) -> bool {
        let path = normalize_path(path);
        let (parent, name) = split_parent(path);
        match self.root.descend_mut(parent, None) {
            Some(node) => node.dirs.remove(name).is_some(),
            None => false,
        }
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        self.root.descend(normalize_path(path)).is_some()
    }

    pub fn dir_created(&self, path: &str) -> Option<u32> {
        self.root.descend(normalize_path(path)).map(|d| d.created)
    }

    /// Create or replace a file. Missing parent directories are created
    /// with the same revision; VSS streams normally add them explicitly.
    pub fn put_file(&mut self, path: &str, content: ContentId, rev: u32) {
        let path = normalize_path(path);
        let (parent, name) = split_parent(path);
        let node = self
            .root
            .descend_mut(parent, Some(rev))
            .expect("parent just created");
        node.files
            .insert(name.to_string(), FileNode { created: rev, content });
    }

    /// Replace the content of an existing file. Returns false if absent.
    pub fn modify_file(&mut self, path: &str, content: ContentId) -> bool {
        let path = normalize_path(path);
        let (parent, name) = split_parent(path);
        match self.root.descend_mut(parent, None) {
            Some(node) => match node.files.get_mut(name) {
                Some(file) => {
                    file.content = content;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn delete_file(&mut self, path: &str) -> bool {
        let path = normalize_path(path);
        let (parent, name) = split_parent(path);
        match self.root.descend_mut(parent, None) {
            Some(node) => node.files.remove(name).is_some(),
            None => false,
        }
    }

    pub fn file_content(&self, path: &str) -> Option<&ContentId> {
        let path = normalize_path(path);
        let (parent, name) = split_parent(path);
        self.root
            .descend(parent)
            .and_then(|node| node.files.get(name))
            .map(|file| &file.content)
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.file_content(path).is_some()
    }

    /// All files under a directory, as (path relative to `dir`, content id),
    /// sorted by path.
    pub fn files_under(&self, dir: &str) -> Vec<(String, ContentId)> {
        let mut out = Vec::new();
        if let Some(node) = self.root.descend(normalize_path(dir)) {
            node.collect_files("", &mut out);
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Directories under `dir` (relative paths) whose subtree holds no
    /// files. Used for placeholder injection.
    pub fn empty_dirs_under(&self, dir: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(node) = self.root.descend(normalize_path(dir)) {
            node.collect_empty_dirs("", &mut out);
        }
        out.sort();
        out
    }
}
