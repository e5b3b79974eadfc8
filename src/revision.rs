//! The revision stream delivered by the upstream VSS parser.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ParserError;

/// Parser-supplied identifier for file bytes, stable across identical
/// content. The engine never inspects it; it only keys caches with it.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: &str) -> ContentId {
        ContentId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One change operation inside a revision, applied in order.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ChangeOp {
    AddFile { path: String, content: ContentId },
    ModifyFile { path: String, content: ContentId },
    DeleteFile { path: String },
    RenameFile { from: String, to: String },
    AddDir { path: String },
    DeleteDir { path: String },
    ShareFile { from: String, to: String },
    Label { path: String, label: String },
}

impl ChangeOp {
    /// The path this operation is primarily about, for filtering and dumps.
    pub fn path(&self) -> &str {
        match self {
            ChangeOp::AddFile { path, .. } => path,
            ChangeOp::ModifyFile { path, .. } => path,
            ChangeOp::DeleteFile { path } => path,
            ChangeOp::RenameFile { to, .. } => to,
            ChangeOp::AddDir { path } => path,
            ChangeOp::DeleteDir { path } => path,
            ChangeOp::ShareFile { to, .. } => to,
            ChangeOp::Label { path, .. } => path,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, ChangeOp::Label { .. })
    }
}

/// A revision record: a monotonically increasing number, authorship, a
/// message, and an ordered list of change operations.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Revision {
    pub rev: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev_id: Option<String>,
    pub author: String,
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub ops: Vec<ChangeOp>,
}

impl Revision {
    pub fn has_labels(&self) -> bool {
        self.ops.iter().any(|op| op.is_label())
    }

    pub fn has_changes(&self) -> bool {
        self.ops.iter().any(|op| !op.is_label())
    }
}

/// The upstream parser contract: a lazy, finite, ordered sequence of
/// revisions, plus content fetch by id.
pub trait RevisionSource {
    /// Next revision, or `None` at end of stream. Numbers must ascend.
    fn next_revision(&mut self) -> Result<Option<Revision>, ParserError>;

    /// Fetch the bytes for a content id.
    fn fetch(&self, content: &ContentId) -> Result<Vec<u8>, ParserError>;
}
