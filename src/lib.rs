//! Convert a Microsoft Visual SourceSafe (VSS) dump into a Git repository.
//!
//! The crate consumes an ordered revision stream produced by the upstream
//! VSS database parser, maps VSS directories to Git refs through an XML
//! configuration, reconstructs per-branch worktrees, and emits a
//! content-addressed object graph (blobs, trees, commits, refs) through
//! git plumbing subprocesses.

mod attribution;
pub use attribution::Attribution;

pub mod authors;
pub mod branch;
pub mod config;
pub mod content;

mod errors;
pub use errors::{ConfigError, Error, GitError, HasherError, ParserError, Result, Warning};

mod file_mode;
pub use file_mode::FileMode;

pub mod format;
pub mod git;

mod history;
pub use history::{Converter, RunReport};

pub mod log;
pub mod mapper;
pub mod message;

mod oid;
pub use oid::{ObjectId, ParseObjectIdError};

pub mod options;
pub mod pattern;
pub mod project_tree;
pub mod refname;
pub mod refs;
pub mod rev_ranges;

mod revision;
pub use revision::{ChangeOp, ContentId, Revision, RevisionSource};

pub mod scheduler;

mod source;
pub use source::DumpSource;

pub mod vars;
