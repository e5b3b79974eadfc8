//! Error taxonomy for the conversion run.
//!
//! Fatal conditions terminate the run with a nonzero exit code. Warnings
//! (`MappingWarning`, `ContentWarning`) are not errors; they are collected in
//! the run log and never abort the conversion.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal, pre-run configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        source: io::Error,
    },

    #[error("malformed XML in {path:?}: {detail}")]
    MalformedXml { path: PathBuf, detail: String },

    #[error("unknown element <{element}> in <{scope}>")]
    UnknownElement { element: String, scope: String },

    #[error("element <{element}> is missing required {what}")]
    MissingField { element: String, what: String },

    #[error("circular variable reference involving `${name}`")]
    CircularVariable { name: String },

    #[error("undefined variable `${name}`")]
    UndefinedVariable { name: String },

    #[error("bad wildcard pattern `{pattern}`: {detail}")]
    BadPattern { pattern: String, detail: String },

    #[error("bad regular expression `{pattern}`: {detail}")]
    BadRegex { pattern: String, detail: String },

    #[error("bad revision range `{text}`")]
    BadRevRange { text: String },

    #[error("ref name `{refname}` is not valid: {detail}")]
    BadRefname { refname: String, detail: String },

    #[error("bad file mode `{mode}` in <Chmod>")]
    BadFileMode { mode: String },

    #[error("project `{project}` requires unknown project `{needed}`")]
    UnknownNeededProject { project: String, needed: String },
}

/// The upstream revision stream is ill-formed. Fatal.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("cannot read revision dump {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        source: io::Error,
    },

    #[error("malformed revision record at line {line}: {detail}")]
    Malformed { line: usize, detail: String },

    #[error("revision {rev} out of order (previous was {prev})")]
    OutOfOrder { rev: u32, prev: u32 },

    #[error("no content stored for content-id `{id}`")]
    MissingContent { id: String },
}

/// The hash subprocess failed even after the retry budget was spent. Fatal.
#[derive(Debug, Error)]
#[error("hash subprocess failed for `{path}`: {detail}")]
pub struct HasherError {
    pub path: String,
    pub detail: String,
}

/// Failure to run git plumbing or to write an object or ref. Fatal.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("cannot run `{cmd}`: {source}")]
    Spawn { cmd: String, source: io::Error },

    #[error("`{cmd}` exited with status {code}")]
    Exit { cmd: String, code: i32 },

    #[error("`{cmd}` produced unparsable object id `{output}`")]
    BadId { cmd: String, output: String },

    #[error("{path:?} is not a git repository")]
    NotARepository { path: PathBuf },
}

/// Any fatal error a conversion run can end with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Hasher(#[from] HasherError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code for this error, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(_) => 1,
            Error::Config(_) => 2,
            _ => 3,
        }
    }
}

/// A specialized `Result` for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions reported to the run log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Warning {
    /// Directory mapping oddities: unmapped directories, ref collisions
    /// resolved by suffix, `<SkipCommit>` ignored on a labeled revision.
    Mapping(String),

    /// Content oddities found while formatting: lone CR, missing final EOL.
    Content(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::Mapping(text) => write!(f, "WARNING: {}", text),
            Warning::Content(text) => write!(f, "WARNING: {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.exit_code(), 1);

        let err = Error::from(ConfigError::CircularVariable {
            name: "Trunk".to_string(),
        });
        assert_eq!(err.exit_code(), 2);

        let err = Error::from(ParserError::OutOfOrder { rev: 3, prev: 5 });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn config_error_text() {
        let err = ConfigError::CircularVariable {
            name: "A".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "circular variable reference involving `$A`"
        );
    }

    #[test]
    fn warning_text() {
        let w = Warning::Mapping("directory `x` is not mapped".to_string());
        assert_eq!(w.to_string(), "WARNING: directory `x` is not mapped");
    }
}
