//! Reading a revision dump from disk.
//!
//! The upstream VSS database parser writes its output as a dump directory:
//! `revisions.jsonl` holds one revision record per line in ascending
//! revision order, and `contents/<content-id>` holds the bytes for each
//! content id. This module adapts that layout to the `RevisionSource`
//! contract; the engine itself never touches the dump layout.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::errors::ParserError;
use crate::revision::{ContentId, Revision, RevisionSource};

#[derive(Debug)]
pub struct DumpSource {
    root: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    last_rev: u32,
}

impl DumpSource {
    /// Open the dump rooted at `root`.
    pub fn open(root: &Path) -> Result<DumpSource, ParserError> {
        let index = root.join("revisions.jsonl");
        let file = File::open(&index).map_err(|source| ParserError::Unreadable {
            path: index.clone(),
            source,
        })?;

        Ok(DumpSource {
            root: root.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            last_rev: 0,
        })
    }
}

impl RevisionSource for DumpSource {
    fn next_revision(&mut self) -> Result<Option<Revision>, ParserError> {
        loop {
            let line = match self.lines.next() {
                Some(line) => line.map_err(|source| ParserError::Unreadable {
                    path: self.root.join("revisions.jsonl"),
                    source,
                })?,
                None => return Ok(None),
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let revision: Revision =
                serde_json::from_str(&line).map_err(|err| ParserError::Malformed {
                    line: self.line_no,
                    detail: err.to_string(),
                })?;

            if revision.rev <= self.last_rev {
                return Err(ParserError::OutOfOrder {
                    rev: revision.rev,
                    prev: self.last_rev,
                });
            }
            self.last_rev = revision.rev;

            return Ok(Some(revision));
        }
    }

    fn fetch(&self, content: &ContentId) -> Result<Vec<u8>, ParserError> {
        let path = self.root.join("contents").join(content.as_str());
        fs::read(&path).map_err(|_| ParserError::MissingContent {
            id: content.as_str().to_string(),
        })
    }
}
