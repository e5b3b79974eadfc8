//! The run log: verbose dumps, warnings, and end-of-run statistics.
//!
//! Everything goes to one sink (the `--log` file, or stdout). Warnings are
//! counted so the run can summarize them; verbosity classes gate the noisy
//! dump output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::errors::Warning;
use crate::revision::{ChangeOp, Revision};

/// Which `--verbose` classes are enabled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Verbosity {
    pub dump: bool,
    pub dump_all: bool,
    pub revs: bool,
    pub commits: bool,
    pub formatting: bool,
    pub formatting_verbose: bool,
}

impl Verbosity {
    /// Parse repeated `--verbose` values. A bare `--verbose` means
    /// `dump,commits`; `all` covers everything except `dump_all`.
    pub fn from_values(values: &[String]) -> Verbosity {
        let has = |name: &str| values.iter().any(|v| v == name);
        let all = has("all");

        Verbosity {
            dump: all || has("dump"),
            dump_all: has("dump_all"),
            revs: all || has("revs"),
            commits: all || has("commits"),
            formatting: all || has("format"),
            formatting_verbose: has("format-verbose"),
        }
    }
}

/// The log sink.
pub struct Log {
    out: Box<dyn Write + Send>,
    pub verbosity: Verbosity,
    warning_count: usize,
}

impl Log {
    pub fn to_stdout(verbosity: Verbosity) -> Log {
        Log {
            out: Box::new(io::stdout()),
            verbosity,
            warning_count: 0,
        }
    }

    pub fn to_file(path: &Path, verbosity: Verbosity) -> io::Result<Log> {
        let file = File::create(path)?;
        Ok(Log {
            out: Box::new(BufWriter::new(file)),
            verbosity,
            warning_count: 0,
        })
    }

    /// A sink that drops everything; used by tests.
    pub fn sink(verbosity: Verbosity) -> Log {
        Log {
            out: Box::new(io::sink()),
            verbosity,
            warning_count: 0,
        }
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    pub fn warning(&mut self, warning: &Warning) {
        self.warning_count += 1;
        let _ = writeln!(self.out, "{}", warning);
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Print a revision the way the original dump output does, when the
    /// `dump` class is enabled.
    pub fn dump_revision(&mut self, revision: &Revision) {
        if !self.verbosity.dump {
            return;
        }

        let _ = writeln!(
            self.out,
            "REVISION: {}, time: {}, author: {}",
            revision.rev, revision.timestamp, revision.author
        );
        if !revision.message.is_empty() {
            let _ = writeln!(
                self.out,
                "MESSAGE: {}",
                revision.message.lines().collect::<Vec<_>>().join("\n         ")
            );
        }
        for op in &revision.ops {
            let _ = match op {
                ChangeOp::AddFile { path, .. } => writeln!(self.out, "   NODE add file:{}", path),
                ChangeOp::ModifyFile { path, .. } => {
                    writeln!(self.out, "   NODE change file:{}", path)
                }
                ChangeOp::DeleteFile { path } => writeln!(self.out, "   NODE delete:{}", path),
                ChangeOp::RenameFile { from, to } => {
                    writeln!(self.out, "   NODE rename:{} -> {}", from, to)
                }
                ChangeOp::AddDir { path } => writeln!(self.out, "   NODE add dir:{}", path),
                ChangeOp::DeleteDir { path } => writeln!(self.out, "   NODE delete dir:{}", path),
                ChangeOp::ShareFile { from, to } => {
                    writeln!(self.out, "   NODE share:{} -> {}", from, to)
                }
                ChangeOp::Label { path, label } => {
                    writeln!(self.out, "   NODE label:{}, label: {}", path, label)
                }
            };
        }
        let _ = writeln!(self.out);
    }

    pub fn commit_note(&mut self, refname: &str, rev: u32, subject: &str) {
        if self.verbosity.commits {
            let _ = writeln!(self.out, "COMMIT {} r{}: {}", refname, rev, subject);
        }
    }

    pub fn format_note(&mut self, path: &str, note: &str) {
        if self.verbosity.formatting {
            let _ = writeln!(self.out, "FORMAT {}: {}", path, note);
        }
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }
}
