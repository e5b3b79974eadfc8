//! Source formatting applied to file bytes before hashing.
//!
//! A formatting spec participates in blob identity: the same VSS content
//! formatted under different specs produces different blobs, so the spec is
//! digested into the blob dedup key. The simple transformations (EOL fixes,
//! whitespace trims, leading-indent retab) are implemented here; full
//! indent reformatting is delegated to an [`IndentFormatter`], a pure
//! byte-to-byte transformer supplied by the embedding application.

use sha1::{Digest, Sha1};

/// Leading-indentation retab parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Retab {
    /// Re-emit indentation with tabs (true) or spaces only (false).
    pub tabs: bool,
    /// Column width of one tab stop.
    pub tab_size: u32,
}

/// The effective formatting for one file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FormatSpec {
    /// Treat a standalone CR as a line separator and rewrite it to LF.
    pub fix_eol: bool,
    /// Append a final LF when the file does not end with one.
    pub fix_last_eol: bool,
    /// Strip whitespace runs before EOL.
    pub trim_trailing_whitespace: bool,
    /// Also trim whitespace after a line-continuation backslash. Without
    /// this, lines ending in `\` are left untouched by the trim.
    pub trim_backslash: bool,
    pub retab: Option<Retab>,
    /// Engage the external indent reformatter.
    pub reindent: bool,
}

/// Content oddities noticed while formatting. Reported only for files that
/// are actually subject to formatting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentNote {
    LoneCr,
    MissingFinalEol,
}

impl FormatSpec {
    /// True if applying this spec can never change any input.
    pub fn is_noop(&self) -> bool {
        *self == FormatSpec::default()
    }

    /// Stable digest of the spec for blob dedup keys.
    pub fn digest(&self) -> [u8; 20] {
        let retab = match self.retab {
            Some(r) => format!("{}:{}", r.tabs as u8, r.tab_size),
            None => "-".to_string(),
        };
        let canonical = format!(
            "eol={};lasteol={};trim={};bslash={};retab={};reindent={}",
            self.fix_eol as u8,
            self.fix_last_eol as u8,
            self.trim_trailing_whitespace as u8,
            self.trim_backslash as u8,
            retab,
            self.reindent as u8,
        );

        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        hasher.finalize().into()
    }

    /// Apply the spec to file bytes, collecting content notes.
    pub fn apply(
        &self,
        data: &[u8],
        reindenter: &dyn IndentFormatter,
    ) -> (Vec<u8>, Vec<ContentNote>) {
        let mut notes = Vec::new();

        if data.is_empty() {
            return (Vec::new(), notes);
        }

        let mut out = Vec::with_capacity(data.len());
        for line in split_lines(data) {
            self.push_line(line, &mut out, &mut notes);
        }

        if !out.ends_with(b"\n") {
            notes.push(ContentNote::MissingFinalEol);
            if self.fix_last_eol {
                out.push(b'\n');
            }
        }

        let out = if self.reindent {
            reindenter.reindent(&out, self)
        } else {
            out
        };

        (out, notes)
    }

    fn push_line(&self, line: &[u8], out: &mut Vec<u8>, notes: &mut Vec<ContentNote>) {
        // Separate the line body from its terminator.
        let (body, eol): (&[u8], &[u8]) = if line.ends_with(b"\r\n") {
            (&line[..line.len() - 2], b"\r\n")
        } else if line.ends_with(b"\n") {
            (&line[..line.len() - 1], b"\n")
        } else {
            (line, b"")
        };

        let mut body = body.to_vec();

        if body.contains(&b'\r') {
            notes.push(ContentNote::LoneCr);
            if self.fix_eol {
                // Standalone CRs become line separators of their own.
                let parts: Vec<Vec<u8>> =
                    body.split(|b| *b == b'\r').map(|p| p.to_vec()).collect();
                let last = parts.len() - 1;
                for (i, part) in parts.into_iter().enumerate() {
                    if i < last {
                        let mut segment = part;
                        self.trim(&mut segment);
                        self.retab_line(&mut segment);
                        out.extend_from_slice(&segment);
                        out.push(b'\n');
                    } else {
                        body = part;
                    }
                }
            }
        }

        self.trim(&mut body);
        self.retab_line(&mut body);
        out.extend_from_slice(&body);
        out.extend_from_slice(eol);
    }

    fn trim(&self, body: &mut Vec<u8>) {
        if !self.trim_trailing_whitespace {
            return;
        }

        let trimmed_len = body
            .iter()
            .rposition(|b| *b != b' ' && *b != b'\t')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        if trimmed_len < body.len() {
            // A continuation backslash keeps its trailing whitespace unless
            // TrimBackslash is engaged.
            if trimmed_len > 0 && body[trimmed_len - 1] == b'\\' && !self.trim_backslash {
                return;
            }
            body.truncate(trimmed_len);
        }
    }

    fn retab_line(&self, body: &mut Vec<u8>) {
        let retab = match self.retab {
            Some(retab) => retab,
            None => return,
        };

        let indent_len = body
            .iter()
            .position(|b| *b != b' ' && *b != b'\t')
            .unwrap_or(body.len());
        if indent_len == 0 {
            return;
        }

        let mut columns = 0u32;
        for b in &body[..indent_len] {
            if *b == b'\t' {
                columns = (columns / retab.tab_size + 1) * retab.tab_size;
            } else {
                columns += 1;
            }
        }

        let mut indent = Vec::new();
        if retab.tabs {
            indent.extend(std::iter::repeat(b'\t').take((columns / retab.tab_size) as usize));
            indent.extend(std::iter::repeat(b' ').take((columns % retab.tab_size) as usize));
        } else {
            indent.extend(std::iter::repeat(b' ').take(columns as usize));
        }

        body.splice(..indent_len, indent);
    }
}

/// Split bytes into lines, keeping each line's terminator.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;

    for (i, b) in data.iter().enumerate() {
        if *b == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }

    lines
}

/// The embedded indent reformatter boundary: bytes in, bytes out.
pub trait IndentFormatter: Send + Sync {
    fn reindent(&self, data: &[u8], spec: &FormatSpec) -> Vec<u8>;
}

/// Identity transform, used when no reformatter is linked in or when
/// `--no-indent-reformat` is given.
pub struct PassthroughFormatter;

impl IndentFormatter for PassthroughFormatter {
    fn reindent(&self, data: &[u8], _spec: &FormatSpec) -> Vec<u8> {
        data.to_vec()
    }
}
