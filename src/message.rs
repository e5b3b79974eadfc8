//! Commit message assembly.
//!
//! A commit message starts from the raw VSS revision message, passes the
//! `<EditMsg>` chain (MapPath scope, then Project, then Default), gains a
//! synthesized summary when empty or headless, gets carry-over text from
//! skipped revisions prepended, and finally receives the tagline block
//! (`VSS-revision:`, `Change-Id:`).

use sha1::{Digest, Sha1};

use crate::attribution::Attribution;
use crate::config::EditMsgRule;
use crate::oid::ObjectId;

/// The per-commit change counts behind synthesized summaries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeSummary {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<(String, String)>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    /// One-line subject: "Added 2 files, deleted 1 file".
    pub fn subject_line(&self) -> String {
        let mut parts = Vec::new();
        push_count(&mut parts, "added", self.added.len());
        push_count(&mut parts, "changed", self.modified.len());
        push_count(&mut parts, "deleted", self.deleted.len());
        push_count(&mut parts, "renamed", self.renamed.len());

        if parts.is_empty() {
            return "No changes".to_string();
        }

        let mut line = parts.join(", ");
        // Capitalize the subject.
        if let Some(first) = line.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        line
    }

    /// Subject plus one line per file.
    pub fn full_text(&self) -> String {
        let mut text = self.subject_line();
        text.push('\n');

        for path in &self.added {
            text.push_str(&format!("\nA {}", path));
        }
        for path in &self.modified {
            text.push_str(&format!("\nM {}", path));
        }
        for path in &self.deleted {
            text.push_str(&format!("\nD {}", path));
        }
        for (old, new) in &self.renamed {
            text.push_str(&format!("\nR {} -> {}", old, new));
        }

        text
    }
}

fn push_count(parts: &mut Vec<String>, what: &str, count: usize) {
    match count {
        0 => (),
        1 => parts.push(format!("{} 1 file", what)),
        n => parts.push(format!("{} {} files", what, n)),
    }
}

/// Run the `<EditMsg>` chain over a raw message and fill in synthesized
/// text where the result is headless or empty.
pub fn assemble(
    raw: &str,
    rev: u32,
    edit_chain: &[&EditMsgRule],
    summary: &ChangeSummary,
) -> String {
    let mut message = raw.to_string();

    for rule in edit_chain {
        if !rule.revs.is_empty() && !rule.revs.contains(rev) {
            continue;
        }
        if !rule.regex.is_match(&message) {
            continue;
        }

        message = rule
            .regex
            .replacen(&message, rule.max, rule.replace.as_str())
            .into_owned();

        if rule.final_rule {
            break;
        }
    }

    if message.starts_with("\n\n") {
        // Headless message: synthesize the subject line.
        message = format!("{}{}", summary.subject_line(), message);
    }

    if message.trim().is_empty() {
        message = summary.full_text();
    }

    message
}

/// Prepend carry-over text accumulated from `<SkipCommit>` revisions.
pub fn prepend_carry_over(message: &str, carry: &str) -> String {
    if carry.is_empty() {
        message.to_string()
    } else if message.is_empty() {
        carry.to_string()
    } else {
        format!("{}\n{}", carry, message)
    }
}

/// Options for the tagline block appended after assembly.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Decorations {
    pub revision_id: bool,
    pub change_id: bool,
}

impl Decorations {
    pub fn any(&self) -> bool {
        self.revision_id || self.change_id
    }
}

/// Append the tagline block. The change id is derived from everything that
/// identifies the commit: parents, author, committer times, and the message
/// itself.
pub fn append_taglines(
    message: &str,
    rev: u32,
    decorations: Decorations,
    parents: &[ObjectId],
    author: &Attribution,
    committer: &Attribution,
) -> String {
    if !decorations.any() {
        return message.to_string();
    }

    let mut out = message.trim_end().to_string();
    out.push_str("\n\n");

    if decorations.revision_id {
        out.push_str(&format!("VSS-revision: {}\n", rev));
    }
    if decorations.change_id {
        out.push_str(&format!(
            "Change-Id: I{}\n",
            change_id(parents, author, committer, message)
        ));
    }

    out
}

fn change_id(
    parents: &[ObjectId],
    author: &Attribution,
    committer: &Attribution,
    message: &str,
) -> String {
    let mut hasher = Sha1::new();

    for parent in parents {
        hasher.update(parent.as_bytes());
    }
    hasher.update(author.sanitized_name().as_bytes());
    hasher.update(b"\0");
    hasher.update(author.sanitized_email().as_bytes());
    hasher.update(b"\0");
    hasher.update(author.timestamp().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(committer.timestamp().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(message.as_bytes());

    let digest = hasher.finalize();
    ObjectId::from_raw(digest.into()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use regex::Regex;

    use crate::rev_ranges::RevRanges;

    fn rule(pattern: &str, replace: &str) -> EditMsgRule {
        EditMsgRule {
            regex: Regex::new(&format!("(?m){}", pattern)).unwrap(),
            replace: replace.to_string(),
            max: 0,
            final_rule: false,
            revs: RevRanges::default(),
        }
    }

    fn summary() -> ChangeSummary {
        ChangeSummary {
            added: vec!["a.txt".to_string(), "b.txt".to_string()],
            modified: vec!["c.txt".to_string()],
            deleted: Vec::new(),
            renamed: Vec::new(),
        }
    }

    #[test]
    fn plain_message_untouched() {
        let msg = assemble("fix the frobnicator", 3, &[], &summary());
        assert_eq!(msg, "fix the frobnicator");
    }

    #[test]
    fn edit_chain_applies_in_order() {
        let first = rule("bug(\\d+)", "bug #$1");
        let second = rule("#42", "#42 (known)");
        let msg = assemble("fixes bug42", 3, &[&first, &second], &summary());
        assert_eq!(msg, "fixes bug #42 (known)");
    }

    #[test]
    fn final_rule_stops_chain() {
        let mut first = rule("x", "y");
        first.final_rule = true;
        let second = rule("y", "z");
        let msg = assemble("x", 3, &[&first, &second], &summary());
        assert_eq!(msg, "y");
    }

    #[test]
    fn max_caps_substitutions() {
        let mut capped = rule("a", "b");
        capped.max = 2;
        let msg = assemble("aaaa", 3, &[&capped], &summary());
        assert_eq!(msg, "bbaa");
    }

    #[test]
    fn revs_gate_rules() {
        let mut gated = rule("x", "y");
        gated.revs = RevRanges::parse("5-6").unwrap();
        assert_eq!(assemble("x", 4, &[&gated], &summary()), "x");
        assert_eq!(assemble("x", 5, &[&gated], &summary()), "y");
    }

    #[test]
    fn multiline_anchors() {
        let multi = rule("^Checked in .*$", "");
        let msg = assemble("Checked in by admin\nreal text", 3, &[&multi], &summary());
        assert_eq!(msg, "\nreal text");
    }

    #[test]
    fn headless_message_gets_subject() {
        let msg = assemble("\n\ndetails here", 3, &[], &summary());
        assert_eq!(msg, "Added 2 files, changed 1 file\n\ndetails here");
    }

    #[test]
    fn empty_message_gets_full_summary() {
        let msg = assemble("", 3, &[], &summary());
        assert_eq!(
            msg,
            "Added 2 files, changed 1 file\n\nA a.txt\nA b.txt\nM c.txt"
        );
    }

    #[test]
    fn carry_over_prepends() {
        assert_eq!(prepend_carry_over("fix feature", "typo"), "typo\nfix feature");
        assert_eq!(prepend_carry_over("fix feature", ""), "fix feature");
        assert_eq!(prepend_carry_over("", "typo"), "typo");
    }

    #[test]
    fn taglines() {
        let author = Attribution::new("kim", "kim@localhost", 100);
        let committer = author.clone();
        let decorations = Decorations {
            revision_id: true,
            change_id: true,
        };

        let msg = append_taglines("subject\n", 7, decorations, &[], &author, &committer);
        assert!(msg.starts_with("subject\n\nVSS-revision: 7\nChange-Id: I"));

        // The change id is stable for identical inputs.
        let again = append_taglines("subject\n", 7, decorations, &[], &author, &committer);
        assert_eq!(msg, again);

        // ... and differs when the message differs.
        let other = append_taglines("other\n", 7, decorations, &[], &author, &committer);
        assert_ne!(msg, other);
    }

    #[test]
    fn no_decorations_is_identity() {
        let author = Attribution::new("kim", "kim@localhost", 100);
        let msg = append_taglines(
            "subject\n",
            7,
            Decorations::default(),
            &[],
            &author,
            &author,
        );
        assert_eq!(msg, "subject\n");
    }

    #[test]
    fn summary_lines() {
        let mut s = summary();
        s.renamed.push(("old.txt".to_string(), "new.txt".to_string()));
        assert_eq!(s.subject_line(), "Added 2 files, changed 1 file, renamed 1 file");
        assert!(s.full_text().contains("R old.txt -> new.txt"));

        assert_eq!(ChangeSummary::default().subject_line(), "No changes");
    }
}
