//! A person's identity combined with the timestamp of an action.
//!
//! Attributions become the author and committer of converted commits. VSS
//! records times in UTC, so the timezone offset is always zero here; the
//! type still renders it in git's canonical form.

use chrono::{TimeZone, Utc};

/// Identity (name, e-mail) plus a Unix timestamp in seconds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribution {
    name: String,
    email: String,
    timestamp: i64,
}

impl Attribution {
    pub fn new(name: &str, email: &str, timestamp: i64) -> Attribution {
        Attribution {
            name: name.to_string(),
            email: email.to_string(),
            timestamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Sanitized name, with control characters and angle brackets removed.
    pub fn sanitized_name(&self) -> String {
        sanitize(&self.name)
    }

    pub fn sanitized_email(&self) -> String {
        sanitize(&self.email)
    }

    /// The date string handed to git via `GIT_AUTHOR_DATE` /
    /// `GIT_COMMITTER_DATE` (raw internal format).
    pub fn git_date(&self) -> String {
        format!("{} +0000", self.timestamp)
    }

    /// Human-readable UTC rendering for logs.
    pub fn display_date(&self) -> String {
        match Utc.timestamp_opt(self.timestamp, 0).single() {
            Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("@{}", self.timestamp),
        }
    }
}

fn sanitize(s: &str) -> String {
    let mut result = String::new();
    for c in s.trim().chars() {
        // Control characters (except CR) and angle brackets corrupt the
        // commit header format.
        match c as u32 {
            0..=12 => (),
            14..=31 => (),
            60 | 62 => (),
            _ => result.push(c),
        }
    }
    result
}

impl std::fmt::Display for Attribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {}",
            self.sanitized_name(),
            self.sanitized_email(),
            self.git_date()
        )
    }
}
