//! Mapping of VSS short usernames to Git author identities.
//!
//! The map is a JSON object keyed by short name:
//!
//! ```json
//! { "kim": { "Name": "Kim Doe", "Email": "kim@example.com" } }
//! ```
//!
//! Unknown usernames fall back to `<username>@localhost`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuthorEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Email")]
    pub email: String,
}

/// The authors map, plus the set of usernames seen during the run so a
/// template file can be produced with `--make-authors-map`.
#[derive(Clone, Debug, Default)]
pub struct AuthorsMap {
    entries: BTreeMap<String, AuthorEntry>,
    seen: BTreeMap<String, u32>,
}

impl AuthorsMap {
    pub fn new() -> AuthorsMap {
        AuthorsMap::default()
    }

    pub fn load(path: &Path) -> io::Result<AuthorsMap> {
        let text = fs::read_to_string(path)?;
        let entries: BTreeMap<String, AuthorEntry> = serde_json::from_str(&text)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(AuthorsMap {
            entries,
            seen: BTreeMap::new(),
        })
    }

    /// Resolve a short username to (name, email), counting it as seen.
    pub fn resolve(&mut self, username: &str) -> (String, String) {
        *self.seen.entry(username.to_string()).or_insert(0) += 1;

        match self.entries.get(username) {
            Some(entry) => (entry.name.clone(), entry.email.clone()),
            None => (username.to_string(), format!("{}@localhost", username)),
        }
    }

    pub fn is_mapped(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    /// Usernames seen during the run that have no map entry.
    pub fn unmapped(&self) -> Vec<&str> {
        self.seen
            .keys()
            .filter(|name| !self.entries.contains_key(name.as_str()))
            .map(|name| name.as_str())
            .collect()
    }

    /// Write a JSON template covering every username seen during the run.
    /// Existing entries are carried over unchanged.
    pub fn write_template(&self, path: &Path) -> io::Result<()> {
        let mut template: BTreeMap<&str, AuthorEntry> = BTreeMap::new();

        for name in self.seen.keys() {
            let entry = self.entries.get(name).cloned().unwrap_or(AuthorEntry {
                name: name.clone(),
                email: format!("{}@localhost", name),
            });
            template.insert(name, entry);
        }

        let text = serde_json::to_string_pretty(&template)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, text + "\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn unknown_user_falls_back_to_localhost() {
        let mut map = AuthorsMap::new();
        let (name, email) = map.resolve("kim");
        assert_eq!(name, "kim");
        assert_eq!(email, "kim@localhost");
        assert_eq!(map.unmapped(), vec!["kim"]);
    }

    #[test]
    fn load_and_resolve() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authors.json");
        fs::write(
            &path,
            r#"{ "kim": { "Name": "Kim Doe", "Email": "kim@example.com" } }"#,
        )
        .unwrap();

        let mut map = AuthorsMap::load(&path).unwrap();
        let (name, email) = map.resolve("kim");
        assert_eq!(name, "Kim Doe");
        assert_eq!(email, "kim@example.com");
        assert!(map.unmapped().is_empty());
        assert!(map.is_mapped("kim"));
        assert!(!map.is_mapped("sam"));
    }

    #[test]
    fn template_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.json");

        let mut map = AuthorsMap::new();
        map.resolve("sam");
        map.resolve("kim");
        map.resolve("sam");
        map.write_template(&path).unwrap();

        let reloaded = AuthorsMap::load(&path).unwrap();
        assert!(reloaded.is_mapped("kim"));
        assert!(reloaded.is_mapped("sam"));
        assert_eq!(reloaded.entries.get("sam").unwrap().email, "sam@localhost");
    }

    #[test]
    fn bad_json_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authors.json");
        fs::write(&path, "not json").unwrap();

        let err = AuthorsMap::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
