//! Command-line-derived run context.
//!
//! The CLI layer resolves arguments into one immutable [`RunOptions`] value
//! that the config loader and the engine receive; nothing engine-side reads
//! ambient globals.

use std::path::PathBuf;

use crate::config::LoadOptions;
use crate::content::DEFAULT_HASH_WORKERS;
use crate::errors::ConfigError;
use crate::message::Decorations;
use crate::pattern::CombinedPattern;
use crate::vars::VarMap;

/// One `--extract-file <vss-path>,r<rev> <dest>` request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractFile {
    pub path: String,
    pub rev: u32,
    pub dest: PathBuf,
}

impl ExtractFile {
    /// Parse the `<vss-path>,r<rev>` form.
    pub fn parse(spec: &str, dest: &str) -> Result<ExtractFile, ConfigError> {
        let bad = || ConfigError::BadRevRange {
            text: spec.to_string(),
        };

        let (path, rev) = spec.rsplit_once(",r").ok_or_else(bad)?;
        let rev = rev.parse().map_err(|_| bad())?;

        Ok(ExtractFile {
            path: path.to_string(),
            rev,
            dest: PathBuf::from(dest),
        })
    }
}

/// Everything the engine needs from the command line.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub dump_root: PathBuf,
    pub config_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub end_revision: Option<u32>,
    pub quiet: bool,
    /// Progress update period in seconds; `None` disables unless stderr is
    /// a terminal.
    pub progress: Option<f64>,
    pub verbose: Vec<String>,

    pub trunk: String,
    pub branches: String,
    pub tags: String,
    pub user_branches: Vec<String>,
    pub map_trunk_to: String,
    pub use_default_config: bool,

    pub path_filter: Option<CombinedPattern>,
    pub project_filter: Option<CombinedPattern>,

    pub target_repo: Option<PathBuf>,
    pub label_ref_root: String,
    pub decorations: Decorations,
    pub create_revision_refs: bool,
    pub retab_only: bool,
    pub no_indent_reformat: bool,
    pub append_to_refs: Vec<String>,
    pub authors_map: Option<PathBuf>,
    pub make_authors_map: Option<PathBuf>,
    pub sha1_map: Option<PathBuf>,
    /// Namespaces to prune; an empty string means the default
    /// `heads/`+`tags/` pair.
    pub prune_refs: Option<Vec<String>>,
    pub extract_files: Vec<ExtractFile>,

    pub hash_workers: usize,
    pub commit_workers: usize,
}

impl Default for RunOptions {
    fn default() -> RunOptions {
        RunOptions {
            dump_root: PathBuf::new(),
            config_file: None,
            log_file: None,
            end_revision: None,
            quiet: false,
            progress: None,
            verbose: Vec::new(),
            trunk: "trunk".to_string(),
            branches: "branches".to_string(),
            tags: "tags".to_string(),
            user_branches: vec![
                "users/branches".to_string(),
                "branches/users".to_string(),
            ],
            map_trunk_to: "main".to_string(),
            use_default_config: true,
            path_filter: None,
            project_filter: None,
            target_repo: None,
            label_ref_root: "refs/tags/".to_string(),
            decorations: Decorations::default(),
            create_revision_refs: false,
            retab_only: false,
            no_indent_reformat: false,
            append_to_refs: Vec::new(),
            authors_map: None,
            make_authors_map: None,
            sha1_map: None,
            prune_refs: None,
            extract_files: Vec::new(),
            hash_workers: DEFAULT_HASH_WORKERS,
            commit_workers: 4,
        }
    }
}

impl RunOptions {
    /// Bind the command-line variables and build the config loader inputs.
    pub fn load_options(&self) -> LoadOptions {
        let mut vars = VarMap::new();
        vars.set("Trunk", &self.trunk);
        vars.set("Branches", &self.branches);
        vars.set("Tags", &self.tags);
        vars.set("MapTrunkTo", &self.map_trunk_to);
        vars.set("UserBranches", &alternation(&self.user_branches));

        LoadOptions {
            vars,
            use_default_config: self.use_default_config,
        }
    }

    /// The namespaces `--prune-refs` selects, with the bare-flag default.
    pub fn prune_namespaces(&self) -> Vec<String> {
        match &self.prune_refs {
            None => Vec::new(),
            Some(values) => {
                let mut namespaces = Vec::new();
                for value in values {
                    if value.is_empty() {
                        namespaces.push("heads/".to_string());
                        namespaces.push("tags/".to_string());
                    } else {
                        namespaces.push(normalize_namespace(value));
                    }
                }
                namespaces
            }
        }
    }
}

/// Build a brace alternation from a list, or the single item itself.
fn alternation(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [single] => single.clone(),
        many => format!("{{{}}}", many.join(",")),
    }
}

/// `heads` -> `heads/`, `refs/heads/` -> `heads/`.
fn normalize_namespace(value: &str) -> String {
    let value = value.strip_prefix("refs/").unwrap_or(value);
    let value = value.trim_end_matches('/');
    format!("{}/", value)
}

/// Combine repeatable, comma-separated glob options (`--path-filter`,
/// `--project`) into one pattern.
pub fn combine_globs(values: &[String]) -> Result<Option<CombinedPattern>, ConfigError> {
    let parts: Vec<&str> = values
        .iter()
        .flat_map(|value| value.split(','))
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return Ok(None);
    }

    Ok(Some(CombinedPattern::compile(&parts.join(";"))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_file_spec() {
        let x = ExtractFile::parse("trunk/a.txt,r15", "out.txt").unwrap();
        assert_eq!(x.path, "trunk/a.txt");
        assert_eq!(x.rev, 15);
        assert_eq!(x.dest, PathBuf::from("out.txt"));

        assert!(ExtractFile::parse("trunk/a.txt", "out").is_err());
        assert!(ExtractFile::parse("trunk/a.txt,rX", "out").is_err());
    }

    #[test]
    fn user_branches_become_alternation() {
        let options = RunOptions::default();
        let load = options.load_options();
        assert_eq!(
            load.vars.expand("$UserBranches").unwrap(),
            "{users/branches,branches/users}"
        );
    }

    #[test]
    fn prune_namespace_defaults() {
        let mut options = RunOptions::default();
        assert!(options.prune_namespaces().is_empty());

        options.prune_refs = Some(vec!["".to_string()]);
        assert_eq!(options.prune_namespaces(), vec!["heads/", "tags/"]);

        options.prune_refs = Some(vec!["refs/archive".to_string()]);
        assert_eq!(options.prune_namespaces(), vec!["archive/"]);
    }

    #[test]
    fn combine_glob_lists() {
        // Subpatterns are tested in order, so negations come first.
        let combined = combine_globs(&[
            "!**/secret/**".to_string(),
            "trunk/**,branches/**".to_string(),
        ])
        .unwrap()
        .unwrap();

        assert!(combined.matches("trunk/a.txt", false).is_some());
        assert!(combined.matches("branches/x/b.txt", false).is_some());
        assert!(combined.matches("tags/v1/c.txt", false).is_none());
        assert!(combined
            .matches("trunk/secret/d.txt", false)
            .is_none());

        assert!(combine_globs(&[]).unwrap().is_none());
    }
}
