//! Deciding which git ref (if any) a VSS directory becomes.
//!
//! For each observed directory the mapper walks the active projects' rule
//! lists in order (project rules first, then inherited `<Default>` rules,
//! then the hardcoded defaults) and returns the first decisive outcome.
//! Ref names then pass through `<MapRef>` rewrites, `<Replace>` character
//! substitution, validity scrubbing, and collision disambiguation.

use std::collections::{HashMap, HashSet};

use crate::config::{ConfigModel, ProjectScope};
use crate::errors::Warning;
use crate::pattern::{self, CombinedPattern, MatchCaptures};
use crate::refname;

/// Outcome of mapping one directory path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapDecision {
    /// `<UnmapPath>` matched this directory or an ancestor: neither it nor
    /// its descendants become branches through this walk.
    Blocked,
    /// `<MapPath>` without `<Refname>` matched: this directory is
    /// explicitly not a branch; descendants keep their own chances.
    Unmapped,
    /// No rule matched; reported once per directory.
    NoMatch,
    /// The directory becomes a branch.
    Mapped(MappedBranch),
}

/// Everything the engine needs to allocate a branch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MappedBranch {
    /// Final, unique ref name. `None` when a `<MapRef>` deleted the ref:
    /// the branch is still converted, its ref is never emitted.
    pub refname: Option<String>,
    pub revisions_ref: Option<String>,
    pub label_ref_root: String,
    pub delete_if_merged: bool,
    /// Index of the deciding project in `ConfigModel::projects`.
    pub project: usize,
    /// Index of the deciding `MapRule` within that project.
    pub rule: usize,
}

pub struct Mapper {
    /// `--label-ref-root` fallback.
    label_ref_root_default: String,
    /// `--project` filter, if any.
    project_filter: Option<CombinedPattern>,
    /// refname -> VSS path that claimed it.
    claimed: HashMap<String, String>,
    /// Directories already reported as unmapped.
    reported: HashSet<String>,
}

impl Mapper {
    pub fn new(label_ref_root_default: &str, project_filter: Option<CombinedPattern>) -> Mapper {
        Mapper {
            label_ref_root_default: label_ref_root_default.to_string(),
            project_filter,
            claimed: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// The indices of projects active for `path`, honoring `Path` globs,
    /// `ExplicitOnly`, the `--project` filter, and `NeedsProjects`.
    pub fn active_projects(&self, config: &ConfigModel, path: &str) -> Vec<usize> {
        let mut active: Vec<usize> = config
            .projects
            .iter()
            .enumerate()
            .filter(|(_, project)| self.project_selected(project, path))
            .map(|(i, _)| i)
            .collect();

        // NeedsProjects: drop projects whose requirements are not active,
        // repeating until stable.
        loop {
            let names: HashSet<&str> = active
                .iter()
                .map(|&i| config.projects[i].name.as_str())
                .collect();
            let before = active.len();
            active.retain(|&i| {
                config.projects[i]
                    .needs_projects
                    .iter()
                    .all(|needed| names.contains(needed.as_str()))
            });
            if active.len() == before {
                break;
            }
        }

        active
    }

    fn project_selected(&self, project: &ProjectScope, path: &str) -> bool {
        if let Some(glob) = &project.path {
            if glob.matches(path, true).is_none() {
                return false;
            }
        }
        if project.builtin {
            return true;
        }

        match &self.project_filter {
            Some(filter) => filter.matches(&project.name, false).is_some(),
            None => !project.explicit_only,
        }
    }

    /// Map a directory path (normalized, relative to the VSS root).
    pub fn map_directory(
        &mut self,
        config: &ConfigModel,
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> MapDecision {
        let active = self.active_projects(config, path);

        for &project_idx in &active {
            let project = &config.projects[project_idx];

            for (rule_idx, rule) in project.map_rules.iter().enumerate() {
                if rule.unmap {
                    if unmap_matches(&rule.pattern, path) {
                        return MapDecision::Blocked;
                    }
                    continue;
                }

                let caps = match rule.pattern.matches(path, true) {
                    Some(caps) => caps,
                    None => continue,
                };

                let template = match &rule.refname {
                    Some(template) => template.clone(),
                    None => return MapDecision::Unmapped,
                };

                return self.finish_mapping(
                    config,
                    &active,
                    project_idx,
                    rule_idx,
                    path,
                    &template,
                    &caps,
                    warnings,
                );
            }
        }

        if self.reported.insert(path.to_string()) {
            warnings.push(Warning::Mapping(format!(
                "directory `{}` is not mapped to any branch",
                path
            )));
        }
        MapDecision::NoMatch
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_mapping(
        &mut self,
        config: &ConfigModel,
        active: &[usize],
        project_idx: usize,
        rule_idx: usize,
        path: &str,
        template: &str,
        caps: &MatchCaptures,
        warnings: &mut Vec<Warning>,
    ) -> MapDecision {
        let project = &config.projects[project_idx];
        let rule = &project.map_rules[rule_idx];

        let substituted = match pattern::substitute(template, caps, &project.vars) {
            Ok(name) => name,
            Err(err) => {
                warnings.push(Warning::Mapping(format!(
                    "refname for `{}` failed substitution: {}",
                    path, err
                )));
                return MapDecision::Unmapped;
            }
        };

        let mut refname = Some(ensure_refs_prefix(&substituted));

        // <MapRef> rewrites run before <Replace> character substitution.
        // Every active scope contributes, in walk order.
        'rewrites: for &idx in active {
            let scope = &config.projects[idx];
            for map_ref in &scope.map_refs {
                let current = match &refname {
                    Some(name) => name.clone(),
                    None => break 'rewrites,
                };
                if let Some(ref_caps) = map_ref.pattern.matches(&current, false) {
                    refname = match &map_ref.new_ref {
                        Some(new_ref) => {
                            match pattern::substitute(new_ref, &ref_caps, &scope.vars) {
                                Ok(name) => Some(ensure_refs_prefix(&name)),
                                Err(err) => {
                                    warnings.push(Warning::Mapping(format!(
                                        "<MapRef> rewrite of `{}` failed: {}",
                                        current, err
                                    )));
                                    Some(current)
                                }
                            }
                        }
                        None => None,
                    };
                }
            }
        }

        if let Some(name) = &refname {
            let mut replaced = name.clone();
            for &idx in active {
                for (from, to) in &config.projects[idx].replaces {
                    replaced = replaced.replace(from.as_str(), to.as_str());
                }
            }

            if refname::check(&replaced).is_err() {
                let scrubbed = refname::scrub(&replaced);
                warnings.push(Warning::Mapping(format!(
                    "ref name `{}` for `{}` is not valid; using `{}`",
                    replaced, path, scrubbed
                )));
                replaced = scrubbed;
            }

            refname = self.claim_unique(&replaced, path, warnings);
        }

        let revisions_ref = rule
            .revisions_ref
            .clone()
            .or_else(|| refname.as_deref().map(derive_revisions_ref));

        let label_ref_root = rule
            .label_ref_root
            .clone()
            .or_else(|| project.label_ref_root.clone())
            .unwrap_or_else(|| self.label_ref_root_default.clone());

        MapDecision::Mapped(MappedBranch {
            refname,
            revisions_ref,
            label_ref_root,
            delete_if_merged: rule.delete_if_merged,
            project: project_idx,
            rule: rule_idx,
        })
    }

    /// Claim a ref name for a VSS path, disambiguating collisions with the
    /// smallest `__<N>` suffix. Also used for label (tag) refs.
    pub fn claim_unique(
        &mut self,
        refname: &str,
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        match self.claimed.get(refname) {
            None => {
                self.claimed
                    .insert(refname.to_string(), path.to_string());
                return Some(refname.to_string());
            }
            Some(owner) if owner == path => return Some(refname.to_string()),
            Some(_) => (),
        }

        for n in 1..100 {
            let candidate = format!("{}__{}", refname, n);
            if !self.claimed.contains_key(&candidate) {
                warnings.push(Warning::Mapping(format!(
                    "ref name `{}` already mapped from `{}`; `{}` renamed to `{}`",
                    refname, self.claimed[refname], path, candidate
                )));
                self.claimed.insert(candidate.clone(), path.to_string());
                return Some(candidate);
            }
        }

        warnings.push(Warning::Mapping(format!(
            "unable to find a non-conflicting name for `{}`; adjust the map configuration",
            refname
        )));
        None
    }

    /// True if some earlier directory claimed this exact ref.
    pub fn is_claimed(&self, refname: &str) -> bool {
        self.claimed.contains_key(refname)
    }
}

fn ensure_refs_prefix(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/{}", name)
    }
}

/// Where per-revision refs for a branch live: `refs/heads/X` maps to
/// `refs/revisions/X`, any other `refs/...` keeps its tail under
/// `refs/revisions/`.
fn derive_revisions_ref(refname: &str) -> String {
    if let Some(tail) = refname.strip_prefix("refs/heads/") {
        format!("refs/revisions/{}", tail)
    } else if let Some(tail) = refname.strip_prefix("refs/") {
        format!("refs/revisions/{}", tail)
    } else {
        format!("refs/revisions/{}", refname)
    }
}

/// An `<UnmapPath>` blocks the matching directory and its descendants, so
/// every ancestor prefix is tested too.
fn unmap_matches(pattern: &CombinedPattern, path: &str) -> bool {
    if pattern.matches(path, true).is_some() {
        return true;
    }

    for (i, c) in path.char_indices() {
        if c == '/' && pattern.matches(&path[..i], true).is_some() {
            return true;
        }
    }

    false
}
