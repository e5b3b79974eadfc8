//! The conversion configuration model.
//!
//! Configuration is loaded from an XML file with a `<Projects>` root
//! holding an optional `<Default>` scope and any number of `<Project>`
//! scopes. Loading proceeds: parse XML, bind hardcoded/CLI variables,
//! apply `<Default>`, then each `<Project>`. Inheritance rules:
//!
//! * `<Vars>` and `<Replace>` from the command line are always inherited;
//!   `<Default>`-level overrides are skipped for projects with
//!   `InheritDefault="No"`.
//! * `<MapPath>`/`<UnmapPath>` from `<Default>` are appended *after* each
//!   project's own list; `<MapRef>`, `<Chmod>`, `<IgnoreFiles>` and
//!   `<EditMsg>` likewise. `InheritDefaultMappings="No"` suppresses all of
//!   these appends.
//! * `<CopyPath>`/`<MergePath>` inside `<Default>` are ignored.
//! * Variable references in a scope's own texts are expanded at load time
//!   with the variable map visible where the text appears; a `<Vars>`
//!   redefinition affects only subsequent siblings.

use std::fs;
use std::path::Path;

use regex::Regex;
use roxmltree::{Document, Node};

use crate::errors::ConfigError;
use crate::file_mode::FileMode;
use crate::format::{FormatSpec, Retab};
use crate::pattern::CombinedPattern;
use crate::rev_ranges::RevRanges;
use crate::vars::VarMap;

/// A `<MapPath>` or `<UnmapPath>` rule, walked in order by the mapper.
#[derive(Clone, Debug)]
pub struct MapRule {
    /// `<UnmapPath>`: the directory and all descendants never become a
    /// branch. A `<MapPath>` without `<Refname>` unmaps only the matching
    /// subtree.
    pub unmap: bool,
    pub pattern: CombinedPattern,
    /// Refname template; substituted against the pattern captures.
    pub refname: Option<String>,
    pub label_ref_root: Option<String>,
    pub revisions_ref: Option<String>,
    pub delete_if_merged: bool,
    pub edit_msgs: Vec<EditMsgRule>,
    pub formatting: Vec<FormattingRule>,
    pub inject_files: Vec<InjectFileRule>,
    pub empty_dir_placeholder: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MapRefRule {
    pub pattern: CombinedPattern,
    /// `None` deletes the ref (the branch is converted, its ref is not
    /// emitted).
    pub new_ref: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EditMsgRule {
    pub regex: Regex,
    pub replace: String,
    /// Cap on substitutions per message; 0 means unlimited.
    pub max: usize,
    /// Stop the edit chain once this rule substitutes.
    pub final_rule: bool,
    pub revs: RevRanges,
}

#[derive(Clone, Debug)]
pub struct SkipCommitRule {
    pub revs: RevRanges,
    pub rev_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct InjectFileRule {
    /// Worktree-relative path inside the branch.
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct AddFileRule {
    pub revs: RevRanges,
    pub rev_id: Option<String>,
    /// VSS path of the file to create.
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct DeletePathRule {
    pub revs: RevRanges,
    pub rev_id: Option<String>,
    pub pattern: CombinedPattern,
}

#[derive(Clone, Debug)]
pub struct CopyPathRule {
    /// VSS directory whose branch gets the explicit parent.
    pub path: String,
    pub from_path: String,
    pub from_rev: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct MergePathRule {
    pub path: String,
    pub from_path: String,
    pub revs: RevRanges,
}

#[derive(Clone, Debug)]
pub struct ChmodRule {
    pub pattern: CombinedPattern,
    pub mode: FileMode,
}

#[derive(Clone, Debug)]
pub struct FormattingRule {
    pub pattern: CombinedPattern,
    pub no_reindent: Option<CombinedPattern>,
    pub spec: FormatSpec,
}

/// One `<Project>` scope with everything inherited already folded in.
#[derive(Clone, Debug)]
pub struct ProjectScope {
    pub name: String,
    pub path: Option<CombinedPattern>,
    /// The synthetic scope carrying the hardcoded mappings; always active,
    /// never subject to the `--project` filter.
    pub builtin: bool,
    pub explicit_only: bool,
    pub needs_projects: Vec<String>,
    /// Ref namespaces to prune for this project (the `Refs` attribute).
    pub prune_refs: Vec<String>,
    pub vars: VarMap,
    pub replaces: Vec<(String, String)>,
    pub map_rules: Vec<MapRule>,
    pub map_refs: Vec<MapRefRule>,
    pub edit_msgs: Vec<EditMsgRule>,
    pub skip_commits: Vec<SkipCommitRule>,
    pub add_files: Vec<AddFileRule>,
    pub delete_paths: Vec<DeletePathRule>,
    pub copy_paths: Vec<CopyPathRule>,
    pub merge_paths: Vec<MergePathRule>,
    pub chmods: Vec<ChmodRule>,
    pub ignore_files: Vec<CombinedPattern>,
    pub formatting: Vec<FormattingRule>,
    pub label_ref_root: Option<String>,
    pub empty_dir_placeholder: Option<String>,
}

/// The loaded configuration: project scopes in document order.
#[derive(Clone, Debug, Default)]
pub struct ConfigModel {
    pub projects: Vec<ProjectScope>,
    /// Warnings produced while loading (ignored Default elements and the
    /// like), to be copied into the run log.
    pub load_warnings: Vec<String>,
}

/// Inputs the loader needs from the command line.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Variable bindings from hardcoded defaults and the command line
    /// (`$Trunk`, `$Branches`, `$UserBranches`, `$Tags`, `$MapTrunkTo`).
    pub vars: VarMap,
    /// Install the hardcoded trunk/branches/tags mappings last.
    pub use_default_config: bool,
}

impl LoadOptions {
    /// The standard bindings used when no command-line overrides exist.
    pub fn standard() -> LoadOptions {
        let mut vars = VarMap::new();
        vars.set("Trunk", "trunk");
        vars.set("Branches", "branches");
        vars.set("UserBranches", "{users/branches,branches/users}");
        vars.set("Tags", "tags");
        vars.set("MapTrunkTo", "main");

        LoadOptions {
            vars,
            use_default_config: true,
        }
    }
}

impl ConfigModel {
    /// Load from an XML file.
    pub fn load_file(path: &Path, options: &LoadOptions) -> Result<ConfigModel, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        ConfigModel::load_str(&text, path, options)
    }

    /// Load from XML text; `path` is used for diagnostics only.
    pub fn load_str(
        text: &str,
        path: &Path,
        options: &LoadOptions,
    ) -> Result<ConfigModel, ConfigError> {
        let doc = Document::parse(text).map_err(|err| ConfigError::MalformedXml {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

        let root = doc.root_element();
        if root.tag_name().name() != "Projects" {
            return Err(ConfigError::UnknownElement {
                element: root.tag_name().name().to_string(),
                scope: "document root".to_string(),
            });
        }

        let mut default_scope: Option<ParsedScope> = None;
        let mut parsed_projects = Vec::new();
        let mut load_warnings = Vec::new();

        for child in root.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "Default" => {
                    let mut vars = options.vars.clone();
                    let scope = parse_scope(child, &mut vars, true, &mut load_warnings)?;
                    default_scope = Some(scope);
                }
                "Project" => {
                    parsed_projects.push(child);
                }
                other => {
                    return Err(ConfigError::UnknownElement {
                        element: other.to_string(),
                        scope: "Projects".to_string(),
                    });
                }
            }
        }

        let default_scope = default_scope.unwrap_or_default();

        let mut projects = Vec::new();
        for node in &parsed_projects {
            projects.push(build_project(
                *node,
                &default_scope,
                options,
                &mut load_warnings,
            )?);
        }

        // Without any <Project>, the Default scope covers the whole
        // database.
        if projects.is_empty() {
            projects.push(catch_all_project(&default_scope, options));
        }

        // The hardcoded mappings also live in a synthetic scope at the end
        // of the walk order, so directories outside every project still map.
        if options.use_default_config {
            projects.push(builtin_project(&default_scope, options)?);
        }

        let names: Vec<String> = projects.iter().map(|p| p.name.clone()).collect();
        for project in &projects {
            for needed in &project.needs_projects {
                if !names.iter().any(|n| n == needed) {
                    return Err(ConfigError::UnknownNeededProject {
                        project: project.name.clone(),
                        needed: needed.clone(),
                    });
                }
            }
        }

        Ok(ConfigModel {
            projects,
            load_warnings,
        })
    }

    /// The configuration used when no `--config` file is given: hardcoded
    /// mappings only.
    pub fn builtin(options: &LoadOptions) -> Result<ConfigModel, ConfigError> {
        ConfigModel::load_str("<Projects/>", Path::new("(builtin)"), options)
    }
}

/// Raw contents of a `<Default>` or `<Project>` element.
#[derive(Clone, Debug, Default)]
struct ParsedScope {
    var_overrides: Vec<(String, String)>,
    replaces: Vec<(String, String)>,
    map_rules: Vec<MapRule>,
    map_refs: Vec<MapRefRule>,
    edit_msgs: Vec<EditMsgRule>,
    skip_commits: Vec<SkipCommitRule>,
    add_files: Vec<AddFileRule>,
    delete_paths: Vec<DeletePathRule>,
    copy_paths: Vec<CopyPathRule>,
    merge_paths: Vec<MergePathRule>,
    chmods: Vec<ChmodRule>,
    ignore_files: Vec<CombinedPattern>,
    formatting: Vec<FormattingRule>,
    label_ref_root: Option<String>,
    empty_dir_placeholder: Option<String>,
}

fn build_project(
    node: Node,
    default_scope: &ParsedScope,
    options: &LoadOptions,
    warnings: &mut Vec<String>,
) -> Result<ProjectScope, ConfigError> {
    let name = node.attribute("Name").unwrap_or("(unnamed)").to_string();
    let inherit_default = yes_no(node.attribute("InheritDefault"), true);
    let inherit_mappings = yes_no(node.attribute("InheritDefaultMappings"), true);
    let explicit_only = yes_no(node.attribute("ExplicitOnly"), false);

    let needs_projects = list_attribute(node.attribute("NeedsProjects"));
    let prune_refs = list_attribute(node.attribute("Refs"));

    // Command-line vars always; Default overrides only when inherited.
    let mut vars = options.vars.clone();
    if inherit_default {
        for (k, v) in &default_scope.var_overrides {
            vars.set(k, v);
        }
    }

    let mut scope = parse_scope(node, &mut vars, false, warnings)?;

    let path = match node.attribute("Path") {
        Some(text) => Some(CombinedPattern::compile(&vars.expand(text)?)?),
        None => None,
    };

    if inherit_default {
        scope
            .replaces
            .extend(default_scope.replaces.iter().cloned());
        if scope.label_ref_root.is_none() {
            scope.label_ref_root = default_scope.label_ref_root.clone();
        }
        if scope.empty_dir_placeholder.is_none() {
            scope.empty_dir_placeholder = default_scope.empty_dir_placeholder.clone();
        }
    }

    if inherit_mappings {
        scope.map_rules.extend(default_scope.map_rules.iter().cloned());
        scope.map_refs.extend(default_scope.map_refs.iter().cloned());
        scope.edit_msgs.extend(default_scope.edit_msgs.iter().cloned());
        scope
            .skip_commits
            .extend(default_scope.skip_commits.iter().cloned());
        scope.add_files.extend(default_scope.add_files.iter().cloned());
        scope
            .delete_paths
            .extend(default_scope.delete_paths.iter().cloned());
        scope.chmods.extend(default_scope.chmods.iter().cloned());
        scope
            .ignore_files
            .extend(default_scope.ignore_files.iter().cloned());
        scope
            .formatting
            .extend(default_scope.formatting.iter().cloned());
    }

    if options.use_default_config {
        scope.map_rules.extend(hardcoded_map_rules(&vars)?);
    }

    Ok(ProjectScope {
        name,
        path,
        builtin: false,
        explicit_only,
        needs_projects,
        prune_refs,
        vars,
        replaces: scope.replaces,
        map_rules: scope.map_rules,
        map_refs: scope.map_refs,
        edit_msgs: scope.edit_msgs,
        skip_commits: scope.skip_commits,
        add_files: scope.add_files,
        delete_paths: scope.delete_paths,
        copy_paths: scope.copy_paths,
        merge_paths: scope.merge_paths,
        chmods: scope.chmods,
        ignore_files: scope.ignore_files,
        formatting: scope.formatting,
        label_ref_root: scope.label_ref_root,
        empty_dir_placeholder: scope.empty_dir_placeholder,
    })
}

fn builtin_project(
    default_scope: &ParsedScope,
    options: &LoadOptions,
) -> Result<ProjectScope, ConfigError> {
    let mut vars = options.vars.clone();
    for (k, v) in &default_scope.var_overrides {
        vars.set(k, v);
    }
    let map_rules = hardcoded_map_rules(&vars)?;

    Ok(ProjectScope {
        name: "(builtin)".to_string(),
        path: None,
        builtin: true,
        explicit_only: false,
        needs_projects: Vec::new(),
        prune_refs: Vec::new(),
        vars,
        replaces: Vec::new(),
        map_rules,
        map_refs: Vec::new(),
        edit_msgs: Vec::new(),
        skip_commits: Vec::new(),
        add_files: Vec::new(),
        delete_paths: Vec::new(),
        copy_paths: Vec::new(),
        merge_paths: Vec::new(),
        chmods: Vec::new(),
        ignore_files: Vec::new(),
        formatting: Vec::new(),
        label_ref_root: None,
        empty_dir_placeholder: None,
    })
}

fn catch_all_project(default_scope: &ParsedScope, options: &LoadOptions) -> ProjectScope {
    let scope = default_scope.clone();
    let mut vars = options.vars.clone();
    for (k, v) in &default_scope.var_overrides {
        vars.set(k, v);
    }

    ProjectScope {
        name: "(default)".to_string(),
        path: None,
        builtin: false,
        explicit_only: false,
        needs_projects: Vec::new(),
        prune_refs: Vec::new(),
        vars,
        replaces: scope.replaces,
        map_rules: scope.map_rules,
        map_refs: scope.map_refs,
        edit_msgs: scope.edit_msgs,
        skip_commits: scope.skip_commits,
        add_files: scope.add_files,
        delete_paths: scope.delete_paths,
        copy_paths: scope.copy_paths,
        merge_paths: scope.merge_paths,
        chmods: scope.chmods,
        ignore_files: scope.ignore_files,
        formatting: scope.formatting,
        label_ref_root: scope.label_ref_root,
        empty_dir_placeholder: scope.empty_dir_placeholder,
    }
}

/// The mappings installed when `--no-default-config` is absent:
/// `**/$Trunk`, `**/$UserBranches/*/*`, `**/$Branches/*`, `**/$Tags/*`.
fn hardcoded_map_rules(vars: &VarMap) -> Result<Vec<MapRule>, ConfigError> {
    let mut rules = Vec::new();

    push_map_rule(&mut rules, vars, "**/$Trunk", Some("refs/heads/$MapTrunkTo"))?;
    push_map_rule(
        &mut rules,
        vars,
        "**/$UserBranches/*/*",
        Some("refs/heads/users/$2/$3"),
    )?;
    push_map_rule(&mut rules, vars, "**/$Branches/*", Some("refs/heads/*"))?;
    push_map_rule(&mut rules, vars, "**/$Tags/*", Some("refs/tags/*"))?;

    Ok(rules)
}

fn push_map_rule(
    rules: &mut Vec<MapRule>,
    vars: &VarMap,
    path: &str,
    refname: Option<&str>,
) -> Result<(), ConfigError> {
    let expanded = vars.expand(path)?;
    let pattern = CombinedPattern::compile(&expanded)?;

    rules.push(MapRule {
        unmap: false,
        pattern,
        refname: refname.map(|r| r.to_string()),
        label_ref_root: None,
        revisions_ref: None,
        delete_if_merged: false,
        edit_msgs: Vec::new(),
        formatting: Vec::new(),
        inject_files: Vec::new(),
        empty_dir_placeholder: None,
    });

    if let Some(parent) = implicit_parent_block(&expanded) {
        rules.push(unmap_rule(&parent)?);
    }

    Ok(())
}

fn unmap_rule(pattern: &str) -> Result<MapRule, ConfigError> {
    Ok(MapRule {
        unmap: true,
        pattern: CombinedPattern::compile(pattern)?,
        refname: None,
        label_ref_root: None,
        revisions_ref: None,
        delete_if_merged: false,
        edit_msgs: Vec::new(),
        formatting: Vec::new(),
        inject_files: Vec::new(),
        empty_dir_placeholder: None,
    })
}

/// A rule path ending `/*` blocks its parent directory from becoming a
/// branch of its own (unless `BlockParent="No"`). A parent pattern that
/// would match everything is not installed.
fn implicit_parent_block(path: &str) -> Option<String> {
    let parent = path.strip_suffix("/*")?;
    if parent.is_empty() || parent == "*" || parent == "**" {
        return None;
    }
    Some(parent.to_string())
}

fn parse_scope(
    node: Node,
    vars: &mut VarMap,
    is_default: bool,
    warnings: &mut Vec<String>,
) -> Result<ParsedScope, ConfigError> {
    let scope_name = if is_default { "Default" } else { "Project" };
    let mut scope = ParsedScope::default();

    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "Vars" => {
                for var in child.children().filter(Node::is_element) {
                    let name = var.tag_name().name().to_string();
                    let value = var.text().unwrap_or("").trim().to_string();
                    vars.set(&name, &value);
                    scope.var_overrides.push((name, value));
                }
            }
            "Replace" => {
                let chars = required_attribute(child, "Chars")?;
                let with = child.attribute("With").unwrap_or("");
                scope
                    .replaces
                    .push((vars.expand(chars)?, vars.expand(with)?));
            }
            "MapPath" => scope.map_rules.extend(parse_map_path(child, vars)?),
            "UnmapPath" => {
                let text = element_text(child);
                let expanded = vars.expand(text.trim())?;
                scope.map_rules.push(unmap_rule(&expanded)?);
                if yes_no(child.attribute("BlockParent"), true) {
                    if let Some(parent) = implicit_parent_block(&expanded) {
                        scope.map_rules.push(unmap_rule(&parent)?);
                    }
                }
            }
            "MapRef" => {
                let mut pattern = None;
                let mut new_ref = None;
                for sub in child.children().filter(Node::is_element) {
                    match sub.tag_name().name() {
                        "Ref" => {
                            pattern = Some(CombinedPattern::compile(
                                &vars.expand(element_text(sub).trim())?,
                            )?)
                        }
                        "NewRef" => new_ref = Some(vars.expand(element_text(sub).trim())?),
                        other => {
                            return Err(ConfigError::UnknownElement {
                                element: other.to_string(),
                                scope: "MapRef".to_string(),
                            })
                        }
                    }
                }
                scope.map_refs.push(MapRefRule {
                    pattern: pattern.ok_or_else(|| ConfigError::MissingField {
                        element: "MapRef".to_string(),
                        what: "a <Ref> child".to_string(),
                    })?,
                    new_ref,
                });
            }
            "LabelRefRoot" => {
                scope.label_ref_root = Some(vars.expand(element_text(child).trim())?);
            }
            "EditMsg" => scope.edit_msgs.push(parse_edit_msg(child, vars)?),
            "SkipCommit" => {
                scope.skip_commits.push(SkipCommitRule {
                    revs: parse_revs_attribute(child)?,
                    rev_id: child.attribute("RevId").map(|s| s.to_string()),
                });
            }
            "InjectFile" => {
                warnings.push(format!(
                    "<InjectFile> outside <MapPath> is ignored in <{}>",
                    scope_name
                ));
            }
            "AddFile" => {
                scope.add_files.push(AddFileRule {
                    revs: parse_revs_attribute(child)?,
                    rev_id: child.attribute("RevId").map(|s| s.to_string()),
                    path: vars.expand(required_attribute(child, "Path")?)?,
                    data: element_text(child).into_bytes(),
                });
            }
            "DeletePath" => {
                scope.delete_paths.push(DeletePathRule {
                    revs: parse_revs_attribute(child)?,
                    rev_id: child.attribute("RevId").map(|s| s.to_string()),
                    pattern: CombinedPattern::compile(
                        &vars.expand(required_attribute(child, "Path")?)?,
                    )?,
                });
            }
            "CopyPath" => {
                if is_default {
                    warnings.push("<CopyPath> in <Default> is ignored".to_string());
                    continue;
                }
                scope.copy_paths.push(CopyPathRule {
                    path: vars.expand(required_attribute(child, "Path")?)?,
                    from_path: vars.expand(required_attribute(child, "FromPath")?)?,
                    from_rev: match child.attribute("FromRev") {
                        Some(text) => {
                            Some(text.parse().map_err(|_| ConfigError::BadRevRange {
                                text: text.to_string(),
                            })?)
                        }
                        None => None,
                    },
                });
            }
            "MergePath" => {
                if is_default {
                    warnings.push("<MergePath> in <Default> is ignored".to_string());
                    continue;
                }
                scope.merge_paths.push(MergePathRule {
                    path: vars.expand(required_attribute(child, "Path")?)?,
                    from_path: vars.expand(required_attribute(child, "FromPath")?)?,
                    revs: parse_revs_attribute(child)?,
                });
            }
            "Chmod" => {
                let mode_text = required_attribute(child, "Mode")?;
                let mode = FileMode::from_mode_text(mode_text).ok_or_else(|| {
                    ConfigError::BadFileMode {
                        mode: mode_text.to_string(),
                    }
                })?;
                scope.chmods.push(ChmodRule {
                    pattern: CombinedPattern::compile(
                        &vars.expand(required_attribute(child, "Path")?)?,
                    )?,
                    mode,
                });
            }
            "IgnoreFiles" => {
                scope.ignore_files.push(CombinedPattern::compile(
                    &vars.expand(element_text(child).trim())?,
                )?);
            }
            "Formatting" => scope.formatting.push(parse_formatting(child, vars)?),
            "EmptyDirPlaceholder" => {
                scope.empty_dir_placeholder = Some(element_text(child).trim().to_string());
            }
            other => {
                return Err(ConfigError::UnknownElement {
                    element: other.to_string(),
                    scope: scope_name.to_string(),
                });
            }
        }
    }

    Ok(scope)
}

fn parse_map_path(node: Node, vars: &VarMap) -> Result<Vec<MapRule>, ConfigError> {
    let mut path = None;
    let mut refname = None;
    let mut label_ref_root = None;
    let mut revisions_ref = None;
    let mut edit_msgs = Vec::new();
    let mut formatting = Vec::new();
    let mut inject_files = Vec::new();
    let mut empty_dir_placeholder = None;

    for sub in node.children().filter(Node::is_element) {
        match sub.tag_name().name() {
            "Path" => path = Some(vars.expand(element_text(sub).trim())?),
            "Refname" => refname = Some(vars.expand(element_text(sub).trim())?),
            "LabelRefRoot" => label_ref_root = Some(vars.expand(element_text(sub).trim())?),
            "RevisionsRef" => revisions_ref = Some(vars.expand(element_text(sub).trim())?),
            "EditMsg" => edit_msgs.push(parse_edit_msg(sub, vars)?),
            "Formatting" => formatting.push(parse_formatting(sub, vars)?),
            "InjectFile" => inject_files.push(InjectFileRule {
                path: vars.expand(required_attribute(sub, "Path")?)?,
                data: element_text(sub).into_bytes(),
            }),
            "EmptyDirPlaceholder" => {
                empty_dir_placeholder = Some(element_text(sub).trim().to_string())
            }
            other => {
                return Err(ConfigError::UnknownElement {
                    element: other.to_string(),
                    scope: "MapPath".to_string(),
                });
            }
        }
    }

    let path = path.ok_or_else(|| ConfigError::MissingField {
        element: "MapPath".to_string(),
        what: "a <Path> child".to_string(),
    })?;

    let mut rules = vec![MapRule {
        unmap: false,
        pattern: CombinedPattern::compile(&path)?,
        refname,
        label_ref_root,
        revisions_ref,
        delete_if_merged: yes_no(node.attribute("DeleteIfMerged"), false),
        edit_msgs,
        formatting,
        inject_files,
        empty_dir_placeholder,
    }];

    if yes_no(node.attribute("BlockParent"), true) {
        if let Some(parent) = implicit_parent_block(&path) {
            rules.push(unmap_rule(&parent)?);
        }
    }

    Ok(rules)
}

fn parse_edit_msg(node: Node, vars: &VarMap) -> Result<EditMsgRule, ConfigError> {
    let mut match_text = None;
    let mut replace = None;

    for sub in node.children().filter(Node::is_element) {
        match sub.tag_name().name() {
            "Match" => match_text = Some(element_text(sub)),
            "Replace" => replace = Some(vars.expand(&element_text(sub))?),
            other => {
                return Err(ConfigError::UnknownElement {
                    element: other.to_string(),
                    scope: "EditMsg".to_string(),
                });
            }
        }
    }

    let match_text = match_text.ok_or_else(|| ConfigError::MissingField {
        element: "EditMsg".to_string(),
        what: "a <Match> child".to_string(),
    })?;

    // Multiline mode: `^`/`$` match at line boundaries, `\A`/`\z` bound
    // the whole message, `(?s:...)` makes dot cross lines.
    let regex =
        Regex::new(&format!("(?m){}", match_text)).map_err(|err| ConfigError::BadRegex {
            pattern: match_text.clone(),
            detail: err.to_string(),
        })?;

    let max = match node.attribute("Max") {
        Some(text) => text.parse().map_err(|_| ConfigError::BadRevRange {
            text: text.to_string(),
        })?,
        None => 0,
    };

    Ok(EditMsgRule {
        regex,
        replace: replace.unwrap_or_default(),
        max,
        final_rule: yes_no(node.attribute("Final"), false),
        revs: parse_revs_attribute(node)?,
    })
}

fn parse_formatting(node: Node, vars: &VarMap) -> Result<FormattingRule, ConfigError> {
    let mut pattern = None;
    let mut no_reindent = None;
    let mut spec = FormatSpec::default();

    for sub in node.children().filter(Node::is_element) {
        match sub.tag_name().name() {
            "Path" => {
                pattern = Some(CombinedPattern::compile(
                    &vars.expand(element_text(sub).trim())?,
                )?)
            }
            "NoReindent" => {
                no_reindent = Some(CombinedPattern::compile(
                    &vars.expand(element_text(sub).trim())?,
                )?)
            }
            "FixEOL" => spec.fix_eol = true,
            "FixLastEOL" => spec.fix_last_eol = true,
            "TrimWhitespace" => spec.trim_trailing_whitespace = true,
            "TrimBackslash" => spec.trim_backslash = true,
            "Retab" => {
                let tab_size = match sub.attribute("TabSize") {
                    Some(text) => text.parse().map_err(|_| ConfigError::BadRevRange {
                        text: text.to_string(),
                    })?,
                    None => 4,
                };
                spec.retab = Some(Retab {
                    tabs: yes_no(sub.attribute("Tabs"), true),
                    tab_size,
                });
            }
            "Reindent" => spec.reindent = true,
            other => {
                return Err(ConfigError::UnknownElement {
                    element: other.to_string(),
                    scope: "Formatting".to_string(),
                });
            }
        }
    }

    let pattern = match pattern {
        Some(p) => p,
        None => CombinedPattern::compile("**")?,
    };

    Ok(FormattingRule {
        pattern,
        no_reindent,
        spec,
    })
}

fn parse_revs_attribute(node: Node) -> Result<RevRanges, ConfigError> {
    let text = node
        .attribute("Revs")
        .or_else(|| node.attribute("Rev"))
        .unwrap_or("");
    RevRanges::parse(text)
}

fn element_text(node: Node) -> String {
    node.text().unwrap_or("").to_string()
}

fn required_attribute<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Result<&'a str, ConfigError> {
    node.attribute(name).ok_or_else(|| ConfigError::MissingField {
        element: node.tag_name().name().to_string(),
        what: format!("attribute {}", name),
    })
}

fn yes_no(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(text) => text.eq_ignore_ascii_case("yes"),
        None => default,
    }
}

fn list_attribute(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(|c| c == ',' || c == ' ')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(xml: &str) -> ConfigModel {
        ConfigModel::load_str(xml, Path::new("test.xml"), &LoadOptions::standard()).unwrap()
    }

    #[test]
    fn empty_config_gets_hardcoded_rules() {
        let model = load("<Projects/>");
        assert_eq!(model.projects.len(), 2);
        assert_eq!(model.projects[0].name, "(default)");
        assert!(model.projects[0].map_rules.is_empty());

        let builtin = &model.projects[1];
        assert_eq!(builtin.name, "(builtin)");
        assert!(builtin.builtin);
        // trunk, user-branches (+parent block), branches (+parent block),
        // tags (+parent block)
        assert_eq!(builtin.map_rules.len(), 7);
        assert!(!builtin.map_rules[0].unmap);
        assert_eq!(
            builtin.map_rules[0].refname.as_deref(),
            Some("refs/heads/$MapTrunkTo")
        );
    }

    #[test]
    fn no_default_config_suppresses_hardcoded_rules() {
        let mut options = LoadOptions::standard();
        options.use_default_config = false;
        let model =
            ConfigModel::load_str("<Projects/>", Path::new("test.xml"), &options).unwrap();
        assert!(model.projects[0].map_rules.is_empty());
    }

    #[test]
    fn default_map_path_appends_after_project_rules() {
        let model = load(
            r#"<Projects>
                <Default>
                  <MapPath><Path>**/archive/*</Path><Refname>refs/archive/*</Refname></MapPath>
                </Default>
                <Project Name="app">
                  <MapPath><Path>app/next</Path><Refname>refs/heads/next</Refname></MapPath>
                </Project>
              </Projects>"#,
        );

        let project = &model.projects[0];
        assert_eq!(project.name, "app");
        assert_eq!(project.map_rules[0].refname.as_deref(), Some("refs/heads/next"));
        // Default's rule (plus its implicit parent block) follows.
        assert_eq!(project.map_rules[1].refname.as_deref(), Some("refs/archive/*"));
        assert!(project.map_rules[2].unmap);
    }

    #[test]
    fn inherit_default_mappings_no() {
        let model = load(
            r#"<Projects>
                <Default>
                  <IgnoreFiles>*.o</IgnoreFiles>
                </Default>
                <Project Name="a" InheritDefaultMappings="No"/>
                <Project Name="b"/>
              </Projects>"#,
        );

        assert!(model.projects[0].ignore_files.is_empty());
        assert_eq!(model.projects[1].ignore_files.len(), 1);
    }

    #[test]
    fn vars_expand_at_parse_time_and_redefine() {
        let model = load(
            r#"<Projects>
                <Project Name="p">
                  <Vars><Area>one</Area></Vars>
                  <MapPath><Path>$Area/trunk</Path><Refname>refs/heads/$Area</Refname></MapPath>
                  <Vars><Area>two</Area></Vars>
                  <MapPath><Path>$Area/trunk</Path><Refname>refs/heads/$Area</Refname></MapPath>
                </Project>
              </Projects>"#,
        );

        let rules = &model.projects[0].map_rules;
        assert_eq!(rules[0].pattern.source(), "one/trunk");
        assert_eq!(rules[0].refname.as_deref(), Some("refs/heads/one"));
        assert_eq!(rules[1].pattern.source(), "two/trunk");
        assert_eq!(rules[1].refname.as_deref(), Some("refs/heads/two"));
    }

    #[test]
    fn inherit_default_no_skips_default_vars() {
        let model = load(
            r#"<Projects>
                <Default>
                  <Vars><Area>default-area</Area></Vars>
                </Default>
                <Project Name="a">
                  <MapPath><Path>$Area/x</Path><Refname>refs/heads/x</Refname></MapPath>
                </Project>
                <Project Name="b" InheritDefault="No">
                  <Vars><Area>own-area</Area></Vars>
                  <MapPath><Path>$Area/x</Path><Refname>refs/heads/x</Refname></MapPath>
                </Project>
              </Projects>"#,
        );

        assert_eq!(
            model.projects[0].map_rules[0].pattern.source(),
            "default-area/x"
        );
        assert_eq!(model.projects[1].map_rules[0].pattern.source(), "own-area/x");
    }

    #[test]
    fn copy_path_in_default_is_ignored_with_warning() {
        let model = load(
            r#"<Projects>
                <Default>
                  <CopyPath Path="a" FromPath="b"/>
                  <MergePath Path="a" FromPath="b" Revs="3"/>
                </Default>
              </Projects>"#,
        );

        assert!(model.projects[0].copy_paths.is_empty());
        assert!(model.projects[0].merge_paths.is_empty());
        assert_eq!(model.load_warnings.len(), 2);
    }

    #[test]
    fn unknown_element_is_fatal() {
        let err = ConfigModel::load_str(
            "<Projects><Project Name='x'><Bogus/></Project></Projects>",
            Path::new("test.xml"),
            &LoadOptions::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownElement { .. }));
    }

    #[test]
    fn map_path_scope_elements() {
        let model = load(
            r#"<Projects>
                <Project Name="p">
                  <MapPath BlockParent="No" DeleteIfMerged="Yes">
                    <Path>**/branches/*</Path>
                    <Refname>refs/heads/*</Refname>
                    <LabelRefRoot>refs/tags/branches/</LabelRefRoot>
                    <EditMsg><Match>bug(\d+)</Match><Replace>bug #$1</Replace></EditMsg>
                    <InjectFile Path=".gitattributes">* text=auto
</InjectFile>
                  </MapPath>
                </Project>
              </Projects>"#,
        );

        let rule = &model.projects[0].map_rules[0];
        assert!(rule.delete_if_merged);
        assert_eq!(rule.label_ref_root.as_deref(), Some("refs/tags/branches/"));
        assert_eq!(rule.edit_msgs.len(), 1);
        assert_eq!(rule.inject_files.len(), 1);
        assert_eq!(rule.inject_files[0].path, ".gitattributes");
        assert_eq!(rule.inject_files[0].data, b"* text=auto\n");
        // BlockParent="No": no implicit unmap follows.
        assert_eq!(model.projects[0].map_rules.len() - hardcoded_len(), 1);
    }

    fn hardcoded_len() -> usize {
        7
    }

    #[test]
    fn chmod_and_formatting() {
        let model = load(
            r#"<Projects>
                <Project Name="p">
                  <Chmod Path="*.sh" Mode="755"/>
                  <Formatting>
                    <Path>*.c;*.h</Path>
                    <NoReindent>**/generated/**</NoReindent>
                    <FixEOL/>
                    <TrimWhitespace/>
                    <Retab Tabs="Yes" TabSize="8"/>
                  </Formatting>
                </Project>
              </Projects>"#,
        );

        let project = &model.projects[0];
        assert_eq!(project.chmods.len(), 1);
        assert_eq!(project.chmods[0].mode, FileMode::Executable);

        let fmt = &project.formatting[0];
        assert!(fmt.spec.fix_eol);
        assert!(fmt.spec.trim_trailing_whitespace);
        assert_eq!(
            fmt.spec.retab,
            Some(Retab {
                tabs: true,
                tab_size: 8
            })
        );
        assert!(fmt.no_reindent.is_some());
    }

    #[test]
    fn skip_commit_and_edit_msg_attributes() {
        let model = load(
            r#"<Projects>
                <Project Name="p">
                  <SkipCommit Revs="5,8-9"/>
                  <EditMsg Max="1" Final="Yes"><Match>^x$</Match><Replace>y</Replace></EditMsg>
                </Project>
              </Projects>"#,
        );

        let project = &model.projects[0];
        assert!(project.skip_commits[0].revs.contains(5));
        assert!(project.skip_commits[0].revs.contains(9));
        assert!(!project.skip_commits[0].revs.contains(7));
        assert_eq!(project.edit_msgs[0].max, 1);
        assert!(project.edit_msgs[0].final_rule);
    }

    #[test]
    fn needs_projects_must_exist() {
        let err = ConfigModel::load_str(
            r#"<Projects><Project Name="a" NeedsProjects="missing"/></Projects>"#,
            Path::new("test.xml"),
            &LoadOptions::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNeededProject { .. }));
    }

    #[test]
    fn bad_regex_is_fatal() {
        let err = ConfigModel::load_str(
            r#"<Projects><Project Name="p">
                <EditMsg><Match>(</Match><Replace>x</Replace></EditMsg>
              </Project></Projects>"#,
            Path::new("test.xml"),
            &LoadOptions::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadRegex { .. }));
    }
}
