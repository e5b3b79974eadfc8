//! Command-line surface of the converter binary.

use std::path::PathBuf;

use clap::{crate_version, App, AppSettings, Arg, ArgMatches};

use vss2git::config::{ConfigModel, LoadOptions};
use vss2git::log::{Log, Verbosity};
use vss2git::message::Decorations;
use vss2git::options::{combine_globs, ExtractFile, RunOptions};
use vss2git::{ConfigError, Converter, DumpSource, Result, RunReport};

pub(crate) fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("vss2git")
        .version(crate_version!())
        .about("Convert a Microsoft Visual SourceSafe (VSS) dump to a Git repository")
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("directory")
                .required(true)
                .help("VSS dump root directory"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .takes_value(true)
                .help("XML file to configure conversion to Git repository"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .takes_value(true)
                .help("Logfile destination; defaults to stdout"),
        )
        .arg(
            Arg::with_name("end-revision")
                .long("end-revision")
                .short("e")
                .takes_value(true)
                .value_name("REV")
                .help("Revision to stop the input processing at"),
        )
        .arg(
            Arg::with_name("quiet")
                .long("quiet")
                .short("q")
                .help("Suppress progress indication"),
        )
        .arg(
            Arg::with_name("progress")
                .long("progress")
                .takes_value(true)
                .min_values(0)
                .max_values(1)
                .help("Force progress indication, optionally with an update period in seconds"),
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .takes_value(true)
                .min_values(0)
                .multiple(true)
                .possible_values(&[
                    "dump",
                    "dump_all",
                    "revs",
                    "commits",
                    "format",
                    "format-verbose",
                    "all",
                ])
                .help("Log verbosity classes"),
        )
        .arg(
            Arg::with_name("trunk")
                .long("trunk")
                .takes_value(true)
                .default_value("trunk")
                .help("Main branch directory name"),
        )
        .arg(
            Arg::with_name("branches")
                .long("branches")
                .takes_value(true)
                .default_value("branches")
                .help("Branches directory name"),
        )
        .arg(
            Arg::with_name("tags")
                .long("tags")
                .takes_value(true)
                .default_value("tags")
                .help("Tags directory name"),
        )
        .arg(
            Arg::with_name("user-branches")
                .long("user-branches")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Names of user-specific branch directories"),
        )
        .arg(
            Arg::with_name("map-trunk-to")
                .long("map-trunk-to")
                .takes_value(true)
                .default_value("main")
                .help("Branch name for trunk in the Git repository"),
        )
        .arg(
            Arg::with_name("no-default-config")
                .long("no-default-config")
                .help("Don't use the default trunk/branches/tags mappings"),
        )
        .arg(
            Arg::with_name("path-filter")
                .long("path-filter")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Process only selected paths (git-style globspec)"),
        )
        .arg(
            Arg::with_name("project")
                .long("project")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Process only selected projects (git-style globspec)"),
        )
        .arg(
            Arg::with_name("target-repository")
                .long("target-repository")
                .takes_value(true)
                .help("Target Git repository for the conversion result"),
        )
        .arg(
            Arg::with_name("label-ref-root")
                .long("label-ref-root")
                .takes_value(true)
                .default_value("refs/tags/")
                .help("Namespace to map VSS labels to Git refs"),
        )
        .arg(
            Arg::with_name("decorate-commit-message")
                .long("decorate-commit-message")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .possible_values(&["revision-id", "change-id"])
                .help("Add taglines to the commit message"),
        )
        .arg(
            Arg::with_name("create-revision-refs")
                .long("create-revision-refs")
                .help("Create refs under refs/revisions for each commit"),
        )
        .arg(
            Arg::with_name("retab-only")
                .long("retab-only")
                .help("Only convert existing indents to tabs or spaces"),
        )
        .arg(
            Arg::with_name("no-indent-reformat")
                .long("no-indent-reformat")
                .help("Don't reformat indentation in files matching <Formatting>"),
        )
        .arg(
            Arg::with_name("append-to-refs")
                .long("append-to-refs")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("refs/NAMESPACE")
                .help("Refs root of a previous conversion to append to"),
        )
        .arg(
            Arg::with_name("authors-map")
                .long("authors-map")
                .short("A")
                .takes_value(true)
                .help("JSON file mapping VSS usernames to Git names and emails"),
        )
        .arg(
            Arg::with_name("make-authors-map")
                .long("make-authors-map")
                .takes_value(true)
                .help("Create a JSON template for --authors-map"),
        )
        .arg(
            Arg::with_name("sha1-map")
                .long("sha1-map")
                .short("S")
                .takes_value(true)
                .help("Text file mapping source blobs to Git SHA1"),
        )
        .arg(
            Arg::with_name("prune-refs")
                .long("prune-refs")
                .takes_value(true)
                .min_values(0)
                .multiple(true)
                .help("Prune the selected ref namespaces (default heads/, tags/)"),
        )
        .arg(
            Arg::with_name("extract-file")
                .long("extract-file")
                .short("X")
                .takes_value(true)
                .number_of_values(2)
                .multiple(true)
                .value_names(&["PATH,rREV", "DEST"])
                .help("Extract a file by database path and revision"),
        )
}

pub(crate) fn run(matches: &ArgMatches) -> Result<RunReport> {
    let options = options_from_matches(matches)?;

    let verbosity = Verbosity::from_values(&options.verbose);
    let log = match &options.log_file {
        Some(path) => Log::to_file(path, verbosity)?,
        None => Log::to_stdout(verbosity),
    };

    let load_options: LoadOptions = options.load_options();
    let config = match &options.config_file {
        Some(path) => ConfigModel::load_file(path, &load_options)?,
        None => ConfigModel::builtin(&load_options)?,
    };

    let mut source = DumpSource::open(&options.dump_root)?;
    let converter = Converter::new(options, config, log)?;
    converter.run(&mut source)
}

fn options_from_matches(matches: &ArgMatches) -> Result<RunOptions> {
    let mut options = RunOptions::default();

    options.dump_root = PathBuf::from(matches.value_of("directory").expect("required"));
    options.config_file = matches.value_of("config").map(PathBuf::from);
    options.log_file = matches.value_of("log").map(PathBuf::from);
    options.end_revision = parse_opt_number(matches.value_of("end-revision"))?;
    options.quiet = matches.is_present("quiet");

    if matches.is_present("progress") {
        options.progress = Some(match matches.value_of("progress") {
            Some(text) => text.parse().map_err(|_| bad_value(text))?,
            None => 1.0,
        });
    }

    options.verbose = match matches.values_of("verbose") {
        Some(values) => {
            let values: Vec<String> = values.map(|v| v.to_string()).collect();
            if values.is_empty() {
                // Bare -v means the common pair.
                vec!["dump".to_string(), "commits".to_string()]
            } else {
                values
            }
        }
        None if matches.is_present("verbose") => {
            vec!["dump".to_string(), "commits".to_string()]
        }
        None => Vec::new(),
    };

    options.trunk = matches.value_of("trunk").expect("has default").to_string();
    options.branches = matches
        .value_of("branches")
        .expect("has default")
        .to_string();
    options.tags = matches.value_of("tags").expect("has default").to_string();
    if let Some(values) = matches.values_of("user-branches") {
        options.user_branches = values.map(|v| v.to_string()).collect();
    }
    options.map_trunk_to = matches
        .value_of("map-trunk-to")
        .expect("has default")
        .to_string();
    options.use_default_config = !matches.is_present("no-default-config");

    options.path_filter = combine_globs(&collect(matches, "path-filter"))?;
    options.project_filter = combine_globs(&collect(matches, "project"))?;

    options.target_repo = matches.value_of("target-repository").map(PathBuf::from);
    options.label_ref_root = matches
        .value_of("label-ref-root")
        .expect("has default")
        .to_string();

    let decorations = collect(matches, "decorate-commit-message");
    options.decorations = Decorations {
        revision_id: decorations.iter().any(|d| d == "revision-id"),
        change_id: decorations.iter().any(|d| d == "change-id"),
    };

    options.create_revision_refs = matches.is_present("create-revision-refs");
    options.retab_only = matches.is_present("retab-only");
    options.no_indent_reformat = matches.is_present("no-indent-reformat");
    options.append_to_refs = collect(matches, "append-to-refs");
    options.authors_map = matches.value_of("authors-map").map(PathBuf::from);
    options.make_authors_map = matches.value_of("make-authors-map").map(PathBuf::from);
    options.sha1_map = matches.value_of("sha1-map").map(PathBuf::from);

    if matches.is_present("prune-refs") {
        let values = collect(matches, "prune-refs");
        options.prune_refs = Some(if values.is_empty() {
            vec![String::new()]
        } else {
            values
        });
    }

    if let Some(values) = matches.values_of("extract-file") {
        let values: Vec<&str> = values.collect();
        for pair in values.chunks(2) {
            if let [spec, dest] = pair {
                options.extract_files.push(ExtractFile::parse(spec, dest)?);
            }
        }
    }

    Ok(options)
}

fn collect(matches: &ArgMatches, name: &str) -> Vec<String> {
    matches
        .values_of(name)
        .map(|values| values.map(|v| v.to_string()).collect())
        .unwrap_or_default()
}

fn parse_opt_number(value: Option<&str>) -> Result<Option<u32>> {
    match value {
        Some(text) => Ok(Some(text.parse().map_err(|_| bad_value(text))?)),
        None => Ok(None),
    }
}

fn bad_value(text: &str) -> vss2git::Error {
    ConfigError::BadRevRange {
        text: text.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches<'static> {
        let mut full = vec!["vss2git"];
        full.extend_from_slice(args);
        app().get_matches_from(full)
    }

    #[test]
    fn minimal_invocation() {
        let m = matches(&["dump"]);
        let options = options_from_matches(&m).unwrap();
        assert_eq!(options.dump_root, PathBuf::from("dump"));
        assert_eq!(options.trunk, "trunk");
        assert_eq!(options.map_trunk_to, "main");
        assert!(options.use_default_config);
        assert_eq!(options.user_branches.len(), 2);
        assert!(options.prune_refs.is_none());
    }

    #[test]
    fn full_invocation() {
        let m = matches(&[
            "dump",
            "--config",
            "conv.xml",
            "--end-revision",
            "150",
            "--quiet",
            "--map-trunk-to",
            "master",
            "--no-default-config",
            "--path-filter",
            "trunk/**",
            "--project",
            "!secret",
            "--target-repository",
            "/tmp/repo",
            "--decorate-commit-message",
            "revision-id",
            "--decorate-commit-message",
            "change-id",
            "--create-revision-refs",
            "--append-to-refs",
            "refs/prev",
            "--sha1-map",
            "map.txt",
            "--extract-file",
            "trunk/a.txt,r15",
            "out.txt",
        ]);
        let options = options_from_matches(&m).unwrap();

        assert_eq!(options.config_file, Some(PathBuf::from("conv.xml")));
        assert_eq!(options.end_revision, Some(150));
        assert!(options.quiet);
        assert_eq!(options.map_trunk_to, "master");
        assert!(!options.use_default_config);
        assert!(options.path_filter.is_some());
        assert!(options.project_filter.is_some());
        assert!(options.decorations.revision_id);
        assert!(options.decorations.change_id);
        assert!(options.create_revision_refs);
        assert_eq!(options.append_to_refs, vec!["refs/prev"]);
        assert_eq!(options.sha1_map, Some(PathBuf::from("map.txt")));
        assert_eq!(options.extract_files.len(), 1);
        assert_eq!(options.extract_files[0].rev, 15);
    }

    #[test]
    fn bare_prune_refs_gets_default_namespaces() {
        let m = matches(&["dump", "--prune-refs"]);
        let options = options_from_matches(&m).unwrap();
        assert_eq!(options.prune_namespaces(), vec!["heads/", "tags/"]);
    }

    #[test]
    fn bad_end_revision_is_config_error() {
        let m = matches(&["dump", "--end-revision", "soon"]);
        assert!(options_from_matches(&m).is_err());
    }
}
