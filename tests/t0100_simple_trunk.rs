mod common;

use common::*;

#[test]
fn trunk_maps_to_main_with_default_config() {
    let mut source = MemorySource::new();
    source.content("c1", b"hi\n");
    source.revision(
        1,
        "kim",
        "first checkin",
        vec![add_dir("trunk"), add_file("trunk/a.txt", "c1")],
    );

    let (target, report) = convert(&mut source, None);

    assert_eq!(report.revisions_processed, 1);
    assert_eq!(report.commits_made, 1);
    assert_eq!(report.files_hashed, 1);

    // One commit on refs/heads/main with the expected tree and author.
    let subject = git(target.path(), &["log", "-1", "--format=%s", "refs/heads/main"]);
    assert_eq!(subject, "first checkin");

    let author = git(target.path(), &["log", "-1", "--format=%an <%ae>", "refs/heads/main"]);
    assert_eq!(author, "kim <kim@localhost>");

    let tree = git(target.path(), &["ls-tree", "refs/heads/main"]);
    assert!(tree.starts_with("100644 blob"), "tree was: {}", tree);
    assert!(tree.ends_with("a.txt"));

    let bytes = git(target.path(), &["show", "refs/heads/main:a.txt"]);
    assert_eq!(bytes, "hi");

    // No parent on the first commit.
    assert!(try_git(target.path(), &["rev-parse", "refs/heads/main^"]).is_none());
}

#[test]
fn authors_map_overrides_localhost_fallback() {
    let authors_dir = tempfile::TempDir::new().unwrap();
    let authors_path = authors_dir.path().join("authors.json");
    std::fs::write(
        &authors_path,
        r#"{ "kim": { "Name": "Kim Doe", "Email": "kim@example.com" } }"#,
    )
    .unwrap();

    let mut source = MemorySource::new();
    source.content("c1", b"hi\n");
    source.revision(
        1,
        "kim",
        "first",
        vec![add_dir("trunk"), add_file("trunk/a.txt", "c1")],
    );

    let target = tempfile::TempDir::new().unwrap();
    convert_into(&mut source, None, target.path(), |options| {
        options.authors_map = Some(authors_path.clone());
    });

    let author = git(target.path(), &["log", "-1", "--format=%an <%ae>", "refs/heads/main"]);
    assert_eq!(author, "Kim Doe <kim@example.com>");
}

#[test]
fn modifications_chain_commits_in_revision_order() {
    let mut source = MemorySource::new();
    source.content("c1", b"one\n").content("c2", b"two\n");
    source.revision(
        1,
        "kim",
        "add",
        vec![add_dir("trunk"), add_file("trunk/a.txt", "c1")],
    );
    source.revision(2, "kim", "change", vec![modify_file("trunk/a.txt", "c2")]);

    let (target, report) = convert(&mut source, None);
    assert_eq!(report.commits_made, 2);

    let subjects = git(
        target.path(),
        &["log", "--reverse", "--format=%s", "refs/heads/main"],
    );
    assert_eq!(subjects, "add\nchange");

    let bytes = git(target.path(), &["show", "refs/heads/main:a.txt"]);
    assert_eq!(bytes, "two");
}

#[test]
fn empty_message_gets_synthesized_summary() {
    let mut source = MemorySource::new();
    source.content("c1", b"x\n");
    source.revision(
        1,
        "kim",
        "",
        vec![add_dir("trunk"), add_file("trunk/a.txt", "c1")],
    );

    let (target, _) = convert(&mut source, None);

    let subject = git(target.path(), &["log", "-1", "--format=%s", "refs/heads/main"]);
    assert_eq!(subject, "Added 1 file");
    let body = git(target.path(), &["log", "-1", "--format=%b", "refs/heads/main"]);
    assert!(body.contains("A a.txt"));
}

#[test]
fn deleted_and_renamed_files_are_reflected() {
    let mut source = MemorySource::new();
    source.content("c1", b"a\n").content("c2", b"b\n");
    source.revision(
        1,
        "kim",
        "setup",
        vec![
            add_dir("trunk"),
            add_file("trunk/a.txt", "c1"),
            add_file("trunk/b.txt", "c2"),
        ],
    );
    source.revision(
        2,
        "kim",
        "shuffle",
        vec![delete_file("trunk/b.txt"), rename_file("trunk/a.txt", "trunk/c.txt")],
    );

    let (target, _) = convert(&mut source, None);

    let tree = git(target.path(), &["ls-tree", "--name-only", "refs/heads/main"]);
    assert_eq!(tree, "c.txt");
}
