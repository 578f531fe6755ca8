use std::fs;
use std::path::Path;

use mdhop::{Error, LinkErrorKind, QueryEntry, QueryOptions, Vault};

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, content).unwrap();
}

#[test]
fn basic_wikilink_and_phantom() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n[[Missing]]\n");
    write(root, "B.md", "body\n");

    let vault = Vault::open(root)?;
    let summary = mdhop::build(&vault)?;
    assert_eq!(summary.notes, 2);
    assert_eq!(summary.edges, 2);

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.notes_total, 2);
    assert_eq!(stats.notes_existing, 2);
    assert_eq!(stats.phantoms, 1);
    assert_eq!(stats.edges, 2);

    let res = mdhop::resolve(&vault, "A.md", "[[B]]")?;
    assert_eq!(res.node_type, "note");
    assert_eq!(res.name, "B");
    assert_eq!(res.path.as_deref(), Some("B.md"));
    assert_eq!(res.exists, Some(true));

    let res = mdhop::resolve(&vault, "A.md", "[[Missing]]")?;
    assert_eq!(res.node_type, "phantom");
    assert_eq!(res.name, "Missing");
    Ok(())
}

#[test]
fn strict_ambiguity_fails_build_and_scan_disambiguate_repairs_it() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[M]]\n");
    write(root, "dir1/M.md", "one\n");
    write(root, "dir2/M.md", "two\n");

    let vault = Vault::open(root)?;
    let err = mdhop::build(&vault).unwrap_err();
    match err {
        Error::Build { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].file, "A.md");
            assert_eq!(errors[0].raw_link, "[[M]]");
            match &errors[0].kind {
                LinkErrorKind::Ambiguous { candidates } => {
                    assert_eq!(candidates, &["dir1/M.md".to_string(), "dir2/M.md".to_string()]);
                }
                other => panic!("expected ambiguous, got {other:?}"),
            }
        }
        other => panic!("expected build error, got {other}"),
    }

    let report = mdhop::disambiguate(&vault, "M", Some("dir1/M.md"), None, true, false)?;
    assert_eq!(report.rewritten.len(), 1);
    assert_eq!(report.rewritten[0].file, "A.md");
    assert_eq!(report.rewritten[0].old_link, "[[M]]");
    assert_eq!(report.rewritten[0].new_link, "[[dir1/M]]");
    assert_eq!(fs::read_to_string(root.join("A.md"))?, "[[dir1/M]]\n");

    mdhop::build(&vault)?;
    let res = mdhop::resolve(&vault, "A.md", "[[dir1/M]]")?;
    assert_eq!(res.path.as_deref(), Some("dir1/M.md"));
    Ok(())
}

#[test]
fn root_priority_resolves_basename_ties() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[M]]\n");
    write(root, "M.md", "root\n");
    write(root, "sub/M.md", "nested\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let res = mdhop::resolve(&vault, "A.md", "[[M]]")?;
    assert_eq!(res.node_type, "note");
    assert_eq!(res.path.as_deref(), Some("M.md"));

    // Already basename form: simplify has nothing to do here.
    let report = mdhop::simplify(&vault, None, false)?;
    assert!(report.rewritten.is_empty());
    assert_eq!(fs::read_to_string(root.join("A.md"))?, "[[M]]\n");
    Ok(())
}

#[test]
fn vault_escape_fails_build() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[../outside]]\n");

    let vault = Vault::open(root)?;
    let err = mdhop::build(&vault).unwrap_err();
    match err {
        Error::Build { errors } => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0].kind, LinkErrorKind::EscapesVault));
        }
        other => panic!("expected build error, got {other}"),
    }
    Ok(())
}

#[test]
fn empty_vault_builds_to_zero_counts() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let vault = Vault::open(temp.path())?;
    let summary = mdhop::build(&vault)?;
    assert_eq!(summary.notes, 0);
    assert_eq!(summary.edges, 0);

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats, mdhop::Stats::default());
    Ok(())
}

#[test]
fn self_link_has_one_self_edge_and_empty_outgoing() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[#H]]\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let res = mdhop::resolve(&vault, "A.md", "[[#H]]")?;
    assert_eq!(res.node_type, "note");
    assert_eq!(res.name, "A");
    assert_eq!(res.subpath.as_deref(), Some("H"));

    let opts = QueryOptions {
        outgoing: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("A.md".into()), &opts)?;
    assert_eq!(q.outgoing.unwrap(), vec![]);
    Ok(())
}

#[test]
fn code_fences_and_inline_code_produce_no_edges() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(
        root,
        "A.md",
        "```\n[[Fenced]]\n```\n`[[Inline]]`\n[[Real]]\n",
    );

    let vault = Vault::open(root)?;
    let summary = mdhop::build(&vault)?;
    assert_eq!(summary.edges, 1);

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.phantoms, 1);
    Ok(())
}

#[test]
fn tag_recognition_boundaries() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "#123\n#あいうえお\n#parent/子\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    // #123 is not a tag; the nested tag yields one node per prefix.
    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.tags, 3);

    let opts = QueryOptions {
        backlinks: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::Tag("#parent/子".into()), &opts)?;
    assert_eq!(q.backlinks.unwrap().len(), 1);
    Ok(())
}

#[test]
fn frontmatter_tags_become_frontmatter_edges() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "---\ntags: [todo, work/urgent]\n---\nbody\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.tags, 3);

    let res = mdhop::resolve(&vault, "A.md", "todo")?;
    assert_eq!(res.node_type, "tag");
    assert_eq!(res.name, "#todo");
    Ok(())
}

#[test]
fn build_is_idempotent_and_drops_stale_nodes() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;
    let first = mdhop::stats(&vault)?;
    mdhop::build(&vault)?;
    let second = mdhop::stats(&vault)?;
    assert_eq!(first, second);

    // Remove B on disk; rebuilding demotes the reference to a phantom
    // and drops the old note row.
    fs::remove_file(root.join("B.md"))?;
    mdhop::build(&vault)?;
    let third = mdhop::stats(&vault)?;
    assert_eq!(third.notes_total, 1);
    assert_eq!(third.phantoms, 1);
    Ok(())
}

#[test]
fn build_exclude_paths_skip_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "mdhop.yaml", "build:\n  exclude_paths: [\"drafts/*\"]\n");
    write(root, "A.md", "hello\n");
    write(root, "drafts/D.md", "[[A]]\n");

    let vault = Vault::open(root)?;
    let summary = mdhop::build(&vault)?;
    assert_eq!(summary.notes, 1);
    assert_eq!(summary.edges, 0);
    Ok(())
}

#[test]
fn unreferenced_assets_are_not_kept() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "![[used.png]]\n");
    write(root, "used.png", "png\n");
    write(root, "unused.png", "png\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.assets, 1);
    let res = mdhop::resolve(&vault, "A.md", "![[used.png]]")?;
    assert_eq!(res.node_type, "asset");
    assert_eq!(res.path.as_deref(), Some("used.png"));
    Ok(())
}
