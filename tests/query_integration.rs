use std::fs;
use std::path::Path;

use mdhop::{Error, QueryEntry, QueryOptions, Vault};

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, content).unwrap();
}

fn graph_vault(root: &Path) {
    write(root, "Hub.md", "---\ntags: [topic]\n---\n\n[[Left]] [[Right]] #inline\n");
    write(root, "Left.md", "[[Right]]\n");
    write(root, "Right.md", "body\n");
    write(root, "Other.md", "[[Hub]]\n");
}

fn paths_of(nodes: &[mdhop::NodePayload]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| n.path.clone().unwrap_or_else(|| n.name.clone()))
        .collect()
}

#[test]
fn backlinks_outgoing_and_tags() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    graph_vault(root);

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        backlinks: true,
        outgoing: true,
        tags: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("Hub.md".into()), &opts)?;
    assert_eq!(paths_of(&q.backlinks.unwrap()), vec!["Other.md"]);
    // Byte-order on COALESCE(path, name): tag names sort before paths.
    assert_eq!(
        paths_of(&q.outgoing.unwrap()),
        vec!["#inline", "#topic", "Left.md", "Right.md"]
    );
    assert_eq!(paths_of(&q.tags.unwrap()), vec!["#inline", "#topic"]);
    Ok(())
}

#[test]
fn twohop_groups_by_shared_target() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    graph_vault(root);

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        twohop: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("Hub.md".into()), &opts)?;
    let twohop = q.twohop.unwrap();
    // Left and Hub both link Right; the shared tag has no other
    // sources except Hub itself.
    let via_right = twohop
        .iter()
        .find(|t| t.via.path.as_deref() == Some("Right.md"))
        .expect("via Right");
    assert_eq!(paths_of(&via_right.targets), vec!["Left.md"]);
    assert!(
        !twohop
            .iter()
            .any(|t| t.via.path.as_deref() == Some("Left.md"))
    );
    Ok(())
}

#[test]
fn entry_name_detection_tag_note_phantom() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[Ghost]] #t\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        backlinks: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::Name("Ghost".into()), &opts)?;
    assert_eq!(q.entry.node_type, "phantom");
    assert_eq!(paths_of(&q.backlinks.unwrap()), vec!["A.md"]);

    let q = mdhop::query(&vault, &QueryEntry::Name("#t".into()), &opts)?;
    assert_eq!(q.entry.node_type, "tag");

    let q = mdhop::query(&vault, &QueryEntry::Name("A".into()), &opts)?;
    assert_eq!(q.entry.node_type, "note");
    Ok(())
}

#[test]
fn name_entry_applies_root_priority() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "M.md", "root\n");
    write(root, "sub/M.md", "nested\n");
    write(root, "dir1/X.md", "x1\n");
    write(root, "dir2/X.md", "x2\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions::default();
    let q = mdhop::query(&vault, &QueryEntry::Name("M".into()), &opts)?;
    assert_eq!(q.entry.path.as_deref(), Some("M.md"));

    assert!(matches!(
        mdhop::query(&vault, &QueryEntry::Name("X".into()), &opts),
        Err(Error::AmbiguousName { .. })
    ));
    Ok(())
}

#[test]
fn excludes_filter_results_but_not_the_entry() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(
        root,
        "mdhop.yaml",
        "exclude:\n  paths: [\"secret/*\"]\n  tags: [\"#wip\"]\n",
    );
    write(root, "Hub.md", "[[secret/S]] [[Open]] #wip #ok\n");
    write(root, "secret/S.md", "s\n");
    write(root, "Open.md", "o\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        outgoing: true,
        tags: true,
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("Hub.md".into()), &opts)?;
    assert_eq!(paths_of(&q.outgoing.unwrap()), vec!["#ok", "Open.md"]);
    assert_eq!(paths_of(&q.tags.unwrap()), vec!["#ok"]);

    // The entry itself is never excluded.
    let q = mdhop::query(&vault, &QueryEntry::File("secret/S.md".into()), &opts)?;
    assert_eq!(q.entry.path.as_deref(), Some("secret/S.md"));
    Ok(())
}

#[test]
fn max_backlinks_limits_at_sql_level() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "T.md", "target\n");
    for i in 0..5 {
        write(root, &format!("src{i}.md"), "[[T]]\n");
    }

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        backlinks: true,
        max_backlinks: Some(2),
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("T.md".into()), &opts)?;
    assert_eq!(
        paths_of(&q.backlinks.unwrap()),
        vec!["src0.md", "src1.md"]
    );
    Ok(())
}

#[test]
fn head_skips_frontmatter_and_blank_lines() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(
        root,
        "A.md",
        "---\ntitle: x\n---\n\n\nFirst line\nSecond line\nThird line\n",
    );

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        head: Some(2),
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("A.md".into()), &opts)?;
    assert_eq!(
        q.head.unwrap(),
        vec!["First line".to_string(), "Second line".to_string()]
    );
    Ok(())
}

#[test]
fn snippets_carry_context_with_clamped_bounds() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[T]]\nline two\nline three\n");
    write(root, "T.md", "t\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let opts = QueryOptions {
        snippet: Some(1),
        ..Default::default()
    };
    let q = mdhop::query(&vault, &QueryEntry::File("T.md".into()), &opts)?;
    let snips = q.snippets.unwrap();
    assert_eq!(snips.len(), 1);
    assert_eq!(snips[0].file, "A.md");
    assert_eq!(snips[0].line_start, 1);
    assert_eq!(snips[0].line_end, 2);
    assert_eq!(snips[0].text, "[[T]]\nline two");
    Ok(())
}

#[test]
fn stale_head_is_rejected_unless_allowed() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "hello\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let f = fs::File::options().write(true).open(root.join("A.md"))?;
    f.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(30))?;
    drop(f);

    let mut opts = QueryOptions {
        head: Some(1),
        ..Default::default()
    };
    assert!(matches!(
        mdhop::query(&vault, &QueryEntry::File("A.md".into()), &opts),
        Err(Error::Stale(_))
    ));

    opts.allow_stale = true;
    let q = mdhop::query(&vault, &QueryEntry::File("A.md".into()), &opts)?;
    assert_eq!(q.head.unwrap(), vec!["hello".to_string()]);
    Ok(())
}

#[test]
fn diagnose_reports_conflicts_and_phantoms() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "dir1/M.md", "m\n");
    write(root, "dir2/M.md", "m\n");
    write(root, "A.md", "[[Ghost]] ![[a/pic.png]] ![[b/pic.png]]\n");
    write(root, "a/pic.png", "p\n");
    write(root, "b/pic.png", "p\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let d = mdhop::diagnose(&vault)?;
    assert_eq!(d.basename_conflicts.len(), 1);
    assert_eq!(d.basename_conflicts[0].name, "m");
    assert_eq!(
        d.basename_conflicts[0].paths,
        vec!["dir1/M.md".to_string(), "dir2/M.md".to_string()]
    );
    assert_eq!(d.asset_basename_conflicts.len(), 1);
    assert_eq!(d.phantoms, vec!["Ghost".to_string()]);
    Ok(())
}

#[test]
fn missing_index_is_reported() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let vault = Vault::open(temp.path())?;
    assert!(matches!(mdhop::stats(&vault), Err(Error::IndexMissing(_))));
    Ok(())
}

#[test]
fn resolve_requires_the_link_to_be_present() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "b\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    assert!(matches!(
        mdhop::resolve(&vault, "A.md", "[[Other]]"),
        Err(Error::LinkNotInSource { .. })
    ));
    // Same target, different subpath: not the stored occurrence.
    assert!(matches!(
        mdhop::resolve(&vault, "A.md", "[[B#H]]"),
        Err(Error::LinkNotInSource { .. })
    ));
    Ok(())
}
