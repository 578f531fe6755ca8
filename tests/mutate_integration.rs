use std::fs;
use std::path::Path;

use mdhop::{Error, Vault};

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, content).unwrap();
}

#[test]
fn add_auto_disambiguates_shifting_basename_links() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[N]]\n");
    write(root, "sub/N.md", "nested\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;
    assert_eq!(
        mdhop::resolve(&vault, "A.md", "[[N]]")?.path.as_deref(),
        Some("sub/N.md")
    );

    // A root N.md would win root-priority, changing what [[N]] means.
    write(root, "N.md", "root\n");
    let res = mdhop::add(&vault, &["N.md".to_string()], true)?;
    assert_eq!(res.added, vec!["N.md".to_string()]);
    assert_eq!(res.rewritten.len(), 1);
    assert_eq!(res.rewritten[0].file, "A.md");
    assert_eq!(res.rewritten[0].old_link, "[[N]]");
    assert_eq!(res.rewritten[0].new_link, "[[sub/N]]");
    assert_eq!(fs::read_to_string(root.join("A.md"))?, "[[sub/N]]\n");

    // The index stayed in sync without a rebuild.
    assert_eq!(
        mdhop::resolve(&vault, "A.md", "[[sub/N]]")?.path.as_deref(),
        Some("sub/N.md")
    );
    Ok(())
}

#[test]
fn add_keeps_basename_links_when_meaning_is_stable() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[N]]\n");
    write(root, "N.md", "root\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    // The incumbent is at the root; root-priority keeps [[N]] on it.
    write(root, "sub/N.md", "nested\n");
    let res = mdhop::add(&vault, &["sub/N.md".to_string()], true)?;
    assert!(res.rewritten.is_empty());
    assert_eq!(fs::read_to_string(root.join("A.md"))?, "[[N]]\n");
    assert_eq!(
        mdhop::resolve(&vault, "A.md", "[[N]]")?.path.as_deref(),
        Some("N.md")
    );
    Ok(())
}

#[test]
fn add_rejects_duplicates_and_missing_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    match mdhop::add(&vault, &["A.md".to_string()], true) {
        Err(Error::AlreadyRegistered(files)) => assert_eq!(files, vec!["A.md".to_string()]),
        other => panic!("expected AlreadyRegistered, got {other:?}"),
    }
    assert!(matches!(
        mdhop::add(&vault, &["nope.md".to_string()], true),
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[test]
fn add_promotes_phantom_and_repoints_edges() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;
    assert_eq!(mdhop::stats(&vault)?.phantoms, 1);

    write(root, "B.md", "now real\n");
    let res = mdhop::add(&vault, &["B.md".to_string()], true)?;
    assert_eq!(res.promoted, vec!["B".to_string()]);

    assert_eq!(mdhop::stats(&vault)?.phantoms, 0);
    let r = mdhop::resolve(&vault, "A.md", "[[B]]")?;
    assert_eq!(r.node_type, "note");
    assert_eq!(r.exists, Some(true));
    Ok(())
}

#[test]
fn delete_with_rm_demotes_referenced_note() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "gone soon\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let res = mdhop::delete(&vault, &["B.md".to_string()], true)?;
    assert_eq!(res.phantomed, vec!["B".to_string()]);
    assert!(res.deleted.is_empty());
    assert!(!root.join("B.md").exists());

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.notes_total, 1);
    assert_eq!(stats.phantoms, 1);

    // Re-adding the file promotes the phantom back in place.
    write(root, "B.md", "back\n");
    let res = mdhop::add(&vault, &["B.md".to_string()], true)?;
    assert_eq!(res.promoted, vec!["B".to_string()]);
    assert_eq!(mdhop::stats(&vault)?.phantoms, 0);
    Ok(())
}

#[test]
fn delete_unreferenced_note_is_removed_entirely() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "alone\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    let res = mdhop::delete(&vault, &["A.md".to_string()], false)?;
    assert_eq!(res.deleted, vec!["A.md".to_string()]);
    assert!(root.join("A.md").exists());
    assert_eq!(mdhop::stats(&vault)?.notes_total, 0);
    Ok(())
}

#[test]
fn delete_directory_mode_removes_leftovers_and_empty_dirs() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "keep.md", "x\n");
    write(root, "old/A.md", "![[old/pic.png]]\n");
    write(root, "old/pic.png", "png\n");
    write(root, "old/stray.txt", "not registered\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    mdhop::delete(&vault, &["old".to_string()], true)?;
    assert!(!root.join("old").exists());
    assert_eq!(mdhop::stats(&vault)?.notes_total, 1);
    assert_eq!(mdhop::stats(&vault)?.assets, 0);
    Ok(())
}

#[test]
fn update_reindexes_changed_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    write(root, "A.md", "[[C]]\n#fresh\n");
    let res = mdhop::update(&vault, &["A.md".to_string()])?;
    assert_eq!(res.updated, vec!["A.md".to_string()]);

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.phantoms, 1);
    assert_eq!(stats.tags, 1);
    assert!(mdhop::resolve(&vault, "A.md", "[[B]]").is_err());
    assert_eq!(mdhop::resolve(&vault, "A.md", "[[C]]")?.node_type, "phantom");
    Ok(())
}

#[test]
fn update_of_missing_file_deletes_it() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    // A simultaneously stops referencing B while B disappears: B has
    // no incoming edges left and is removed, not phantomed.
    write(root, "A.md", "nothing here\n");
    fs::remove_file(root.join("B.md"))?;
    let res = mdhop::update(&vault, &["A.md".to_string(), "B.md".to_string()])?;
    assert_eq!(res.updated, vec!["A.md".to_string()]);
    assert_eq!(res.deleted, vec!["B.md".to_string()]);
    assert!(res.phantomed.is_empty());

    let stats = mdhop::stats(&vault)?;
    assert_eq!(stats.notes_total, 1);
    assert_eq!(stats.phantoms, 0);
    Ok(())
}

#[test]
fn update_missing_referenced_note_becomes_phantom() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n");
    write(root, "B.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    fs::remove_file(root.join("B.md"))?;
    let res = mdhop::update(&vault, &["B.md".to_string()])?;
    assert_eq!(res.phantomed, vec!["B".to_string()]);

    let r = mdhop::resolve(&vault, "A.md", "[[B]]")?;
    assert_eq!(r.node_type, "phantom");
    Ok(())
}

#[test]
fn update_rejects_unregistered_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "x\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    write(root, "new.md", "y\n");
    assert!(matches!(
        mdhop::update(&vault, &["new.md".to_string()]),
        Err(Error::Unregistered(_))
    ));
    Ok(())
}

#[test]
fn add_errors_on_ambiguous_links_in_new_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "dir1/X.md", "a\n");
    write(root, "dir2/X.md", "b\n");

    let vault = Vault::open(root)?;
    mdhop::build(&vault)?;

    write(root, "new.md", "[[X]]\n");
    assert!(matches!(
        mdhop::add(&vault, &["new.md".to_string()], true),
        Err(Error::Link(_))
    ));
    // Nothing was registered.
    assert_eq!(mdhop::stats(&vault)?.notes_total, 2);
    Ok(())
}
