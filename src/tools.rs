//! File-scan tools: `disambiguate`, `simplify`, `repair`, `convert`.
//!
//! These operate on the vault files directly. Apart from the
//! index-backed `disambiguate`, they can run without a store; after a
//! scan-mode run the index is stale and the caller is expected to
//! `build`.

use serde::Serialize;
use tracing::info;

use crate::link_resolve::{MemoryLookup, NodeLookup, Resolution, ResolvedTarget, resolve_path};
use crate::links::{LinkOccurrence, LinkType, RewriteRecord};
use crate::mutate::RewritePlan;
use crate::parse::{self, ParsedRaw, RawForm};
use crate::rewrite;
use crate::sqlite::{self, GraphStore, NodeType};
use crate::vault::Vault;
use crate::{Error, Result, paths};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub rewritten: Vec<RewriteRecord>,
    pub skipped: Vec<SkipRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub file: String,
    pub raw_link: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkForm {
    Wikilink,
    Markdown,
}

/// The note files a tool operates on: an explicit subset, or every
/// non-excluded note in the vault.
fn target_notes(vault: &Vault, files: Option<&[String]>) -> Result<Vec<String>> {
    match files {
        Some(fs) => {
            let mut out = Vec::new();
            for f in fs {
                let rel = vault.rel_from_input(f)?;
                if !vault.to_abs(&rel).is_file() {
                    continue;
                }
                if !out.contains(&rel) {
                    out.push(rel);
                }
            }
            out.sort();
            Ok(out)
        }
        None => {
            let (notes, _) = vault.collect_files()?;
            Ok(notes.into_iter().map(|n| n.path).collect())
        }
    }
}

fn disk_lookup(vault: &Vault) -> Result<MemoryLookup> {
    let (notes, assets) = vault.collect_files()?;
    let mut lk = MemoryLookup::new();
    for n in &notes {
        lk.add_note(&n.path);
    }
    for a in &assets {
        lk.add_asset(a);
    }
    Ok(lk)
}

fn rewritable(occ: &LinkOccurrence) -> bool {
    matches!(occ.link_type, LinkType::Wikilink | LinkType::Markdown)
}

/// Rewrite every basename link of `name` (and broken path links with
/// the same basename) to an explicit path. `scan` walks the files;
/// without it the edge index locates the sources and stays in sync.
pub fn disambiguate(
    vault: &Vault,
    name: &str,
    target: Option<&str>,
    files: Option<&[String]>,
    scan: bool,
    dry_run: bool,
) -> Result<ScanReport> {
    if scan {
        disambiguate_scan(vault, name, target, files, dry_run)
    } else {
        disambiguate_indexed(vault, name, target, files, dry_run)
    }
}

fn choose_target(name: &str, target: Option<&str>, candidates: &[String]) -> Result<String> {
    match target {
        Some(t) => {
            let t = paths::normalize(t);
            if !candidates
                .iter()
                .any(|c| c.to_lowercase() == t.to_lowercase())
            {
                return Err(Error::InvalidPath(format!(
                    "target {t} is not a candidate for {name}"
                )));
            }
            Ok(t)
        }
        None => match candidates {
            [only] => Ok(only.clone()),
            [] => Err(Error::NotFound(name.to_string())),
            _ => Err(Error::AmbiguousName {
                name: name.to_string(),
                candidates: candidates.to_vec(),
            }),
        },
    }
}

fn disambiguate_scan(
    vault: &Vault,
    name: &str,
    target: Option<&str>,
    files: Option<&[String]>,
    dry_run: bool,
) -> Result<ScanReport> {
    let key = paths::basename_key(name);
    let lookup = disk_lookup(vault)?;
    let candidates = lookup.note_candidates(&key).to_vec();
    let target_path = choose_target(name, target, &candidates)?;

    let mut plan = RewritePlan::default();
    for file in target_notes(vault, files)? {
        let content = vault.read_note(&file)?;
        for occ in parse::parse_note(&content, &vault.config().frontmatter) {
            if occ.is_tag() || (!rewritable(&occ) && occ.link_type != LinkType::Frontmatter) {
                continue;
            }
            if paths::basename_key(&occ.target) != key {
                continue;
            }
            let eligible = if occ.is_basename {
                true
            } else {
                // Broken path link with a matching basename, e.g.
                // [[old/Name]] when old/Name.md is gone.
                !occ.is_relative
                    && matches!(
                        resolve_path(&lookup, occ.target.trim_start_matches('/'))?,
                        Resolution::Target(ResolvedTarget::Phantom { .. })
                    )
            };
            if !eligible {
                continue;
            }
            let parsed = ParsedRaw::from_occurrence(&occ);
            let new_raw =
                rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, &target_path));
            if new_raw != occ.raw_link {
                plan.push(&file, &occ.raw_link, &new_raw);
            }
        }
    }

    if !dry_run {
        plan.apply(vault)?;
    }
    info!(name, target = %target_path, files = plan.files().count(), "disambiguate scan");
    Ok(ScanReport {
        rewritten: plan.records(),
        skipped: Vec::new(),
    })
}

fn disambiguate_indexed(
    vault: &Vault,
    name: &str,
    target: Option<&str>,
    files: Option<&[String]>,
    dry_run: bool,
) -> Result<ScanReport> {
    let mut store = GraphStore::open(vault)?;
    let file_filter: Option<Vec<String>> = match files {
        Some(fs) => Some(
            fs.iter()
                .map(|f| vault.rel_from_input(f))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    let key = paths::basename_key(name);
    let candidates: Vec<String> = sqlite::nodes_by_name_key(&store.conn, NodeType::Note, &key)?
        .into_iter()
        .filter_map(|n| n.path)
        .collect();
    let target_path = choose_target(name, target, &candidates)?;
    let target_node = sqlite::node_by_path_key(&store.conn, &target_path.to_lowercase())?
        .ok_or_else(|| Error::Unregistered(target_path.clone()))?;

    // Sources come from the edge index: links into any candidate with
    // a basename raw, plus broken path links parked on the phantom.
    let mut source_nodes: Vec<i64> = Vec::new();
    for cand in sqlite::nodes_by_name_key(&store.conn, NodeType::Note, &key)? {
        source_nodes.push(cand.id);
    }
    if let Some(ph) = sqlite::node_by_key(&store.conn, &format!("phantom:name:{key}"))? {
        source_nodes.push(ph.id);
    }

    let mut plan = RewritePlan::default();
    let mut edge_rewrites: Vec<(i64, String)> = Vec::new();
    for node_id in source_nodes {
        let is_phantom = sqlite::node_by_id(&store.conn, node_id)?
            .is_some_and(|n| n.node_type == NodeType::Phantom);
        for edge in sqlite::incoming_edges(&store.conn, node_id)? {
            let parsed = parse::parse_raw_target(&edge.raw_link);
            if parsed.form == RawForm::Tag || paths::basename_key(&parsed.target) != key {
                continue;
            }
            let eligible = paths::is_basename_link(&parsed.target) || is_phantom;
            if !eligible {
                continue;
            }
            let Some(source) = sqlite::node_by_id(&store.conn, edge.source_id)? else {
                continue;
            };
            let Some(source_path) = source.path else { continue };
            if let Some(filter) = &file_filter {
                if !filter.contains(&source_path) {
                    continue;
                }
            }
            let new_raw =
                rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, &target_path));
            if new_raw != edge.raw_link {
                plan.push(&source_path, &edge.raw_link, &new_raw);
                edge_rewrites.push((edge.id, new_raw));
            }
        }
    }

    if !dry_run {
        let backups = plan.apply(vault)?;
        let tx = match store.conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                rewrite::rollback(&backups);
                return Err(e.into());
            }
        };
        let outcome = (|| -> Result<()> {
            for (edge_id, new_raw) in &edge_rewrites {
                sqlite::retarget_edge(&tx, *edge_id, target_node.id, new_raw)?;
            }
            for (file, _) in plan.files() {
                if let Some(node) = sqlite::node_by_path_key(&tx, &file.to_lowercase())? {
                    sqlite::update_note_mtime(&tx, node.id, vault.disk_mtime(file)?)?;
                }
            }
            sqlite::cleanup_orphans(&tx)?;
            Ok(())
        })();
        if let Err(e) = outcome.and_then(|()| tx.commit().map_err(Error::from)) {
            rewrite::rollback(&backups);
            return Err(e);
        }
    }

    Ok(ScanReport {
        rewritten: plan.records(),
        skipped: Vec::new(),
    })
}

/// Inverse of disambiguate: path links whose target's basename is
/// unique (or wins root-priority) become basename links.
pub fn simplify(vault: &Vault, files: Option<&[String]>, dry_run: bool) -> Result<ScanReport> {
    let lookup = disk_lookup(vault)?;
    let mut plan = RewritePlan::default();
    let mut skipped = Vec::new();

    for file in target_notes(vault, files)? {
        let content = vault.read_note(&file)?;
        for occ in parse::parse_note(&content, &vault.config().frontmatter) {
            if !rewritable(&occ) || occ.is_basename || occ.target.is_empty() {
                continue;
            }
            let skip = |reason: &str, candidates: Vec<String>| SkipRecord {
                file: file.clone(),
                raw_link: occ.raw_link.clone(),
                reason: reason.to_string(),
                candidates,
            };

            let resolved_path = if occ.is_relative {
                match paths::join_relative(paths::parent_dir(&file), &occ.target) {
                    Some(j) => j,
                    None => {
                        skipped.push(skip("escapes vault", vec![]));
                        continue;
                    }
                }
            } else if let Some(stripped) = occ.target.strip_prefix('/') {
                if paths::absolute_escapes(stripped) {
                    skipped.push(skip("escapes vault", vec![]));
                    continue;
                }
                paths::normalize(stripped)
            } else {
                occ.target.clone()
            };

            match resolve_path(&lookup, &resolved_path)? {
                Resolution::Target(ResolvedTarget::Note { path }) => {
                    if path.to_lowercase() == file.to_lowercase() {
                        continue;
                    }
                    let key = paths::basename_key(&path);
                    let unique = match crate::link_resolve::resolve_basename(
                        &lookup,
                        paths::note_basename(&path),
                    )? {
                        Resolution::Target(ResolvedTarget::Note { path: p }) => p == path,
                        _ => false,
                    };
                    if !unique {
                        skipped.push(skip(
                            "ambiguous basename",
                            lookup.note_candidates(&key).to_vec(),
                        ));
                        continue;
                    }
                    let parsed = ParsedRaw::from_occurrence(&occ);
                    let text = simplified_text(&parsed, &path);
                    let new_raw = rewrite::rebuild_raw(&parsed, &text);
                    if new_raw != occ.raw_link {
                        plan.push(&file, &occ.raw_link, &new_raw);
                    }
                }
                Resolution::Target(ResolvedTarget::Asset { path }) => {
                    let filename = paths::file_name(&path).to_string();
                    // A note can shadow the asset's basename; notes win
                    // basename resolution, so leave the path form.
                    if !lookup
                        .notes_by_basename(&paths::basename_key(&filename))?
                        .is_empty()
                    {
                        skipped.push(skip("asset basename shadowed by note", vec![]));
                        continue;
                    }
                    let unique = match crate::link_resolve::resolve_basename(&lookup, &filename)? {
                        Resolution::Target(ResolvedTarget::Asset { path: p }) => p == path,
                        _ => false,
                    };
                    if !unique {
                        skipped.push(skip("ambiguous basename", vec![]));
                        continue;
                    }
                    let parsed = ParsedRaw::from_occurrence(&occ);
                    let new_raw = rewrite::rebuild_raw(&parsed, &filename);
                    if new_raw != occ.raw_link {
                        plan.push(&file, &occ.raw_link, &new_raw);
                    }
                }
                Resolution::Target(ResolvedTarget::Phantom { .. }) => {
                    skipped.push(skip("broken link", vec![]));
                }
                _ => {}
            }
        }
    }

    if !dry_run {
        plan.apply(vault)?;
    }
    Ok(ScanReport {
        rewritten: plan.records(),
        skipped,
    })
}

fn simplified_text(parsed: &ParsedRaw, resolved_path: &str) -> String {
    match parsed.form {
        RawForm::Wiki => paths::note_basename(resolved_path).to_string(),
        _ => {
            if paths::is_md(&parsed.target) {
                paths::file_name(resolved_path).to_string()
            } else {
                paths::note_basename(resolved_path).to_string()
            }
        }
    }
}

/// Rewrite broken path links and vault escapes to basename form when a
/// unique (or absent) note candidate makes that safe.
pub fn repair(vault: &Vault, dry_run: bool) -> Result<ScanReport> {
    let lookup = disk_lookup(vault)?;
    let mut plan = RewritePlan::default();
    let mut skipped = Vec::new();

    for file in target_notes(vault, None)? {
        let content = vault.read_note(&file)?;
        for occ in parse::parse_note(&content, &vault.config().frontmatter) {
            if !rewritable(&occ) || occ.is_basename || occ.target.is_empty() {
                continue;
            }

            let escapes = if occ.is_relative {
                paths::join_relative(paths::parent_dir(&file), &occ.target).is_none()
            } else {
                occ.target
                    .strip_prefix('/')
                    .is_some_and(paths::absolute_escapes)
            };

            let parsed = ParsedRaw::from_occurrence(&occ);
            let basename_raw = || {
                let text = simplified_text(&parsed, &format!("{}.md", paths::note_basename(&occ.target)));
                rewrite::rebuild_raw(&parsed, &text)
            };

            if escapes {
                // Escapes are repaired unconditionally; a link outside
                // the vault is worse than an ambiguous one.
                let new_raw = basename_raw();
                if new_raw != occ.raw_link {
                    plan.push(&file, &occ.raw_link, &new_raw);
                }
                continue;
            }

            let resolved_path = if occ.is_relative {
                match paths::join_relative(paths::parent_dir(&file), &occ.target) {
                    Some(j) => j,
                    None => continue,
                }
            } else {
                paths::normalize(occ.target.trim_start_matches('/'))
            };
            if !matches!(
                resolve_path(&lookup, &resolved_path)?,
                Resolution::Target(ResolvedTarget::Phantom { .. })
            ) {
                continue;
            }

            let key = paths::basename_key(&occ.target);
            let candidates = lookup.notes_by_basename(&key)?;
            if candidates.len() >= 2 {
                skipped.push(SkipRecord {
                    file: file.clone(),
                    raw_link: occ.raw_link.clone(),
                    reason: "ambiguous basename".to_string(),
                    candidates,
                });
                continue;
            }
            let new_raw = basename_raw();
            if new_raw != occ.raw_link {
                plan.push(&file, &occ.raw_link, &new_raw);
            }
        }
    }

    if !dry_run {
        plan.apply(vault)?;
    }
    Ok(ScanReport {
        rewritten: plan.records(),
        skipped,
    })
}

/// Convert between wikilink and markdown forms, preserving target,
/// alias, subpath and embed. Tags, frontmatter, URLs and code are
/// untouched.
pub fn convert(
    vault: &Vault,
    to: LinkForm,
    files: Option<&[String]>,
    dry_run: bool,
) -> Result<ScanReport> {
    let lookup = disk_lookup(vault)?;
    let mut plan = RewritePlan::default();

    for file in target_notes(vault, files)? {
        let content = vault.read_note(&file)?;
        for occ in parse::parse_note(&content, &vault.config().frontmatter) {
            let new_raw = match (to, occ.link_type) {
                (LinkForm::Wikilink, LinkType::Markdown) => markdown_to_wikilink(&occ),
                (LinkForm::Markdown, LinkType::Wikilink) => wikilink_to_markdown(&occ, &lookup)?,
                _ => continue,
            };
            if new_raw != occ.raw_link {
                plan.push(&file, &occ.raw_link, &new_raw);
            }
        }
    }

    if !dry_run {
        plan.apply(vault)?;
    }
    Ok(ScanReport {
        rewritten: plan.records(),
        skipped: Vec::new(),
    })
}

fn markdown_to_wikilink(occ: &LinkOccurrence) -> String {
    let target = match occ.target.strip_suffix(".md") {
        Some(stripped) => stripped.to_string(),
        None => occ.target.clone(),
    };
    let sub = if occ.subpath.is_empty() {
        String::new()
    } else {
        format!("#{}", occ.subpath)
    };
    let display = format!("{target}{sub}");
    let alias = match &occ.alias {
        Some(a) if *a != display => format!("|{a}"),
        _ => String::new(),
    };
    let bang = if occ.embed { "!" } else { "" };
    format!("{bang}[[{target}{sub}{alias}]]")
}

fn wikilink_to_markdown(occ: &LinkOccurrence, lookup: &MemoryLookup) -> Result<String> {
    let is_note = if occ.target.is_empty() {
        true
    } else {
        match crate::link_resolve::resolve_basename(lookup, &occ.target) {
            Ok(Resolution::Target(ResolvedTarget::Asset { .. })) => false,
            Ok(Resolution::Target(ResolvedTarget::Note { .. })) => true,
            // Unresolved or ambiguous: decide by extension presence.
            _ => paths::is_md(&occ.target) || !paths::file_name(&occ.target).contains('.'),
        }
    };
    let target = if is_note && !occ.target.is_empty() && !paths::is_md(&occ.target) {
        format!("{}.md", occ.target)
    } else {
        occ.target.clone()
    };
    let sub = if occ.subpath.is_empty() {
        String::new()
    } else {
        format!("#{}", occ.subpath)
    };
    let text = match &occ.alias {
        Some(a) => a.clone(),
        None => format!("{}{sub}", occ.target),
    };
    let bang = if occ.embed { "!" } else { "" };
    Ok(format!("{bang}[{text}]({target}{sub})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontmatterConfig;
    use crate::parse::parse_note;

    fn occ_of(raw: &str) -> LinkOccurrence {
        parse_note(&format!("{raw}\n"), &FrontmatterConfig::default())
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn markdown_to_wikilink_drops_md_and_redundant_alias() {
        assert_eq!(markdown_to_wikilink(&occ_of("[sub/N](sub/N.md)")), "[[sub/N]]");
        assert_eq!(
            markdown_to_wikilink(&occ_of("[alias](sub/N.md#H)")),
            "[[sub/N#H|alias]]"
        );
        assert_eq!(
            markdown_to_wikilink(&occ_of("![img.png](img.png)")),
            "![[img.png]]"
        );
    }

    #[test]
    fn wikilink_to_markdown_readds_md_for_notes_only() {
        let mut lk = MemoryLookup::new();
        lk.add_note("sub/N.md");
        lk.add_asset("img.png");
        assert_eq!(
            wikilink_to_markdown(&occ_of("[[sub/N]]"), &lk).unwrap(),
            "[sub/N](sub/N.md)"
        );
        assert_eq!(
            wikilink_to_markdown(&occ_of("[[N#H|a]]"), &lk).unwrap(),
            "[a](N.md#H)"
        );
        assert_eq!(
            wikilink_to_markdown(&occ_of("![[img.png]]"), &lk).unwrap(),
            "![img.png](img.png)"
        );
    }

    #[test]
    fn convert_roundtrip_is_identity() {
        let lk = {
            let mut lk = MemoryLookup::new();
            lk.add_note("sub/N.md");
            lk
        };
        for wiki in ["[[sub/N]]", "[[sub/N#H|alias]]", "![[sub/N]]"] {
            let md = wikilink_to_markdown(&occ_of(wiki), &lk).unwrap();
            let back = markdown_to_wikilink(&occ_of(&md));
            assert_eq!(back, wiki, "via {md}");
        }
    }
}
