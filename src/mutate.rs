//! Incremental mutations: `add`, `update`, `delete`.
//!
//! Each entrypoint loads the registered world into in-memory maps,
//! plans against the post-mutation state, applies file rewrites with
//! backups, and commits one transaction. A failure after rewrites
//! restores the touched files before surfacing the error.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::link_resolve::{
    MemoryLookup, NodeLookup, Resolution, ResolvedTarget, materialize_target, resolve_basename,
    resolve_occurrence,
};
use crate::links::{LinkOccurrence, RewriteRecord};
use crate::parse::{self, RawForm};
use crate::rewrite::{self, FileBackup};
use crate::sqlite::{self, GraphStore, NodeType};
use crate::vault::Vault;
use crate::{Error, Result, paths};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddResult {
    pub added: Vec<String>,
    pub promoted: Vec<String>,
    pub rewritten: Vec<RewriteRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateResult {
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub phantomed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub phantomed: Vec<String>,
}

/// Per-file rewrite plan, ordered for deterministic application and
/// reporting.
#[derive(Debug, Default)]
pub(crate) struct RewritePlan {
    pairs: BTreeMap<String, Vec<(String, String)>>,
}

impl RewritePlan {
    pub(crate) fn push(&mut self, file: &str, old: &str, new: &str) {
        let v = self.pairs.entry(file.to_string()).or_default();
        if !v.iter().any(|(o, _)| o == old) {
            v.push((old.to_string(), new.to_string()));
        }
    }

    pub(crate) fn files(&self) -> impl Iterator<Item = (&String, &Vec<(String, String)>)> {
        self.pairs.iter()
    }

    pub(crate) fn records(&self) -> Vec<RewriteRecord> {
        self.pairs
            .iter()
            .flat_map(|(file, pairs)| {
                pairs.iter().map(|(old, new)| RewriteRecord {
                    file: file.clone(),
                    old_link: old.clone(),
                    new_link: new.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn apply(&self, vault: &Vault) -> Result<Vec<FileBackup>> {
        let mut backups = Vec::new();
        for (file, pairs) in &self.pairs {
            match rewrite::apply_file_rewrites(&vault.to_abs(file), pairs) {
                Ok(b) => backups.push(b),
                Err(e) => {
                    rewrite::rollback(&backups);
                    return Err(e);
                }
            }
        }
        Ok(backups)
    }

    /// Mirror the on-disk substitutions into the stored edge raws, and
    /// refresh the rewritten sources' mtimes so they do not read as
    /// stale afterwards.
    pub(crate) fn apply_to_edges(&self, conn: &Connection, vault: &Vault) -> Result<()> {
        for (file, pairs) in &self.pairs {
            let Some(node) = sqlite::node_by_path_key(conn, &file.to_lowercase())? else {
                continue;
            };
            for (old, new) in pairs {
                sqlite::update_edge_raw(conn, node.id, old, new)?;
            }
            sqlite::update_note_mtime(conn, node.id, vault.disk_mtime(file)?)?;
        }
        Ok(())
    }
}

pub(crate) fn resolve_strict<L: NodeLookup>(
    lookup: &L,
    source: &str,
    occ: &LinkOccurrence,
) -> Result<ResolvedTarget> {
    match resolve_occurrence(lookup, source, occ)? {
        Resolution::Target(t) => Ok(t),
        Resolution::Ambiguous { candidates } => {
            Err(Error::ambiguous(source, &occ.raw_link, candidates))
        }
        Resolution::Escape => Err(Error::escapes(source, &occ.raw_link)),
    }
}

pub(crate) fn insert_note_edges<L: NodeLookup>(
    conn: &Connection,
    lookup: &L,
    source_id: i64,
    source_path: &str,
    occs: &[LinkOccurrence],
) -> Result<()> {
    for occ in occs {
        let target = resolve_strict(lookup, source_path, occ)?;
        let target_id = materialize_target(conn, &target)?;
        sqlite::insert_edge(
            conn,
            source_id,
            target_id,
            occ.link_type,
            &occ.raw_link,
            &occ.subpath,
            occ.line_start,
            occ.line_end,
        )?;
    }
    Ok(())
}

/// True when a stored raw link is a basename link for `key`.
fn raw_is_basename_for(raw: &str, key: &str) -> bool {
    let parsed = parse::parse_raw_target(raw);
    if parsed.form == RawForm::Tag || parsed.target.is_empty() {
        return false;
    }
    paths::is_basename_link(&parsed.target) && paths::basename_key(&parsed.target) == key
}

/// Plan rewrites of every basename raw link aimed at `node_id` so they
/// name `target_path` explicitly.
pub(crate) fn plan_basename_to_path(
    conn: &Connection,
    node_id: i64,
    key: &str,
    target_path: &str,
    plan: &mut RewritePlan,
) -> Result<()> {
    for edge in sqlite::incoming_edges(conn, node_id)? {
        if !raw_is_basename_for(&edge.raw_link, key) {
            continue;
        }
        let Some(source) = sqlite::node_by_id(conn, edge.source_id)? else {
            continue;
        };
        let Some(source_path) = source.path else {
            continue;
        };
        let parsed = parse::parse_raw_target(&edge.raw_link);
        let new_raw = rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, target_path));
        if new_raw != edge.raw_link {
            plan.push(&source_path, &edge.raw_link, &new_raw);
        }
    }
    Ok(())
}

pub fn add(vault: &Vault, files: &[String], auto_disambiguate: bool) -> Result<AddResult> {
    let mut store = GraphStore::open(vault)?;

    let mut rels = Vec::new();
    for f in files {
        let rel = vault.rel_from_input(f)?;
        if !paths::is_md(&rel) {
            return Err(Error::InvalidPath(format!("not a markdown note: {rel}")));
        }
        if !vault.to_abs(&rel).is_file() {
            return Err(Error::NotFound(rel));
        }
        if !rels.contains(&rel) {
            rels.push(rel);
        }
    }
    rels.sort();

    let pre = MemoryLookup::from_store(&store.conn, vault)?;
    let dups: Vec<String> = rels
        .iter()
        .filter(|r| pre.has_note_path(r))
        .cloned()
        .collect();
    if !dups.is_empty() {
        return Err(Error::AlreadyRegistered(dups));
    }

    let mut parsed = Vec::new();
    for rel in &rels {
        let content = vault.read_note(rel)?;
        parsed.push((
            rel.clone(),
            vault.disk_mtime(rel)?,
            parse::parse_note(&content, &vault.config().frontmatter),
        ));
    }

    let mut post = pre.clone();
    for rel in &rels {
        post.add_note(rel);
    }

    // The new files themselves must resolve cleanly in the post-add
    // world before anything is touched.
    for (rel, _, occs) in &parsed {
        for occ in occs {
            resolve_strict(&post, rel, occ)?;
        }
    }

    let mut plan = RewritePlan::default();
    if auto_disambiguate {
        plan_add_disambiguation(&store.conn, &pre, &post, &rels, &mut plan)?;
    }

    let backups = plan.apply(vault)?;

    let tx = match store.conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            rewrite::rollback(&backups);
            return Err(e.into());
        }
    };
    // When several new files share a phantom's basename key, promotion
    // must land on the note the post-add resolution (or the rewrite
    // plan) names, so upsert that file first.
    let mut ordered: Vec<usize> = (0..parsed.len()).collect();
    ordered.sort_by_key(|&ix| {
        let rel = &parsed[ix].0;
        let winner = matches!(
            resolve_basename(&post, paths::note_basename(rel)),
            Ok(Resolution::Target(ResolvedTarget::Note { ref path })) if path == rel
        );
        (!winner, rel.clone())
    });

    let mut promoted = Vec::new();
    let outcome = (|| -> Result<()> {
        plan.apply_to_edges(&tx, vault)?;
        for &ix in &ordered {
            let (rel, mtime, _) = &parsed[ix];
            let (_, was_promoted) = sqlite::upsert_note(&tx, rel, true, *mtime)?;
            if was_promoted {
                promoted.push(paths::note_basename(rel).to_string());
            }
        }
        for (rel, _, occs) in &parsed {
            let Some(node) = sqlite::node_by_path_key(&tx, &rel.to_lowercase())? else {
                return Err(Error::Unregistered(rel.clone()));
            };
            insert_note_edges(&tx, &post, node.id, rel, occs)?;
        }
        sqlite::cleanup_orphans(&tx)?;
        Ok(())
    })();
    if let Err(e) = outcome.and_then(|()| tx.commit().map_err(Error::from)) {
        rewrite::rollback(&backups);
        return Err(e);
    }

    info!(added = rels.len(), rewritten = backups.len(), "add complete");
    Ok(AddResult {
        added: rels,
        promoted,
        rewritten: plan.records(),
    })
}

/// Decide which existing basename links change meaning once the new
/// files land, and plan rewrites that pin them to their pre-add
/// resolution.
fn plan_add_disambiguation(
    conn: &Connection,
    pre: &MemoryLookup,
    post: &MemoryLookup,
    rels: &[String],
    plan: &mut RewritePlan,
) -> Result<()> {
    let mut keys: Vec<String> = rels.iter().map(|r| paths::basename_key(r)).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let name = rels
            .iter()
            .find(|r| paths::basename_key(r) == key)
            .map(|r| paths::note_basename(r).to_string())
            .unwrap_or_else(|| key.clone());
        let pre_res = resolve_basename(pre, &name)?;
        let post_res = resolve_basename(post, &name)?;
        if pre_res == post_res {
            continue;
        }

        match pre_res {
            Resolution::Target(ResolvedTarget::Note { path }) => {
                if post_res == Resolution::Target(ResolvedTarget::Note { path: path.clone() }) {
                    continue;
                }
                if let Some(node) = sqlite::node_by_path_key(conn, &path.to_lowercase())? {
                    debug!(key = %key, incumbent = %path, "basename meaning shifts; pinning links");
                    plan_basename_to_path(conn, node.id, &key, &path, plan)?;
                }
            }
            Resolution::Target(ResolvedTarget::Asset { path }) => {
                if let Some(node) = sqlite::node_by_path_key(conn, &path.to_lowercase())? {
                    plan_basename_to_path(conn, node.id, &key, &path, plan)?;
                }
            }
            Resolution::Target(ResolvedTarget::Phantom { .. }) => {
                // Two or more new candidates for a phantom name: pin the
                // old links to the first candidate in path order, which
                // is also the note the phantom will promote onto.
                let added_k: Vec<&String> = rels
                    .iter()
                    .filter(|r| paths::basename_key(r) == key)
                    .collect();
                if added_k.len() < 2 {
                    continue;
                }
                if matches!(post_res, Resolution::Target(ResolvedTarget::Note { .. })) {
                    // Root-priority picks a unique winner; promotion
                    // carries the old links there without rewriting.
                    continue;
                }
                let chosen = added_k[0].clone();
                if let Some(ph) =
                    sqlite::node_by_key(conn, &format!("phantom:name:{key}"))?
                {
                    plan_basename_to_path(conn, ph.id, &key, &chosen, plan)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

pub fn update(vault: &Vault, files: &[String]) -> Result<UpdateResult> {
    let mut store = GraphStore::open(vault)?;

    let mut rels = Vec::new();
    for f in files {
        let rel = vault.rel_from_input(f)?;
        if !rels.contains(&rel) {
            rels.push(rel);
        }
    }
    rels.sort();

    let mut existing = Vec::new();
    let mut missing = Vec::new();
    for rel in &rels {
        let node = sqlite::node_by_path_key(&store.conn, &rel.to_lowercase())?
            .filter(|n| n.node_type == NodeType::Note)
            .ok_or_else(|| Error::Unregistered(rel.clone()))?;
        if vault.to_abs(rel).is_file() {
            existing.push((rel.clone(), node.id));
        } else {
            missing.push((rel.clone(), node.id));
        }
    }

    // Post-update world: missing files leave the note maps, so links
    // that pointed at them re-resolve as phantoms.
    let mut maps = MemoryLookup::from_store(&store.conn, vault)?;
    for (rel, _) in &missing {
        maps.remove_note(rel);
    }

    let mut parsed = Vec::new();
    for (rel, id) in &existing {
        let content = vault.read_note(rel)?;
        let occs = parse::parse_note(&content, &vault.config().frontmatter);
        for occ in &occs {
            resolve_strict(&maps, rel, occ)?;
        }
        parsed.push((rel.clone(), *id, vault.disk_mtime(rel)?, occs));
    }

    let tx = store.conn.transaction()?;
    let mut result = UpdateResult::default();
    for (rel, id, mtime, occs) in &parsed {
        sqlite::delete_edges_by_source(&tx, *id)?;
        sqlite::upsert_note(&tx, rel, true, *mtime)?;
        insert_note_edges(&tx, &maps, *id, rel, occs)?;
        result.updated.push(rel.clone());
    }
    for (rel, id) in &missing {
        sqlite::delete_edges_by_source(&tx, *id)?;
        if sqlite::has_incoming(&tx, *id)? {
            let name = sqlite::demote_note_to_phantom(&tx, *id)?;
            result.phantomed.push(name);
        } else {
            sqlite::remove_node(&tx, *id)?;
            result.deleted.push(rel.clone());
        }
    }
    sqlite::cleanup_orphans(&tx)?;
    tx.commit()?;

    info!(
        updated = result.updated.len(),
        deleted = result.deleted.len(),
        phantomed = result.phantomed.len(),
        "update complete"
    );
    Ok(result)
}

pub fn delete(vault: &Vault, files: &[String], remove_files: bool) -> Result<DeleteResult> {
    let mut store = GraphStore::open(vault)?;

    let mut file_targets: Vec<(String, sqlite::Node)> = Vec::new();
    let mut dir_targets: Vec<String> = Vec::new();
    for f in files {
        let rel = vault.rel_from_input(f)?;
        match sqlite::node_by_path_key(&store.conn, &rel.to_lowercase())? {
            Some(node) => file_targets.push((rel, node)),
            None if remove_files && has_registered_under(&store.conn, &rel)? => {
                dir_targets.push(rel);
            }
            None => return Err(Error::Unregistered(rel)),
        }
    }

    for dir in &dir_targets {
        let prefix = format!("{dir}/");
        for node_type in [NodeType::Note, NodeType::Asset] {
            for node in sqlite::nodes_by_type(&store.conn, node_type)? {
                if let Some(p) = &node.path {
                    if p.starts_with(&prefix) {
                        file_targets.push((p.clone(), node.clone()));
                    }
                }
            }
        }
    }
    file_targets.sort_by(|a, b| a.0.cmp(&b.0));
    file_targets.dedup_by(|a, b| a.0 == b.0);

    let tx = store.conn.transaction()?;
    let mut result = DeleteResult::default();
    for (rel, node) in &file_targets {
        if remove_files {
            match std::fs::remove_file(vault.to_abs(rel)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(vault.to_abs(rel), e)),
            }
        }
        sqlite::delete_edges_by_source(&tx, node.id)?;
        if node.node_type == NodeType::Note && sqlite::has_incoming(&tx, node.id)? {
            let name = sqlite::demote_note_to_phantom(&tx, node.id)?;
            result.phantomed.push(name);
        } else {
            sqlite::remove_node(&tx, node.id)?;
            result.deleted.push(rel.clone());
        }
    }
    sqlite::cleanup_orphans(&tx)?;
    tx.commit()?;

    for dir in &dir_targets {
        remove_leftover_files(vault, dir)?;
        remove_empty_dirs(vault, dir);
    }

    info!(
        deleted = result.deleted.len(),
        phantomed = result.phantomed.len(),
        "delete complete"
    );
    Ok(result)
}

fn has_registered_under(conn: &Connection, dir: &str) -> Result<bool> {
    let prefix = format!("{dir}/");
    for node_type in [NodeType::Note, NodeType::Asset] {
        for node in sqlite::nodes_by_type(conn, node_type)? {
            if node.path.as_deref().is_some_and(|p| p.starts_with(&prefix)) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Unregistered non-markdown files under a deleted directory go too.
fn remove_leftover_files(vault: &Vault, dir: &str) -> Result<()> {
    let abs = vault.to_abs(dir);
    if !abs.is_dir() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(&abs)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if paths::is_md(&name) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(entry.path(), e)),
        }
    }
    Ok(())
}

/// Prune now-empty directories bottom-up, stopping at the vault root
/// and at anything still occupied.
fn remove_empty_dirs(vault: &Vault, dir: &str) {
    let abs = vault.to_abs(dir);
    let mut dirs: Vec<std::path::PathBuf> = walkdir::WalkDir::new(&abs)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for d in dirs {
        if d == vault.root() {
            continue;
        }
        // Fails on non-empty; that is the stop condition.
        let _ = std::fs::remove_dir(&d);
    }
}
