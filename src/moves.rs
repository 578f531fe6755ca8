//! Move engine: single-file and directory moves with incoming,
//! collateral and outgoing rewrites computed against the post-move
//! world.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::link_resolve::{
    MemoryLookup, Resolution, ResolvedTarget, StoreLookup, resolve_basename,
};
use crate::links::RewriteRecord;
use crate::mutate::insert_note_edges;
use crate::parse::{self, ParsedRaw, RawForm};
use crate::rewrite::{self, FileBackup};
use crate::sqlite::{self, GraphStore, Node, NodeType};
use crate::vault::Vault;
use crate::{Error, Result, paths};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveResult {
    pub rewritten: Vec<RewriteRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovedPair {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveDirResult {
    pub moved: Vec<MovedPair>,
    pub rewritten: Vec<RewriteRecord>,
}

/// Planned substitutions: per-file pairs for the disk rewrite plus the
/// matching stored-raw updates keyed by source node id.
#[derive(Debug, Default)]
struct MovePlan {
    file_pairs: BTreeMap<String, Vec<(String, String)>>,
    edge_updates: Vec<(i64, String, String)>,
}

impl MovePlan {
    fn push(&mut self, file: &str, source_id: Option<i64>, old: &str, new: &str) {
        if old == new {
            return;
        }
        let v = self.file_pairs.entry(file.to_string()).or_default();
        if !v.iter().any(|(o, _)| o == old) {
            v.push((old.to_string(), new.to_string()));
            if let Some(id) = source_id {
                self.edge_updates.push((id, old.to_string(), new.to_string()));
            }
        }
    }

    fn records(&self) -> Vec<RewriteRecord> {
        self.file_pairs
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

    fn apply(&self, vault: &Vault) -> Result<Vec<FileBackup>> {
        let mut backups = Vec::new();
        for (file, pairs) in &self.file_pairs {
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

    fn apply_edge_updates(&self, conn: &Connection, vault: &Vault) -> Result<()> {
        let mut touched = HashSet::new();
        for (source_id, old, new) in &self.edge_updates {
            sqlite::update_edge_raw(conn, *source_id, old, new)?;
            touched.insert(*source_id);
        }
        // Rewritten sources changed on disk; refresh their mtimes.
        for id in touched {
            if let Some(node) = sqlite::node_by_id(conn, id)? {
                if let Some(path) = node.path {
                    sqlite::update_note_mtime(conn, id, vault.disk_mtime(&path)?)?;
                }
            }
        }
        Ok(())
    }
}

/// Dispatch: a registered file moves alone, a directory containing
/// registered files moves as a batch.
pub fn move_entry(vault: &Vault, from: &str, to: &str) -> Result<MoveDirResult> {
    let store = GraphStore::open(vault)?;
    let from_rel = vault.rel_from_input(from)?;
    let to_rel = vault.rel_from_input(to)?;

    if sqlite::node_by_path_key(&store.conn, &from_rel.to_lowercase())?.is_some() {
        drop(store);
        let res = move_file(vault, &from_rel, &to_rel)?;
        return Ok(MoveDirResult {
            moved: vec![MovedPair {
                from: from_rel,
                to: to_rel,
            }],
            rewritten: res.rewritten,
        });
    }
    if !registered_under(&store.conn, &from_rel)?.is_empty() {
        drop(store);
        return move_dir(vault, &from_rel, &to_rel);
    }
    Err(Error::Unregistered(from_rel))
}

pub fn move_file(vault: &Vault, from: &str, to: &str) -> Result<MoveResult> {
    let mut store = GraphStore::open(vault)?;
    let from = vault.rel_from_input(from)?;
    let to = vault.rel_from_input(to)?;
    if from == to {
        return Err(Error::InvalidPath(format!("move onto itself: {from}")));
    }

    let node = sqlite::node_by_path_key(&store.conn, &from.to_lowercase())?
        .ok_or_else(|| Error::Unregistered(from.clone()))?;
    let is_note = node.node_type == NodeType::Note;
    if is_note != paths::is_md(&to) {
        return Err(Error::InvalidPath(format!(
            "cannot change file kind: {from} -> {to}"
        )));
    }
    if sqlite::node_by_path_key(&store.conn, &to.to_lowercase())?.is_some() {
        return Err(Error::DestinationExists(to));
    }

    let from_on_disk = vault.to_abs(&from).is_file();
    let to_on_disk = vault.to_abs(&to).is_file();
    match (from_on_disk, to_on_disk) {
        (false, false) => return Err(Error::NotFound(from)),
        (true, true) => return Err(Error::DestinationExists(to)),
        // (false, true) is the already-moved path; (true, false) renames.
        _ => {}
    }

    let pre = MemoryLookup::from_store(&store.conn, vault)?;
    let mut post = pre.clone();
    if is_note {
        post.remove_note(&from);
        post.add_note(&to);
    } else {
        post.remove_asset(&from);
        post.add_asset(&to);
    }

    let moved_file_on_disk = if from_on_disk { from.clone() } else { to.clone() };
    let mut plan = MovePlan::default();
    plan_incoming(&store.conn, &post, &node, &to, &moved_file_on_disk, &mut plan)?;
    if is_note {
        plan_collateral(&store.conn, &post, &node, &to, &mut plan)?;
        plan_outgoing(
            &store.conn,
            &post,
            &node,
            &from,
            &to,
            &moved_file_on_disk,
            &mut plan,
        )?;
    }

    // Only the moved file is stale-checked; external rewrite targets
    // commonly get touched by other tools without content changes.
    if from_on_disk && is_note {
        if vault.disk_mtime(&from)? != node.mtime.unwrap_or(0) {
            return Err(Error::Stale(from));
        }
    }

    let backups = plan.apply(vault)?;
    let mut renamed = false;
    if from_on_disk {
        if let Err(e) = disk_rename(vault, &from, &to) {
            rewrite::rollback(&backups);
            return Err(e);
        }
        renamed = true;
    }

    let undo = |backups: &[FileBackup], renamed: bool| {
        rewrite::rollback(backups);
        if renamed {
            let _ = std::fs::rename(vault.to_abs(&to), vault.to_abs(&from));
        }
    };

    let tx = match store.conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            undo(&backups, renamed);
            return Err(e.into());
        }
    };
    let outcome = (|| -> Result<()> {
        plan.apply_edge_updates(&tx, vault)?;
        if is_note {
            let mtime = vault.disk_mtime(&to)?;
            sqlite::update_note_path(&tx, node.id, &to, mtime)?;
            if let Some(ph) = sqlite::node_by_key(&tx, &sqlite::phantom_key(&to))? {
                sqlite::promote_phantom_edges(&tx, ph.id, node.id)?;
            }
            refresh_note_edges(vault, &tx, node.id, &to)?;
        } else {
            sqlite::update_asset_path(&tx, node.id, &to)?;
        }
        sqlite::cleanup_orphans(&tx)?;
        Ok(())
    })();
    if let Err(e) = outcome.and_then(|()| tx.commit().map_err(Error::from)) {
        undo(&backups, renamed);
        return Err(e);
    }

    info!(%from, %to, rewrites = plan.edge_updates.len(), "move complete");
    Ok(MoveResult {
        rewritten: plan.records(),
    })
}

/// Phase 1: every link aimed at the moved file. Basename links that
/// still resolve to the moved file afterwards stay untouched; path and
/// relative forms always follow the file.
fn plan_incoming(
    conn: &Connection,
    post: &MemoryLookup,
    node: &Node,
    to: &str,
    moved_file_on_disk: &str,
    plan: &mut MovePlan,
) -> Result<()> {
    let expected = expected_target(node.node_type, to);
    for edge in sqlite::incoming_edges(conn, node.id)? {
        let parsed = parse::parse_raw_target(&edge.raw_link);
        if parsed.form == RawForm::Tag || parsed.target.is_empty() {
            continue;
        }
        let self_edge = edge.source_id == node.id;
        let Some(source) = sqlite::node_by_id(conn, edge.source_id)? else {
            continue;
        };
        let Some(source_path) = source.path else {
            continue;
        };
        // A self-link's source directory moves along with the target.
        let (rewrite_file, source_dir) = if self_edge {
            (moved_file_on_disk.to_string(), paths::parent_dir(to).to_string())
        } else {
            (source_path.clone(), paths::parent_dir(&source_path).to_string())
        };

        let new_raw = if is_relative_target(&parsed) {
            rewrite::rebuild_raw(&parsed, &rewrite::relative_target_text(&parsed, &source_dir, to))
        } else if parsed.target.starts_with('/') {
            let text = format!("/{}", rewrite::retargeted_text(&parsed, to));
            rewrite::rebuild_raw(&parsed, &text)
        } else if paths::is_basename_link(&parsed.target) {
            match resolve_basename(post, &parsed.target)? {
                Resolution::Target(ref t) if *t == expected => continue,
                _ => rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, to)),
            }
        } else {
            rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, to))
        };

        // The moved file's own edges are rebuilt by a re-parse, so no
        // stored-raw update is needed for them.
        let id_for_update = if self_edge { None } else { Some(edge.source_id) };
        plan.push(&rewrite_file, id_for_update, &edge.raw_link, &new_raw);
    }
    Ok(())
}

/// Phase 2: third-party basename links whose meaning would shift
/// because the moved file takes a new basename. Computed against
/// existing notes only (phantoms excluded).
fn plan_collateral(
    conn: &Connection,
    post: &MemoryLookup,
    node: &Node,
    to: &str,
    plan: &mut MovePlan,
) -> Result<()> {
    let to_key = paths::basename_key(to);
    if to_key == node.name.to_lowercase() {
        // Basename unchanged: candidate sets keep their members and
        // root-priority, so no third-party meaning can shift.
        return Ok(());
    }
    for cand in sqlite::nodes_by_name_key(conn, NodeType::Note, &to_key)? {
        if cand.id == node.id || !cand.exists_flag {
            continue;
        }
        let Some(cand_path) = cand.path.clone() else {
            continue;
        };
        for edge in sqlite::incoming_edges(conn, cand.id)? {
            let parsed = parse::parse_raw_target(&edge.raw_link);
            if parsed.form == RawForm::Tag
                || !paths::is_basename_link(&parsed.target)
                || paths::basename_key(&parsed.target) != to_key
            {
                continue;
            }
            match resolve_basename(post, &parsed.target)? {
                Resolution::Target(ResolvedTarget::Note { ref path }) if *path == cand_path => {
                    continue;
                }
                _ => {}
            }
            let Some(source) = sqlite::node_by_id(conn, edge.source_id)? else {
                continue;
            };
            let Some(source_path) = source.path else { continue };
            let new_raw =
                rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, &cand_path));
            debug!(file = %source_path, old = %edge.raw_link, new = %new_raw, "collateral");
            plan.push(&source_path, Some(edge.source_id), &edge.raw_link, &new_raw);
        }
    }
    Ok(())
}

/// Phase 3: the moved file's own links. Relative links follow the new
/// directory; basename links whose resolution would change get pinned
/// to their pre-move target's path.
fn plan_outgoing(
    conn: &Connection,
    post: &MemoryLookup,
    node: &Node,
    from: &str,
    to: &str,
    moved_file_on_disk: &str,
    plan: &mut MovePlan,
) -> Result<()> {
    let new_dir = paths::parent_dir(to).to_string();
    for edge in sqlite::outgoing_edges(conn, node.id)? {
        if edge.target_id == node.id {
            // Self-links were handled with the incoming pass.
            continue;
        }
        let parsed = parse::parse_raw_target(&edge.raw_link);
        if parsed.form == RawForm::Tag || parsed.target.is_empty() {
            continue;
        }
        let Some(target) = sqlite::node_by_id(conn, edge.target_id)? else {
            continue;
        };

        if is_relative_target(&parsed) {
            // Phantom targets have no path; keep pointing at the same
            // spot the old relative link named.
            let target_path = match target.path.clone() {
                Some(p) => p,
                None => match paths::join_relative(paths::parent_dir(from), &parsed.target) {
                    Some(j) => j,
                    None => continue,
                },
            };
            let new_raw = rewrite::rebuild_raw(
                &parsed,
                &rewrite::relative_target_text(&parsed, &new_dir, &target_path),
            );
            plan.push(moved_file_on_disk, None, &edge.raw_link, &new_raw);
            continue;
        }

        if paths::is_basename_link(&parsed.target) {
            if target.node_type == NodeType::Phantom {
                // If the move gives the phantom's name a real file,
                // that is promotion, which is the desired meaning.
                continue;
            }
            let Some(pre_path) = target.path.clone() else { continue };
            let expected = expected_target(target.node_type, &pre_path);
            match resolve_basename(post, &parsed.target)? {
                Resolution::Target(ref t) if *t == expected => continue,
                _ => {}
            }
            let new_raw =
                rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, &pre_path));
            plan.push(moved_file_on_disk, None, &edge.raw_link, &new_raw);
        }
        // Vault-absolute and path links keep meaning: their targets
        // did not move.
    }
    Ok(())
}

pub fn move_dir(vault: &Vault, from_dir: &str, to_dir: &str) -> Result<MoveDirResult> {
    let mut store = GraphStore::open(vault)?;
    let from_dir = vault.rel_from_input(from_dir)?;
    let to_dir = vault.rel_from_input(to_dir)?;
    if from_dir.is_empty() || to_dir.is_empty() {
        return Err(Error::InvalidPath("cannot move the vault root".into()));
    }
    if to_dir == from_dir || to_dir.starts_with(&format!("{from_dir}/")) {
        return Err(Error::InvalidPath(format!(
            "destination overlaps source: {from_dir} -> {to_dir}"
        )));
    }

    let moved_nodes = registered_under(&store.conn, &from_dir)?;
    if moved_nodes.is_empty() {
        return Err(Error::Unregistered(from_dir));
    }

    let prefix = format!("{from_dir}/");
    let new_path_for = |old: &str| -> String {
        format!("{to_dir}/{}", old.strip_prefix(&prefix).unwrap_or(old))
    };

    let mut moved_ids = HashSet::new();
    let mut path_map: HashMap<String, String> = HashMap::new();
    for n in &moved_nodes {
        let Some(p) = &n.path else { continue };
        moved_ids.insert(n.id);
        path_map.insert(p.clone(), new_path_for(p));
    }

    // Unregistered non-markdown files under the directory move on disk
    // as part of the batch.
    let mut disk_only: Vec<(String, String)> = Vec::new();
    let abs_from = vault.to_abs(&from_dir);
    if abs_from.is_dir() {
        for entry in walkdir::WalkDir::new(&abs_from)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = match entry.path().strip_prefix(vault.root()) {
                Ok(r) => paths::normalize(&r.to_string_lossy()),
                Err(_) => continue,
            };
            if paths::is_md(&rel) || path_map.contains_key(&rel) {
                continue;
            }
            disk_only.push((rel.clone(), new_path_for(&rel)));
        }
    }

    for (_, new_path) in path_map.iter().chain(disk_only.iter().map(|(a, b)| (a, b))) {
        if vault.to_abs(new_path).exists() {
            return Err(Error::DestinationExists(new_path.clone()));
        }
        if sqlite::node_by_path_key(&store.conn, &new_path.to_lowercase())?.is_some() {
            return Err(Error::DestinationExists(new_path.clone()));
        }
    }

    let pre = MemoryLookup::from_store(&store.conn, vault)?;
    let mut post = pre.clone();
    for n in &moved_nodes {
        let Some(p) = &n.path else { continue };
        match n.node_type {
            NodeType::Note => {
                post.remove_note(p);
                post.add_note(&path_map[p]);
            }
            NodeType::Asset => {
                post.remove_asset(p);
                post.add_asset(&path_map[p]);
            }
            _ => {}
        }
    }

    // All rewrites are computed against the final state; per-file
    // sequencing would see wrong intermediate basename landscapes.
    let mut plan = MovePlan::default();
    for n in &moved_nodes {
        let Some(old_path) = &n.path else { continue };
        let new_path = &path_map[old_path];

        for edge in sqlite::incoming_edges(&store.conn, n.id)? {
            if moved_ids.contains(&edge.source_id) {
                continue;
            }
            let parsed = parse::parse_raw_target(&edge.raw_link);
            if parsed.form == RawForm::Tag || parsed.target.is_empty() {
                continue;
            }
            let Some(source) = sqlite::node_by_id(&store.conn, edge.source_id)? else {
                continue;
            };
            let Some(source_path) = source.path else { continue };
            let new_raw = if is_relative_target(&parsed) {
                rewrite::rebuild_raw(
                    &parsed,
                    &rewrite::relative_target_text(
                        &parsed,
                        paths::parent_dir(&source_path),
                        new_path,
                    ),
                )
            } else if parsed.target.starts_with('/') {
                let text = format!("/{}", rewrite::retargeted_text(&parsed, new_path));
                rewrite::rebuild_raw(&parsed, &text)
            } else if paths::is_basename_link(&parsed.target) {
                // Basenames do not change in a directory move, so the
                // post-state resolution still lands on the moved file.
                match resolve_basename(&post, &parsed.target)? {
                    Resolution::Target(ref t) if *t == expected_target(n.node_type, new_path) => {
                        continue;
                    }
                    _ => rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, new_path)),
                }
            } else {
                rewrite::rebuild_raw(&parsed, &rewrite::retargeted_text(&parsed, new_path))
            };
            plan.push(&source_path, Some(edge.source_id), &edge.raw_link, &new_raw);
        }

        if n.node_type != NodeType::Note {
            continue;
        }
        let new_dir = paths::parent_dir(new_path).to_string();
        for edge in sqlite::outgoing_edges(&store.conn, n.id)? {
            let parsed = parse::parse_raw_target(&edge.raw_link);
            if parsed.form == RawForm::Tag || parsed.target.is_empty() {
                continue;
            }
            let Some(target) = sqlite::node_by_id(&store.conn, edge.target_id)? else {
                continue;
            };
            let target_new_path = target
                .path
                .as_ref()
                .map(|p| path_map.get(p).cloned().unwrap_or_else(|| p.clone()));

            if is_relative_target(&parsed) {
                let tpath = match target_new_path {
                    Some(p) => p,
                    None => {
                        let Some(joined) =
                            paths::join_relative(paths::parent_dir(old_path), &parsed.target)
                        else {
                            continue;
                        };
                        path_map.get(&joined).cloned().unwrap_or(joined)
                    }
                };
                let new_raw = rewrite::rebuild_raw(
                    &parsed,
                    &rewrite::relative_target_text(&parsed, &new_dir, &tpath),
                );
                plan.push(old_path, None, &edge.raw_link, &new_raw);
                continue;
            }
            if paths::is_basename_link(&parsed.target) {
                // No basename changes anywhere in the batch.
                continue;
            }
            // Path-form link to another moved file follows the batch.
            if let Some(p) = &target.path {
                if moved_ids.contains(&target.id) {
                    let text = rewrite::retargeted_text(&parsed, &path_map[p]);
                    let text = if parsed.target.starts_with('/') {
                        format!("/{text}")
                    } else {
                        text
                    };
                    let new_raw = rewrite::rebuild_raw(&parsed, &text);
                    plan.push(old_path, None, &edge.raw_link, &new_raw);
                }
            }
        }
    }

    // Stale check on the moved set only.
    for n in &moved_nodes {
        let Some(p) = &n.path else { continue };
        if !vault.to_abs(p).is_file() {
            return Err(Error::NotFound(p.clone()));
        }
        if n.node_type == NodeType::Note && vault.disk_mtime(p)? != n.mtime.unwrap_or(0) {
            return Err(Error::Stale(p.clone()));
        }
    }

    let backups = plan.apply(vault)?;
    let mut renamed: Vec<(String, String)> = Vec::new();
    let all_moves: Vec<(String, String)> = path_map
        .iter()
        .map(|(a, b)| (a.clone(), b.clone()))
        .chain(disk_only.iter().cloned())
        .collect();
    for (old, new) in &all_moves {
        if let Err(e) = disk_rename(vault, old, new) {
            for (o, n2) in renamed.iter().rev() {
                let _ = std::fs::rename(vault.to_abs(n2), vault.to_abs(o));
            }
            rewrite::rollback(&backups);
            return Err(e);
        }
        renamed.push((old.clone(), new.clone()));
    }

    let undo = |backups: &[FileBackup], renamed: &[(String, String)]| {
        for (o, n) in renamed.iter().rev() {
            let _ = std::fs::rename(vault.to_abs(n), vault.to_abs(o));
        }
        rewrite::rollback(backups);
    };

    let tx = match store.conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            undo(&backups, &renamed);
            return Err(e.into());
        }
    };
    let outcome = (|| -> Result<()> {
        plan.apply_edge_updates(&tx, vault)?;
        for n in &moved_nodes {
            let Some(p) = &n.path else { continue };
            let new_path = &path_map[p];
            match n.node_type {
                NodeType::Note => {
                    let mtime = vault.disk_mtime(new_path)?;
                    sqlite::update_note_path(&tx, n.id, new_path, mtime)?;
                }
                NodeType::Asset => sqlite::update_asset_path(&tx, n.id, new_path)?,
                _ => {}
            }
        }
        for n in &moved_nodes {
            if n.node_type != NodeType::Note {
                continue;
            }
            let Some(p) = &n.path else { continue };
            refresh_note_edges(vault, &tx, n.id, &path_map[p])?;
        }
        sqlite::cleanup_orphans(&tx)?;
        Ok(())
    })();
    if let Err(e) = outcome.and_then(|()| tx.commit().map_err(Error::from)) {
        undo(&backups, &renamed);
        return Err(e);
    }

    prune_empty_dirs(vault, &from_dir);

    let mut moved: Vec<MovedPair> = all_moves
        .into_iter()
        .map(|(from, to)| MovedPair { from, to })
        .collect();
    moved.sort_by(|a, b| a.from.cmp(&b.from));
    info!(from = %from_dir, to = %to_dir, files = moved.len(), "move-dir complete");
    Ok(MoveDirResult {
        moved,
        rewritten: plan.records(),
    })
}

fn expected_target(node_type: NodeType, path: &str) -> ResolvedTarget {
    match node_type {
        NodeType::Asset => ResolvedTarget::Asset {
            path: path.to_string(),
        },
        _ => ResolvedTarget::Note {
            path: path.to_string(),
        },
    }
}

fn is_relative_target(parsed: &ParsedRaw) -> bool {
    parsed.target.starts_with("./") || parsed.target.starts_with("../")
}

fn registered_under(conn: &Connection, dir: &str) -> Result<Vec<Node>> {
    let prefix = format!("{dir}/");
    let mut out = Vec::new();
    for node_type in [NodeType::Note, NodeType::Asset] {
        for node in sqlite::nodes_by_type(conn, node_type)? {
            if node.path.as_deref().is_some_and(|p| p.starts_with(&prefix)) {
                out.push(node);
            }
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn disk_rename(vault: &Vault, from: &str, to: &str) -> Result<()> {
    let abs_to = vault.to_abs(to);
    if let Some(parent) = abs_to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::rename(vault.to_abs(from), &abs_to).map_err(|e| Error::io(vault.to_abs(from), e))
}

fn prune_empty_dirs(vault: &Vault, dir: &str) {
    let abs = vault.to_abs(dir);
    if !abs.is_dir() {
        return;
    }
    let mut dirs: Vec<std::path::PathBuf> = walkdir::WalkDir::new(&abs)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for d in dirs {
        let _ = std::fs::remove_dir(&d);
    }
}

/// Re-parse a moved note at its new path and rebuild its outgoing
/// edges against the updated store.
fn refresh_note_edges(vault: &Vault, conn: &Connection, node_id: i64, path: &str) -> Result<()> {
    sqlite::delete_edges_by_source(conn, node_id)?;
    let content = vault.read_note(path)?;
    let occs = parse::parse_note(&content, &vault.config().frontmatter);
    let lookup = StoreLookup::new(conn);
    insert_note_edges(conn, &lookup, node_id, path, &occs)?;
    Ok(())
}
