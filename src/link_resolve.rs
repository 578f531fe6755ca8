//! Link resolution: map a parsed occurrence plus its source note to a
//! single target identity.
//!
//! Two lookup backends share one contract: [`MemoryLookup`] over
//! hashmaps (used by `build` and by the mutation planners, which need
//! pre/post world states) and [`StoreLookup`] over SQL. The resolver is
//! pure; materializing phantom/tag nodes is done afterwards via
//! [`materialize_target`].

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::links::LinkOccurrence;
use crate::sqlite::{self, NodeType};
use crate::vault::Vault;
use crate::{Result, paths};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Note { path: String },
    Asset { path: String },
    Phantom { name: String },
    Tag { name: String },
}

/// Outcome of resolving one occurrence. `Ambiguous` and `Escape` are
/// user errors in strict mode; callers attach file and raw-link
/// context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Target(ResolvedTarget),
    Ambiguous { candidates: Vec<String> },
    Escape,
}

pub trait NodeLookup {
    /// Note path by case-folded path key.
    fn note_by_path(&self, path_lower: &str) -> Result<Option<String>>;
    /// Asset path by case-folded path key.
    fn asset_by_path(&self, path_lower: &str) -> Result<Option<String>>;
    /// Note candidates by basename key, ordered by path.
    fn notes_by_basename(&self, key: &str) -> Result<Vec<String>>;
    /// Asset candidates by basename key (filename with extension).
    fn assets_by_basename(&self, key: &str) -> Result<Vec<String>>;
    fn phantom_exists(&self, key: &str) -> Result<bool>;
}

pub fn resolve_occurrence<L: NodeLookup>(
    lookup: &L,
    source_path: &str,
    occ: &LinkOccurrence,
) -> Result<Resolution> {
    if occ.is_tag() {
        return Ok(Resolution::Target(ResolvedTarget::Tag {
            name: occ.target.clone(),
        }));
    }
    if occ.target.is_empty() && !occ.subpath.is_empty() {
        return Ok(Resolution::Target(ResolvedTarget::Note {
            path: source_path.to_string(),
        }));
    }

    if occ.is_relative {
        let dir = paths::parent_dir(source_path);
        return match paths::join_relative(dir, &occ.target) {
            None => Ok(Resolution::Escape),
            Some(joined) => resolve_path(lookup, &joined),
        };
    }

    if let Some(stripped) = occ.target.strip_prefix('/') {
        if paths::absolute_escapes(stripped) {
            return Ok(Resolution::Escape);
        }
        return resolve_path(lookup, &paths::normalize(stripped));
    }

    if occ.is_basename {
        return resolve_basename(lookup, &occ.target);
    }

    resolve_path(lookup, &occ.target)
}

/// Path resolution: exact note path, note path with `.md` appended,
/// asset path, then phantom by basename key.
pub fn resolve_path<L: NodeLookup>(lookup: &L, target: &str) -> Result<Resolution> {
    let key = target.to_lowercase();
    if let Some(p) = lookup.note_by_path(&key)? {
        return Ok(Resolution::Target(ResolvedTarget::Note { path: p }));
    }
    if !key.ends_with(".md") {
        if let Some(p) = lookup.note_by_path(&format!("{key}.md"))? {
            return Ok(Resolution::Target(ResolvedTarget::Note { path: p }));
        }
    }
    if let Some(p) = lookup.asset_by_path(&key)? {
        return Ok(Resolution::Target(ResolvedTarget::Asset { path: p }));
    }
    phantom_resolution(lookup, target)
}

/// An already-registered phantom wins by basename key; otherwise the
/// resolution creates one at materialization. The two arms converge on
/// the same key, so the occurrence's written basename is the name
/// either way.
fn phantom_resolution<L: NodeLookup>(lookup: &L, target: &str) -> Result<Resolution> {
    let name = paths::note_basename(target).to_string();
    if lookup.phantom_exists(&paths::basename_key(target))? {
        return Ok(Resolution::Target(ResolvedTarget::Phantom { name }));
    }
    Ok(Resolution::Target(ResolvedTarget::Phantom { name }))
}

/// Basename resolution: notes first (root-priority on ties), then
/// assets, then phantom.
pub fn resolve_basename<L: NodeLookup>(lookup: &L, target: &str) -> Result<Resolution> {
    let cands = lookup.notes_by_basename(&paths::basename_key(target))?;
    if !cands.is_empty() {
        return Ok(pick_candidate(cands));
    }
    let cands = lookup.assets_by_basename(&paths::asset_basename_key(target))?;
    if !cands.is_empty() {
        return Ok(match pick_candidate(cands) {
            Resolution::Target(ResolvedTarget::Note { path }) => {
                Resolution::Target(ResolvedTarget::Asset { path })
            }
            other => other,
        });
    }
    phantom_resolution(lookup, target)
}

fn pick_candidate(cands: Vec<String>) -> Resolution {
    if cands.len() == 1 {
        return Resolution::Target(ResolvedTarget::Note {
            path: cands.into_iter().next().unwrap_or_default(),
        });
    }
    let mut roots = cands.iter().filter(|p| paths::is_root_file(p));
    match (roots.next(), roots.next()) {
        (Some(root), None) => Resolution::Target(ResolvedTarget::Note {
            path: root.clone(),
        }),
        _ => Resolution::Ambiguous { candidates: cands },
    }
}

/// In-memory lookup over a world state the caller composes: notes and
/// assets by path, plus registered phantoms. Mutation planners edit it
/// to model pre- and post-states.
#[derive(Debug, Clone, Default)]
pub struct MemoryLookup {
    notes: HashMap<String, String>,
    assets: HashMap<String, String>,
    note_names: HashMap<String, Vec<String>>,
    asset_names: HashMap<String, Vec<String>>,
    phantoms: HashSet<String>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the store's registered notes, phantoms and assets,
    /// plus the on-disk asset universe so that fresh asset links
    /// resolve the same way a full build would resolve them.
    pub fn from_store(conn: &Connection, vault: &Vault) -> Result<Self> {
        let mut lk = Self::new();
        for n in sqlite::nodes_by_type(conn, NodeType::Note)? {
            if let Some(p) = n.path {
                lk.add_note(&p);
            }
        }
        for a in sqlite::nodes_by_type(conn, NodeType::Asset)? {
            if let Some(p) = a.path {
                lk.add_asset(&p);
            }
        }
        for ph in sqlite::nodes_by_type(conn, NodeType::Phantom)? {
            lk.add_phantom(&ph.name);
        }
        let (_, disk_assets) = vault.collect_files()?;
        for p in disk_assets {
            lk.add_asset(&p);
        }
        Ok(lk)
    }

    pub fn add_note(&mut self, path: &str) {
        self.notes.insert(path.to_lowercase(), path.to_string());
        let v = self
            .note_names
            .entry(paths::basename_key(path))
            .or_default();
        if !v.contains(&path.to_string()) {
            v.push(path.to_string());
            v.sort();
        }
    }

    pub fn remove_note(&mut self, path: &str) {
        if self.notes.remove(&path.to_lowercase()).is_none() {
            return;
        }
        let key = paths::basename_key(path);
        if let Some(v) = self.note_names.get_mut(&key) {
            v.retain(|p| p != path);
            if v.is_empty() {
                self.note_names.remove(&key);
            }
        }
    }

    pub fn add_asset(&mut self, path: &str) {
        self.assets.insert(path.to_lowercase(), path.to_string());
        let v = self
            .asset_names
            .entry(paths::asset_basename_key(path))
            .or_default();
        if !v.contains(&path.to_string()) {
            v.push(path.to_string());
            v.sort();
        }
    }

    pub fn remove_asset(&mut self, path: &str) {
        if self.assets.remove(&path.to_lowercase()).is_none() {
            return;
        }
        let key = paths::asset_basename_key(path);
        if let Some(v) = self.asset_names.get_mut(&key) {
            v.retain(|p| p != path);
            if v.is_empty() {
                self.asset_names.remove(&key);
            }
        }
    }

    pub fn add_phantom(&mut self, name: &str) {
        self.phantoms.insert(paths::basename_key(name));
    }

    pub fn has_note_path(&self, path: &str) -> bool {
        self.notes.contains_key(&path.to_lowercase())
    }

    pub fn note_candidates(&self, basename_key: &str) -> &[String] {
        self.note_names
            .get(basename_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl NodeLookup for MemoryLookup {
    fn note_by_path(&self, path_lower: &str) -> Result<Option<String>> {
        Ok(self.notes.get(path_lower).cloned())
    }

    fn asset_by_path(&self, path_lower: &str) -> Result<Option<String>> {
        Ok(self.assets.get(path_lower).cloned())
    }

    fn notes_by_basename(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.note_names.get(key).cloned().unwrap_or_default())
    }

    fn assets_by_basename(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.asset_names.get(key).cloned().unwrap_or_default())
    }

    fn phantom_exists(&self, key: &str) -> Result<bool> {
        Ok(self.phantoms.contains(key))
    }
}

/// SQL-backed lookup used by the query-side resolver.
pub struct StoreLookup<'a> {
    conn: &'a Connection,
}

impl<'a> StoreLookup<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl NodeLookup for StoreLookup<'_> {
    fn note_by_path(&self, path_lower: &str) -> Result<Option<String>> {
        Ok(sqlite::node_by_path_key(self.conn, path_lower)?
            .filter(|n| n.node_type == NodeType::Note)
            .and_then(|n| n.path))
    }

    fn asset_by_path(&self, path_lower: &str) -> Result<Option<String>> {
        Ok(sqlite::node_by_path_key(self.conn, path_lower)?
            .filter(|n| n.node_type == NodeType::Asset)
            .and_then(|n| n.path))
    }

    fn notes_by_basename(&self, key: &str) -> Result<Vec<String>> {
        Ok(sqlite::nodes_by_name_key(self.conn, NodeType::Note, key)?
            .into_iter()
            .filter_map(|n| n.path)
            .collect())
    }

    fn assets_by_basename(&self, key: &str) -> Result<Vec<String>> {
        Ok(sqlite::nodes_by_name_key(self.conn, NodeType::Asset, key)?
            .into_iter()
            .filter_map(|n| n.path)
            .collect())
    }

    fn phantom_exists(&self, key: &str) -> Result<bool> {
        Ok(sqlite::node_by_key(self.conn, &format!("phantom:name:{key}"))?.is_some())
    }
}

/// Map a resolved target to its node id, creating phantom and tag
/// nodes on demand. Notes and assets must already be registered.
pub(crate) fn materialize_target(conn: &Connection, target: &ResolvedTarget) -> Result<i64> {
    match target {
        ResolvedTarget::Note { path } => {
            match sqlite::node_by_path_key(conn, &path.to_lowercase())? {
                Some(node) => Ok(node.id),
                None => Err(crate::Error::Unregistered(path.clone())),
            }
        }
        ResolvedTarget::Asset { path } => sqlite::upsert_asset(conn, path),
        ResolvedTarget::Phantom { name } => sqlite::upsert_phantom(conn, name),
        ResolvedTarget::Tag { name } => sqlite::upsert_tag(conn, name),
    }
}
