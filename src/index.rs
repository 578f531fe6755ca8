//! Full-vault build: two-pass indexing with strict validation.

use serde::Serialize;
use tracing::info;

use crate::error::{LinkError, LinkErrorKind};
use crate::link_resolve::{MemoryLookup, Resolution, materialize_target, resolve_occurrence};
use crate::links::LinkOccurrence;
use crate::sqlite::{self, GraphStore, NodeType};
use crate::vault::{NoteFile, Vault};
use crate::{Error, Result};

/// User errors are collected up to this cap so a bulk report can be
/// fixed in one pass; past it, parsing stops.
pub(crate) const MAX_BUILD_ERRORS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub notes: usize,
    pub assets: usize,
    pub edges: usize,
}

pub fn build(vault: &Vault) -> Result<BuildSummary> {
    let (notes, assets) = vault.collect_files()?;

    let mut parsed: Vec<(NoteFile, Vec<LinkOccurrence>)> = Vec::with_capacity(notes.len());
    for note in notes {
        let content = vault.read_note(&note.path)?;
        let occs = crate::parse::parse_note(&content, &vault.config().frontmatter);
        parsed.push((note, occs));
    }

    let mut lookup = MemoryLookup::new();
    for (note, _) in &parsed {
        lookup.add_note(&note.path);
    }
    for asset in &assets {
        lookup.add_asset(asset);
    }

    let errors = validate_all(&lookup, &parsed)?;
    if !errors.is_empty() {
        return Err(Error::Build { errors });
    }

    let mut store = GraphStore::create(vault)?;
    let tx = store.conn.transaction()?;

    sqlite::delete_all_edges(&tx)?;

    let mut fresh_keys = std::collections::HashSet::new();
    for (note, _) in &parsed {
        sqlite::upsert_note(&tx, &note.path, true, note.mtime)?;
        fresh_keys.insert(sqlite::path_key(&note.path));
    }
    for asset in &assets {
        sqlite::upsert_asset(&tx, asset)?;
        fresh_keys.insert(sqlite::path_key(asset));
    }

    let mut edge_count = 0usize;
    for (note, occs) in &parsed {
        let (source_id, _) = sqlite::upsert_note(&tx, &note.path, true, note.mtime)?;
        for occ in occs {
            let Resolution::Target(target) = resolve_occurrence(&lookup, &note.path, occ)? else {
                // Validated above; a failure here means the world
                // changed mid-build.
                continue;
            };
            let target_id = materialize_target(&tx, &target)?;
            sqlite::insert_edge(
                &tx,
                source_id,
                target_id,
                occ.link_type,
                &occ.raw_link,
                &occ.subpath,
                occ.line_start,
                occ.line_end,
            )?;
            edge_count += 1;
        }
    }

    // Drop nodes from a previous index whose files are gone.
    for node_type in [NodeType::Note, NodeType::Asset] {
        for node in sqlite::nodes_by_type(&tx, node_type)? {
            let Some(path) = &node.path else { continue };
            if !fresh_keys.contains(&sqlite::path_key(path)) {
                sqlite::remove_node(&tx, node.id)?;
            }
        }
    }

    sqlite::cleanup_orphans(&tx)?;
    tx.commit()?;

    let summary = BuildSummary {
        notes: parsed.len(),
        assets: assets.len(),
        edges: edge_count,
    };
    info!(
        notes = summary.notes,
        assets = summary.assets,
        edges = summary.edges,
        "build complete"
    );
    Ok(summary)
}

fn validate_all(
    lookup: &MemoryLookup,
    parsed: &[(NoteFile, Vec<LinkOccurrence>)],
) -> Result<Vec<LinkError>> {
    let mut errors = Vec::new();
    'outer: for (note, occs) in parsed {
        for occ in occs {
            match resolve_occurrence(lookup, &note.path, occ)? {
                Resolution::Target(_) => {}
                Resolution::Ambiguous { candidates } => errors.push(LinkError {
                    file: note.path.clone(),
                    raw_link: occ.raw_link.clone(),
                    kind: LinkErrorKind::Ambiguous { candidates },
                }),
                Resolution::Escape => errors.push(LinkError {
                    file: note.path.clone(),
                    raw_link: occ.raw_link.clone(),
                    kind: LinkErrorKind::EscapesVault,
                }),
            }
            if errors.len() >= MAX_BUILD_ERRORS {
                break 'outer;
            }
        }
    }
    Ok(errors)
}
