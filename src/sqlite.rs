//! Embedded graph store: two tables, `nodes` and `edges`, in
//! `.mdhop/index.sqlite`. Every mutating entrypoint wraps its writes in
//! one transaction; the primitives here take a plain [`Connection`] so
//! they work both inside and outside one.

use rusqlite::{Connection, OptionalExtension, params};

use crate::links::LinkType;
use crate::{Error, Result, Vault, paths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Note,
    Asset,
    Phantom,
    Tag,
    /// Reserved in the schema; nothing creates it.
    Url,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Asset => "asset",
            Self::Phantom => "phantom",
            Self::Tag => "tag",
            Self::Url => "url",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "note" => Some(Self::Note),
            "asset" => Some(Self::Asset),
            "phantom" => Some(Self::Phantom),
            "tag" => Some(Self::Tag),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: i64,
    pub node_type: NodeType,
    pub name: String,
    pub path: Option<String>,
    pub exists_flag: bool,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub link_type: LinkType,
    pub raw_link: String,
    pub subpath: Option<String>,
    pub line_start: u32,
    pub line_end: u32,
}

pub struct GraphStore {
    pub(crate) conn: Connection,
}

impl GraphStore {
    /// Open the store, creating the data directory and schema as
    /// needed. Used by `build`.
    pub fn create(vault: &Vault) -> Result<Self> {
        let db = vault.index_path();
        if let Some(parent) = db.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let conn = Connection::open(&db)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing store; every entrypoint except `build` and the
    /// scan tools requires one.
    pub fn open(vault: &Vault) -> Result<Self> {
        let db = vault.index_path();
        if !db.is_file() {
            return Err(Error::IndexMissing(db));
        }
        let conn = Connection::open(&db)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys=ON;

             CREATE TABLE IF NOT EXISTS nodes(
               id INTEGER PRIMARY KEY,
               node_key TEXT NOT NULL UNIQUE,
               type TEXT NOT NULL,
               name TEXT NOT NULL,
               name_key TEXT NOT NULL,
               path TEXT,
               exists_flag INTEGER NOT NULL DEFAULT 0,
               mtime INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_nodes_type_name ON nodes(type, name_key);
             CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);

             CREATE TABLE IF NOT EXISTS edges(
               id INTEGER PRIMARY KEY,
               source_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
               target_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
               link_type TEXT NOT NULL,
               raw_link TEXT NOT NULL,
               subpath TEXT,
               line_start INTEGER NOT NULL,
               line_end INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
             CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
             CREATE INDEX IF NOT EXISTS idx_edges_source_target ON edges(source_id, target_id);
            ",
        )?;
        Ok(())
    }
}

pub(crate) fn path_key(path: &str) -> String {
    format!("note:path:{}", path.to_lowercase())
}

pub(crate) fn phantom_key(name: &str) -> String {
    format!("phantom:name:{}", paths::basename_key(name))
}

pub(crate) fn tag_key(tag: &str) -> String {
    format!("tag:name:{}", tag.trim_start_matches('#').to_lowercase())
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let type_str: String = row.get(1)?;
    Ok(Node {
        id: row.get(0)?,
        node_type: NodeType::from_str(&type_str).unwrap_or(NodeType::Url),
        name: row.get(2)?,
        path: row.get(3)?,
        exists_flag: row.get::<_, i64>(4)? != 0,
        mtime: row.get(5)?,
    })
}

const NODE_COLS: &str = "id, type, name, path, exists_flag, mtime";

pub(crate) fn node_by_id(conn: &Connection, id: i64) -> Result<Option<Node>> {
    Ok(conn
        .query_row(
            &format!("SELECT {NODE_COLS} FROM nodes WHERE id=?1"),
            params![id],
            row_to_node,
        )
        .optional()?)
}

pub(crate) fn node_by_key(conn: &Connection, key: &str) -> Result<Option<Node>> {
    Ok(conn
        .query_row(
            &format!("SELECT {NODE_COLS} FROM nodes WHERE node_key=?1"),
            params![key],
            row_to_node,
        )
        .optional()?)
}

/// Note or asset by case-folded path.
pub(crate) fn node_by_path_key(conn: &Connection, path_lower: &str) -> Result<Option<Node>> {
    node_by_key(conn, &format!("note:path:{path_lower}"))
}

pub(crate) fn nodes_by_name_key(
    conn: &Connection,
    node_type: NodeType,
    name_key: &str,
) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLS} FROM nodes WHERE type=?1 AND name_key=?2 ORDER BY path, id"
    ))?;
    let rows = stmt.query_map(params![node_type.as_str(), name_key], row_to_node)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn nodes_by_type(conn: &Connection, node_type: NodeType) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLS} FROM nodes WHERE type=?1 ORDER BY path, name, id"
    ))?;
    let rows = stmt.query_map(params![node_type.as_str()], row_to_node)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert or refresh a note row. A phantom with the matching basename
/// key is promoted in place, keeping its id so incoming edges survive.
/// Returns `(id, promoted)`.
pub(crate) fn upsert_note(
    conn: &Connection,
    path: &str,
    exists: bool,
    mtime: i64,
) -> Result<(i64, bool)> {
    let key = path_key(path);
    let name = paths::note_basename(path).to_string();
    let name_key = name.to_lowercase();
    if let Some(node) = node_by_key(conn, &key)? {
        conn.execute(
            "UPDATE nodes SET name=?2, name_key=?3, path=?4, exists_flag=?5, mtime=?6 WHERE id=?1",
            params![node.id, name, name_key, path, exists as i64, mtime],
        )?;
        return Ok((node.id, false));
    }
    if let Some(ph) = node_by_key(conn, &phantom_key(&name))? {
        conn.execute(
            "UPDATE nodes SET node_key=?2, type='note', name=?3, name_key=?4, path=?5,
             exists_flag=?6, mtime=?7 WHERE id=?1",
            params![ph.id, key, name, name_key, path, exists as i64, mtime],
        )?;
        return Ok((ph.id, true));
    }
    conn.execute(
        "INSERT INTO nodes(node_key, type, name, name_key, path, exists_flag, mtime)
         VALUES(?1, 'note', ?2, ?3, ?4, ?5, ?6)",
        params![key, name, name_key, path, exists as i64, mtime],
    )?;
    Ok((conn.last_insert_rowid(), false))
}

pub(crate) fn upsert_asset(conn: &Connection, path: &str) -> Result<i64> {
    let key = path_key(path);
    if let Some(node) = node_by_key(conn, &key)? {
        conn.execute(
            "UPDATE nodes SET path=?2, exists_flag=1 WHERE id=?1",
            params![node.id, path],
        )?;
        return Ok(node.id);
    }
    let name = paths::file_name(path).to_string();
    conn.execute(
        "INSERT INTO nodes(node_key, type, name, name_key, path, exists_flag, mtime)
         VALUES(?1, 'asset', ?2, ?3, ?4, 1, NULL)",
        params![key, name, name.to_lowercase(), path],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn upsert_phantom(conn: &Connection, name: &str) -> Result<i64> {
    let key = phantom_key(name);
    if let Some(node) = node_by_key(conn, &key)? {
        return Ok(node.id);
    }
    let display = paths::note_basename(name).to_string();
    conn.execute(
        "INSERT INTO nodes(node_key, type, name, name_key, path, exists_flag, mtime)
         VALUES(?1, 'phantom', ?2, ?3, NULL, 0, NULL)",
        params![key, display, display.to_lowercase()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Tag display names keep the leading `#` and the writer's case; the
/// key is case-folded.
pub(crate) fn upsert_tag(conn: &Connection, tag: &str) -> Result<i64> {
    let key = tag_key(tag);
    if let Some(node) = node_by_key(conn, &key)? {
        return Ok(node.id);
    }
    let text = tag.trim_start_matches('#');
    conn.execute(
        "INSERT INTO nodes(node_key, type, name, name_key, path, exists_flag, mtime)
         VALUES(?1, 'tag', ?2, ?3, NULL, 0, NULL)",
        params![key, format!("#{text}"), text.to_lowercase()],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_edge(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    link_type: LinkType,
    raw_link: &str,
    subpath: &str,
    line_start: u32,
    line_end: u32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO edges(source_id, target_id, link_type, raw_link, subpath, line_start, line_end)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            source_id,
            target_id,
            link_type.as_str(),
            raw_link,
            if subpath.is_empty() { None } else { Some(subpath) },
            line_start,
            line_end
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_edges_by_source(conn: &Connection, source_id: i64) -> Result<()> {
    conn.execute("DELETE FROM edges WHERE source_id=?1", params![source_id])?;
    Ok(())
}

pub(crate) fn delete_all_edges(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM edges", [])?;
    Ok(())
}

pub(crate) fn remove_node(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM edges WHERE source_id=?1 OR target_id=?1", params![id])?;
    conn.execute("DELETE FROM nodes WHERE id=?1", params![id])?;
    Ok(())
}

/// A note that vanished from disk but is still referenced becomes a
/// phantom: outgoing edges go away, incoming edges stay. When a phantom
/// with the same key already exists, the two merge onto it.
pub(crate) fn demote_note_to_phantom(conn: &Connection, id: i64) -> Result<String> {
    let node = node_by_id(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    delete_edges_by_source(conn, id)?;
    let key = phantom_key(&node.name);
    if let Some(existing) = node_by_key(conn, &key)? {
        if existing.id != id {
            conn.execute(
                "UPDATE edges SET target_id=?2 WHERE target_id=?1",
                params![id, existing.id],
            )?;
            conn.execute("DELETE FROM nodes WHERE id=?1", params![id])?;
            return Ok(node.name);
        }
    }
    conn.execute(
        "UPDATE nodes SET node_key=?2, type='phantom', path=NULL, exists_flag=0, mtime=NULL
         WHERE id=?1",
        params![id, key],
    )?;
    Ok(node.name)
}

/// Retarget every edge aimed at `phantom_id` onto `note_id` and drop
/// the phantom. Used when an existing note takes over a phantom's key
/// (move onto a phantom name).
pub(crate) fn promote_phantom_edges(conn: &Connection, phantom_id: i64, note_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE edges SET target_id=?2 WHERE target_id=?1",
        params![phantom_id, note_id],
    )?;
    conn.execute("DELETE FROM nodes WHERE id=?1", params![phantom_id])?;
    Ok(())
}

/// Drop phantom, tag and asset nodes nothing points at. Notes survive
/// unreferenced.
pub(crate) fn cleanup_orphans(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM nodes
         WHERE type IN ('phantom', 'tag', 'asset')
           AND id NOT IN (SELECT DISTINCT target_id FROM edges)",
        [],
    )?;
    Ok(())
}

pub(crate) fn update_note_path(conn: &Connection, id: i64, new_path: &str, mtime: i64) -> Result<()> {
    let name = paths::note_basename(new_path).to_string();
    conn.execute(
        "UPDATE nodes SET node_key=?2, name=?3, name_key=?4, path=?5, exists_flag=1, mtime=?6
         WHERE id=?1",
        params![id, path_key(new_path), name, name.to_lowercase(), new_path, mtime],
    )?;
    Ok(())
}

pub(crate) fn update_asset_path(conn: &Connection, id: i64, new_path: &str) -> Result<()> {
    let name = paths::file_name(new_path).to_string();
    conn.execute(
        "UPDATE nodes SET node_key=?2, name=?3, name_key=?4, path=?5 WHERE id=?1",
        params![id, path_key(new_path), name, name.to_lowercase(), new_path],
    )?;
    Ok(())
}

pub(crate) fn update_note_mtime(conn: &Connection, id: i64, mtime: i64) -> Result<()> {
    conn.execute(
        "UPDATE nodes SET mtime=?2 WHERE id=?1 AND type='note'",
        params![id, mtime],
    )?;
    Ok(())
}

/// Rewrite stored raw link text for one source without reparsing the
/// file. Mirrors the on-disk substitution the rewriter performs.
pub(crate) fn update_edge_raw(
    conn: &Connection,
    source_id: i64,
    old_raw: &str,
    new_raw: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE edges SET raw_link=?3 WHERE source_id=?1 AND raw_link=?2",
        params![source_id, old_raw, new_raw],
    )?;
    Ok(())
}

/// Point one edge at a new target with new raw text; used by the
/// index-backed disambiguate, which keeps the store in sync.
pub(crate) fn retarget_edge(
    conn: &Connection,
    edge_id: i64,
    target_id: i64,
    raw_link: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE edges SET target_id=?2, raw_link=?3 WHERE id=?1",
        params![edge_id, target_id, raw_link],
    )?;
    Ok(())
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let lt: String = row.get(3)?;
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        link_type: LinkType::from_str(&lt).unwrap_or(LinkType::Wikilink),
        raw_link: row.get(4)?,
        subpath: row.get(5)?,
        line_start: row.get::<_, i64>(6)? as u32,
        line_end: row.get::<_, i64>(7)? as u32,
    })
}

const EDGE_COLS: &str = "id, source_id, target_id, link_type, raw_link, subpath, line_start, line_end";

pub(crate) fn incoming_edges(conn: &Connection, target_id: i64) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLS} FROM edges WHERE target_id=?1 ORDER BY source_id, id"
    ))?;
    let rows = stmt.query_map(params![target_id], row_to_edge)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn outgoing_edges(conn: &Connection, source_id: i64) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLS} FROM edges WHERE source_id=?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![source_id], row_to_edge)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn has_incoming(conn: &Connection, target_id: i64) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(1) FROM edges WHERE target_id=?1",
        params![target_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}
