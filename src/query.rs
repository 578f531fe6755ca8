//! Read-side entrypoints: `resolve`, `query`, `stats`, `diagnose`.

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;

use crate::link_resolve::{Resolution, ResolvedTarget, StoreLookup, resolve_occurrence};
use crate::links::{LinkOccurrence, LinkType};
use crate::parse;
use crate::sqlite::{self, GraphStore, Node, NodeType};
use crate::vault::Vault;
use crate::{Error, Result, paths};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodePayload {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

impl NodePayload {
    fn from_node(n: &Node) -> Self {
        let has_path = matches!(n.node_type, NodeType::Note | NodeType::Asset);
        Self {
            node_type: n.node_type.as_str().to_string(),
            name: n.name.clone(),
            path: n.path.clone(),
            exists: has_path.then_some(n.exists_flag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveOutcome {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEntry {
    File(String),
    Tag(String),
    Phantom(String),
    /// Auto-detected: `#...` is a tag, otherwise a note basename
    /// (root-priority applied), otherwise a phantom.
    Name(String),
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub backlinks: bool,
    pub outgoing: bool,
    pub tags: bool,
    pub twohop: bool,
    pub head: Option<usize>,
    pub snippet: Option<usize>,
    pub max_backlinks: Option<usize>,
    pub max_twohop: Option<usize>,
    pub max_via_per_target: Option<usize>,
    pub allow_stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwohopEntry {
    pub via: NodePayload,
    pub targets: Vec<NodePayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub raw_link: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub entry: NodePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backlinks: Option<Vec<NodePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing: Option<Vec<NodePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<NodePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twohop: Option<Vec<TwohopEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippets: Option<Vec<Snippet>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub notes_total: i64,
    pub notes_existing: i64,
    pub assets: i64,
    pub edges: i64,
    pub tags: i64,
    pub phantoms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasenameConflict {
    pub name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnosis {
    pub basename_conflicts: Vec<BasenameConflict>,
    pub asset_basename_conflicts: Vec<BasenameConflict>,
    pub phantoms: Vec<String>,
}

/// Parse a raw link against a source note, resolve it, and verify the
/// edge really exists in the index.
pub fn resolve(vault: &Vault, from: &str, raw_link: &str) -> Result<ResolveOutcome> {
    let store = GraphStore::open(vault)?;
    let from_rel = vault.rel_from_input(from)?;
    let source = sqlite::node_by_path_key(&store.conn, &from_rel.to_lowercase())?
        .filter(|n| n.node_type == NodeType::Note)
        .ok_or_else(|| Error::Unregistered(from_rel.clone()))?;
    let source_path = source.path.clone().unwrap_or(from_rel.clone());

    // Multi-occurrence raws (nested tags) disambiguate by exact match.
    let occ = match parse::parse_snippet(raw_link)
        .into_iter()
        .find(|o| o.raw_link == raw_link)
    {
        Some(occ) => occ,
        None => {
            // Frontmatter raws carry no link syntax; the stored edge
            // decides whether the string was a tag or a link.
            if let Some(edge) = sqlite::outgoing_edges(&store.conn, source.id)?
                .into_iter()
                .find(|e| e.raw_link == raw_link)
            {
                let node = sqlite::node_by_id(&store.conn, edge.target_id)?
                    .ok_or_else(|| Error::LinkNotInSource {
                        file: source_path.clone(),
                        raw_link: raw_link.to_string(),
                    })?;
                let has_path = matches!(node.node_type, NodeType::Note | NodeType::Asset);
                return Ok(ResolveOutcome {
                    node_type: node.node_type.as_str().to_string(),
                    name: node.name,
                    path: node.path,
                    exists: has_path.then_some(node.exists_flag),
                    subpath: edge.subpath,
                });
            }
            frontmatter_occurrence(raw_link)
        }
    };

    let lookup = StoreLookup::new(&store.conn);
    let target = match resolve_occurrence(&lookup, &source_path, &occ)? {
        Resolution::Target(t) => t,
        Resolution::Ambiguous { candidates } => {
            return Err(Error::ambiguous(&source_path, raw_link, candidates));
        }
        Resolution::Escape => return Err(Error::escapes(&source_path, raw_link)),
    };

    let miss = || Error::LinkNotInSource {
        file: source_path.clone(),
        raw_link: raw_link.to_string(),
    };
    let node = find_target_node(&store.conn, &target)?.ok_or_else(&miss)?;

    let subpath_matches = |edge_sub: &Option<String>| match (edge_sub, occ.subpath.is_empty()) {
        (None, true) => true,
        (Some(s), false) => s == &occ.subpath,
        _ => false,
    };
    let present = sqlite::outgoing_edges(&store.conn, source.id)?
        .iter()
        .any(|e| e.target_id == node.id && subpath_matches(&e.subpath));
    if !present {
        return Err(miss());
    }

    let has_path = matches!(node.node_type, NodeType::Note | NodeType::Asset);
    Ok(ResolveOutcome {
        node_type: node.node_type.as_str().to_string(),
        name: node.name,
        path: node.path,
        exists: has_path.then_some(node.exists_flag),
        subpath: (!occ.subpath.is_empty()).then(|| occ.subpath.clone()),
    })
}

fn frontmatter_occurrence(raw: &str) -> LinkOccurrence {
    let parsed = parse::parse_raw_target(raw);
    LinkOccurrence {
        link_type: LinkType::Frontmatter,
        target: parsed.target,
        subpath: parsed.subpath,
        is_relative: raw.starts_with("./") || raw.starts_with("../"),
        is_basename: paths::is_basename_link(raw.split('#').next().unwrap_or(raw)),
        raw_link: raw.to_string(),
        line_start: 0,
        line_end: 0,
        embed: false,
        alias: None,
        fm_tag: false,
    }
}

fn find_target_node(conn: &Connection, target: &ResolvedTarget) -> Result<Option<Node>> {
    match target {
        ResolvedTarget::Note { path } | ResolvedTarget::Asset { path } => {
            sqlite::node_by_path_key(conn, &path.to_lowercase())
        }
        ResolvedTarget::Phantom { name } => {
            sqlite::node_by_key(conn, &sqlite::phantom_key(name))
        }
        ResolvedTarget::Tag { name } => sqlite::node_by_key(conn, &sqlite::tag_key(name)),
    }
}

pub fn query(vault: &Vault, entry: &QueryEntry, opts: &QueryOptions) -> Result<QueryResult> {
    let store = GraphStore::open(vault)?;
    let node = resolve_entry(&store.conn, vault, entry)?;

    let mut result = QueryResult {
        entry: NodePayload::from_node(&node),
        backlinks: None,
        outgoing: None,
        tags: None,
        twohop: None,
        head: None,
        snippets: None,
    };

    if opts.backlinks {
        result.backlinks = Some(neighbor_nodes(
            &store.conn,
            vault,
            NeighborQuery::Backlinks,
            node.id,
            opts.max_backlinks,
        )?);
    }
    if opts.outgoing {
        result.outgoing = Some(neighbor_nodes(
            &store.conn,
            vault,
            NeighborQuery::Outgoing,
            node.id,
            None,
        )?);
    }
    if opts.tags {
        result.tags = Some(neighbor_nodes(
            &store.conn,
            vault,
            NeighborQuery::Tags,
            node.id,
            None,
        )?);
    }
    if opts.twohop {
        result.twohop = Some(twohop(&store.conn, vault, &node, opts)?);
    }
    if let Some(n) = opts.head {
        result.head = Some(head_lines(vault, &node, n, opts.allow_stale)?);
    }
    if let Some(n) = opts.snippet {
        result.snippets = Some(snippets(&store.conn, vault, &node, n, opts.allow_stale)?);
    }

    Ok(result)
}

fn resolve_entry(conn: &Connection, vault: &Vault, entry: &QueryEntry) -> Result<Node> {
    match entry {
        QueryEntry::File(f) => {
            let rel = vault.rel_from_input(f)?;
            sqlite::node_by_path_key(conn, &rel.to_lowercase())?
                .ok_or(Error::Unregistered(rel))
        }
        QueryEntry::Tag(t) => sqlite::node_by_key(conn, &sqlite::tag_key(t))?
            .ok_or_else(|| Error::NotFound(t.clone())),
        QueryEntry::Phantom(p) => sqlite::node_by_key(conn, &sqlite::phantom_key(p))?
            .ok_or_else(|| Error::NotFound(p.clone())),
        QueryEntry::Name(n) => {
            if n.starts_with('#') {
                return resolve_entry(conn, vault, &QueryEntry::Tag(n.clone()));
            }
            let cands = sqlite::nodes_by_name_key(conn, NodeType::Note, &paths::basename_key(n))?;
            let node = match cands.len() {
                0 => None,
                1 => cands.into_iter().next(),
                _ => {
                    let mut roots = cands
                        .into_iter()
                        .filter(|c| c.path.as_deref().is_some_and(paths::is_root_file));
                    match (roots.next(), roots.next()) {
                        (Some(root), None) => Some(root),
                        _ => {
                            return Err(Error::AmbiguousName {
                                name: n.clone(),
                                candidates: sqlite::nodes_by_name_key(
                                    conn,
                                    NodeType::Note,
                                    &paths::basename_key(n),
                                )?
                                .into_iter()
                                .filter_map(|c| c.path)
                                .collect(),
                            });
                        }
                    }
                }
            };
            if let Some(node) = node {
                return Ok(node);
            }
            sqlite::node_by_key(conn, &sqlite::phantom_key(n))?
                .ok_or_else(|| Error::NotFound(n.clone()))
        }
    }
}

enum NeighborQuery {
    Backlinks,
    Outgoing,
    Tags,
}

/// Exclude filters as SQL. NULL paths (phantoms, tags) always pass the
/// glob filter; tag exclusion is case-insensitive on the tag name.
fn exclude_sql(vault: &Vault, params: &mut Vec<SqlValue>) -> String {
    let mut sql = String::new();
    for pat in &vault.config().exclude.paths {
        sql.push_str(" AND (n.path IS NULL OR NOT (n.path GLOB ?))");
        params.push(SqlValue::Text(pat.clone()));
    }
    for tag in &vault.config().exclude.tags {
        sql.push_str(" AND NOT (n.type='tag' AND n.name_key=?)");
        params.push(SqlValue::Text(
            tag.trim_start_matches('#').to_lowercase(),
        ));
    }
    sql
}

fn neighbor_nodes(
    conn: &Connection,
    vault: &Vault,
    which: NeighborQuery,
    entry_id: i64,
    limit: Option<usize>,
) -> Result<Vec<NodePayload>> {
    let mut params: Vec<SqlValue> = vec![SqlValue::Integer(entry_id)];
    let body = match which {
        NeighborQuery::Backlinks => {
            "FROM edges e JOIN nodes n ON n.id = e.source_id WHERE e.target_id = ?"
        }
        NeighborQuery::Outgoing => {
            "FROM edges e JOIN nodes n ON n.id = e.target_id
             WHERE e.source_id = ? AND e.target_id != e.source_id"
        }
        NeighborQuery::Tags => {
            "FROM edges e JOIN nodes n ON n.id = e.target_id
             WHERE e.source_id = ? AND n.type = 'tag'"
        }
    };
    let mut sql = format!(
        "SELECT DISTINCT n.id, n.type, n.name, n.path, n.exists_flag, n.mtime {body}"
    );
    sql.push_str(&exclude_sql(vault, &mut params));
    sql.push_str(" ORDER BY COALESCE(n.path, n.name), n.id");
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }
    fetch_payloads(conn, &sql, &params)
}

fn fetch_payloads(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<NodePayload>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        let type_str: String = row.get(1)?;
        Ok(Node {
            id: row.get(0)?,
            node_type: NodeType::from_str(&type_str).unwrap_or(NodeType::Url),
            name: row.get(2)?,
            path: row.get(3)?,
            exists_flag: row.get::<_, i64>(4)? != 0,
            mtime: row.get(5)?,
        })
    })?;
    let nodes = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes.iter().map(NodePayload::from_node).collect())
}

/// Second-hop neighborhoods: for every target the entry links to, the
/// other notes that link there too, grouped under the shared target.
fn twohop(
    conn: &Connection,
    vault: &Vault,
    entry: &Node,
    opts: &QueryOptions,
) -> Result<Vec<TwohopEntry>> {
    let mut params: Vec<SqlValue> = vec![SqlValue::Integer(entry.id)];
    let mut sql = String::from(
        "SELECT DISTINCT n.id, n.type, n.name, n.path, n.exists_flag, n.mtime
         FROM edges e JOIN nodes n ON n.id = e.target_id
         WHERE e.source_id = ? AND e.target_id != e.source_id",
    );
    sql.push_str(&exclude_sql(vault, &mut params));
    sql.push_str(" ORDER BY COALESCE(n.path, n.name), n.id");
    if let Some(limit) = opts.max_twohop {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }
    let mut stmt = conn.prepare(&sql)?;
    let vias = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let type_str: String = row.get(1)?;
            Ok(Node {
                id: row.get(0)?,
                node_type: NodeType::from_str(&type_str).unwrap_or(NodeType::Url),
                name: row.get(2)?,
                path: row.get(3)?,
                exists_flag: row.get::<_, i64>(4)? != 0,
                mtime: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for via in vias {
        let mut params: Vec<SqlValue> =
            vec![SqlValue::Integer(via.id), SqlValue::Integer(entry.id)];
        let mut sql = String::from(
            "SELECT DISTINCT n.id, n.type, n.name, n.path, n.exists_flag, n.mtime
             FROM edges e JOIN nodes n ON n.id = e.source_id
             WHERE e.target_id = ? AND e.source_id != ?",
        );
        sql.push_str(&exclude_sql(vault, &mut params));
        sql.push_str(" ORDER BY COALESCE(n.path, n.name), n.id");
        if let Some(limit) = opts.max_via_per_target {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }
        let targets = fetch_payloads(conn, &sql, &params)?;
        if !targets.is_empty() {
            out.push(TwohopEntry {
                via: NodePayload::from_node(&via),
                targets,
            });
        }
    }
    Ok(out)
}

fn check_mtime(vault: &Vault, node: &Node, allow_stale: bool) -> Result<String> {
    let path = node
        .path
        .clone()
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file", node.name)))?;
    if !allow_stale && vault.disk_mtime(&path)? != node.mtime.unwrap_or(0) {
        return Err(Error::Stale(path));
    }
    Ok(path)
}

/// First `n` body lines, frontmatter and leading blanks skipped.
fn head_lines(vault: &Vault, node: &Node, n: usize, allow_stale: bool) -> Result<Vec<String>> {
    let path = check_mtime(vault, node, allow_stale)?;
    let content = vault.read_note(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    let mut start = 0usize;
    if lines.first().map(|l| l.trim_end()) == Some("---") {
        if let Some(close) = lines
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, l)| l.trim_end() == "---")
            .map(|(ix, _)| ix)
        {
            start = close + 1;
        }
    }
    while start < lines.len() && lines[start].trim().is_empty() {
        start += 1;
    }
    Ok(lines[start..lines.len().min(start + n)]
        .iter()
        .map(|s| s.to_string())
        .collect())
}

/// Context lines around each incoming occurrence, clamped to the
/// source file. One mtime check per distinct source.
fn snippets(
    conn: &Connection,
    vault: &Vault,
    entry: &Node,
    context: usize,
    allow_stale: bool,
) -> Result<Vec<Snippet>> {
    let mut edges = sqlite::incoming_edges(conn, entry.id)?;
    let mut sources: std::collections::HashMap<i64, (String, Vec<String>)> =
        std::collections::HashMap::new();
    edges.sort_by_key(|e| (e.source_id, e.line_start, e.id));

    let mut out = Vec::new();
    for edge in edges {
        if !sources.contains_key(&edge.source_id) {
            let Some(source) = sqlite::node_by_id(conn, edge.source_id)? else {
                continue;
            };
            let path = check_mtime(vault, &source, allow_stale)?;
            let content = vault.read_note(&path)?;
            let lines = content.lines().map(|s| s.to_string()).collect();
            sources.insert(edge.source_id, (path, lines));
        }
        let Some((path, lines)) = sources.get(&edge.source_id) else {
            continue;
        };
        if lines.is_empty() {
            continue;
        }
        let start = (edge.line_start as usize).saturating_sub(context + 1);
        let end = lines.len().min(edge.line_end as usize + context);
        out.push(Snippet {
            file: path.clone(),
            line_start: start as u32 + 1,
            line_end: end as u32,
            raw_link: edge.raw_link.clone(),
            text: lines[start..end].join("\n"),
        });
    }
    out.sort_by(|a, b| (&a.file, a.line_start).cmp(&(&b.file, b.line_start)));
    Ok(out)
}

pub fn stats(vault: &Vault) -> Result<Stats> {
    let store = GraphStore::open(vault)?;
    let c = &store.conn;
    Ok(Stats {
        notes_total: sqlite::count(c, "SELECT COUNT(1) FROM nodes WHERE type='note'")?,
        notes_existing: sqlite::count(
            c,
            "SELECT COUNT(1) FROM nodes WHERE type='note' AND exists_flag=1",
        )?,
        assets: sqlite::count(c, "SELECT COUNT(1) FROM nodes WHERE type='asset'")?,
        edges: sqlite::count(c, "SELECT COUNT(1) FROM edges")?,
        tags: sqlite::count(c, "SELECT COUNT(1) FROM nodes WHERE type='tag'")?,
        phantoms: sqlite::count(c, "SELECT COUNT(1) FROM nodes WHERE type='phantom'")?,
    })
}

pub fn diagnose(vault: &Vault) -> Result<Diagnosis> {
    let store = GraphStore::open(vault)?;
    let mut out = Diagnosis::default();

    // Grouping happens here so each group keeps its per-path list.
    let group = |rows: Vec<Node>| -> Vec<BasenameConflict> {
        let mut by_key: std::collections::BTreeMap<String, Vec<String>> = Default::default();
        for n in rows {
            if let Some(p) = n.path {
                by_key.entry(n.name.to_lowercase()).or_default().push(p);
            }
        }
        by_key
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(name, mut paths)| {
                paths.sort();
                BasenameConflict { name, paths }
            })
            .collect()
    };

    let notes: Vec<Node> = sqlite::nodes_by_type(&store.conn, NodeType::Note)?
        .into_iter()
        .filter(|n| n.exists_flag)
        .collect();
    out.basename_conflicts = group(notes);
    out.asset_basename_conflicts = group(sqlite::nodes_by_type(&store.conn, NodeType::Asset)?);
    out.phantoms = sqlite::nodes_by_type(&store.conn, NodeType::Phantom)?
        .into_iter()
        .map(|n| n.name)
        .collect();
    out.phantoms.sort();
    Ok(out)
}
