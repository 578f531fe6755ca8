mod config;
mod error;
mod index;
mod link_resolve;
mod links;
mod moves;
mod mutate;
mod parse;
mod paths;
mod query;
mod rewrite;
mod sqlite;
mod tools;
mod vault;

pub use crate::config::{BuildConfig, Config, ExcludeConfig, FrontmatterConfig};
pub use crate::error::{Error, LinkError, LinkErrorKind, Result};
pub use crate::index::{BuildSummary, build};
pub use crate::link_resolve::{
    MemoryLookup, NodeLookup, Resolution, ResolvedTarget, StoreLookup, resolve_basename,
    resolve_occurrence, resolve_path,
};
pub use crate::links::{LinkOccurrence, LinkType, RewriteRecord};
pub use crate::moves::{MoveDirResult, MoveResult, MovedPair, move_dir, move_entry, move_file};
pub use crate::mutate::{AddResult, DeleteResult, UpdateResult, add, delete, update};
pub use crate::query::{
    BasenameConflict, Diagnosis, NodePayload, QueryEntry, QueryOptions, QueryResult,
    ResolveOutcome, Snippet, Stats, TwohopEntry, diagnose, query, resolve, stats,
};
pub use crate::rewrite::{build_rewrite_path, replace_outside_code};
pub use crate::sqlite::{Edge, GraphStore, Node, NodeType};
pub use crate::tools::{
    LinkForm, ScanReport, SkipRecord, convert, disambiguate, repair, simplify,
};
pub use crate::vault::{NoteFile, Vault};
