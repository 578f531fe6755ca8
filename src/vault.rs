use std::path::{Path, PathBuf};

use crate::{Config, Error, Result, config, paths};

/// Handle to a vault root plus its configuration. All public
/// entrypoints are functions of `(vault, request)` and the on-disk
/// state; the vault itself holds no mutable state.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    cfg: Config,
}

/// A note collected from disk.
#[derive(Debug, Clone)]
pub struct NoteFile {
    pub path: String,
    pub mtime: i64,
}

impl Vault {
    /// Open a vault, loading `mdhop.yaml` if present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::VaultNotFound(root));
        }
        let cfg = Config::load(&root)?;
        Ok(Self { root, cfg })
    }

    pub fn with_config(root: impl Into<PathBuf>, cfg: Config) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::VaultNotFound(root));
        }
        Ok(Self { root, cfg })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(config::DATA_DIR).join(config::INDEX_FILE)
    }

    pub fn to_abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Normalize a user-supplied path into a vault-relative one.
    /// Absolute filesystem paths are taken relative to the root when
    /// they lie under it; anything escaping the vault is rejected.
    pub fn rel_from_input(&self, input: &str) -> Result<String> {
        let p = Path::new(input);
        let candidate = if p.is_absolute() {
            match p.strip_prefix(&self.root) {
                Ok(rest) => rest.to_string_lossy().to_string(),
                Err(_) => return Err(Error::InvalidPath(input.to_string())),
            }
        } else {
            input.to_string()
        };
        let norm = paths::normalize(&candidate);
        if norm == ".." || norm.starts_with("../") {
            return Err(Error::InvalidPath(input.to_string()));
        }
        Ok(norm)
    }

    /// Whether a vault-relative path participates in indexing: not
    /// hidden, not under the data directory, not build-excluded.
    pub fn is_indexable(&self, rel: &str) -> bool {
        if rel.is_empty() {
            return false;
        }
        if rel
            .split('/')
            .any(|seg| seg.starts_with('.') && !seg.is_empty())
        {
            return false;
        }
        !self.cfg.is_build_excluded(rel)
    }

    /// Walk the vault and split files into notes and assets.
    pub fn collect_files(&self) -> Result<(Vec<NoteFile>, Vec<String>)> {
        let mut notes = Vec::new();
        let mut assets = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !name.starts_with('.')
            })
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                match e.into_io_error() {
                    Some(io) => Error::io(path, io),
                    None => Error::InvalidPath(path.to_string_lossy().to_string()),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(r) => paths::normalize(&r.to_string_lossy()),
                Err(_) => continue,
            };
            if !self.is_indexable(&rel) {
                continue;
            }
            if paths::is_md(&rel) {
                let meta = entry.metadata().map_err(|e| {
                    Error::io(entry.path(), e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::other("metadata unavailable")
                    }))
                })?;
                notes.push(NoteFile {
                    path: rel,
                    mtime: mtime_of(&meta),
                });
            } else {
                assets.push(rel);
            }
        }
        notes.sort_by(|a, b| a.path.cmp(&b.path));
        assets.sort();
        Ok((notes, assets))
    }

    pub fn read_note(&self, rel: &str) -> Result<String> {
        let abs = self.to_abs(rel);
        std::fs::read_to_string(&abs).map_err(|e| Error::io(&abs, e))
    }

    pub fn disk_mtime(&self, rel: &str) -> Result<i64> {
        let abs = self.to_abs(rel);
        let meta = std::fs::metadata(&abs).map_err(|e| Error::io(&abs, e))?;
        Ok(mtime_of(&meta))
    }
}

pub fn mtime_of(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
