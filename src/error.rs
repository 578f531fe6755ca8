use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// A user error found while resolving links in a single file.
///
/// Build collects these up to a cap and reports them together; the
/// incremental entrypoints surface the first one as a fatal [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    pub file: String,
    pub raw_link: String,
    pub kind: LinkErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkErrorKind {
    Ambiguous { candidates: Vec<String> },
    EscapesVault,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LinkErrorKind::Ambiguous { candidates } => write!(
                f,
                "{}: link {} is ambiguous (candidates: {})",
                self.file,
                self.raw_link,
                candidates.join(", ")
            ),
            LinkErrorKind::EscapesVault => {
                write!(f, "{}: link {} escapes vault", self.file, self.raw_link)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault root does not exist: {0}")]
    VaultNotFound(PathBuf),

    #[error("index not found at {0}; run `mdhop build` first")]
    IndexMissing(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Link(LinkError),

    #[error("build failed with {} error(s):\n{}", errors.len(), format_link_errors(errors))]
    Build { errors: Vec<LinkError> },

    #[error("file is stale (on-disk mtime differs from index): {0}")]
    Stale(String),

    #[error("file is not registered in the index: {0}")]
    Unregistered(String),

    #[error("file(s) already registered: {}", .0.join(", "))]
    AlreadyRegistered(Vec<String>),

    #[error("file not found on disk: {0}")]
    NotFound(String),

    #[error("destination already exists: {0}")]
    DestinationExists(String),

    #[error("glob pattern contains unsupported `[`: {0}")]
    BadGlob(String),

    #[error("link {raw_link} is not present in {file}")]
    LinkNotInSource { file: String, raw_link: String },

    #[error("ambiguous name {name}: candidates {}; pass --target", candidates.join(", "))]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config yaml parse error: {0}")]
    ConfigYaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn ambiguous(file: &str, raw_link: &str, candidates: Vec<String>) -> Self {
        Self::Link(LinkError {
            file: file.to_string(),
            raw_link: raw_link.to_string(),
            kind: LinkErrorKind::Ambiguous { candidates },
        })
    }

    pub(crate) fn escapes(file: &str, raw_link: &str) -> Self {
        Self::Link(LinkError {
            file: file.to_string(),
            raw_link: raw_link.to_string(),
            kind: LinkErrorKind::EscapesVault,
        })
    }
}

fn format_link_errors(errors: &[LinkError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
