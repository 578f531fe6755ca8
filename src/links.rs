use serde::Serialize;

/// How a link occurrence was written in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkType {
    Wikilink,
    Markdown,
    Tag,
    Frontmatter,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wikilink => "wikilink",
            Self::Markdown => "markdown",
            Self::Tag => "tag",
            Self::Frontmatter => "frontmatter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wikilink" => Some(Self::Wikilink),
            "markdown" => Some(Self::Markdown),
            "tag" => Some(Self::Tag),
            "frontmatter" => Some(Self::Frontmatter),
            _ => None,
        }
    }
}

/// One parsed link occurrence.
///
/// `raw_link` is the exact source span (`[[N|alias]]`, `![x](a.png)`,
/// `#tag/sub`) and is what the rewriter substitutes on. `target` is the
/// normalized link target with alias, subpath and embed syntax removed;
/// for tags it is the tag text without the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub link_type: LinkType,
    pub target: String,
    /// Subpath without the leading `#`; block refs keep their `^`.
    pub subpath: String,
    pub is_relative: bool,
    pub is_basename: bool,
    pub raw_link: String,
    pub line_start: u32,
    pub line_end: u32,
    pub embed: bool,
    pub alias: Option<String>,
    /// True for tag occurrences sourced from the frontmatter `tags` key
    /// (as opposed to frontmatter link keys).
    pub fm_tag: bool,
}

impl LinkOccurrence {
    pub fn is_tag(&self) -> bool {
        self.link_type == LinkType::Tag || self.fm_tag
    }
}

/// One applied (or planned) link rewrite, reported by every mutating
/// entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteRecord {
    pub file: String,
    pub old_link: String,
    pub new_link: String,
}
