//! Pure path helpers over vault-relative, forward-slash strings.
//!
//! No I/O happens here. Every function takes and returns plain strings;
//! the empty string is the vault root directory.

/// Normalize a path: forward slashes, `.` segments and redundant
/// separators collapsed, a leading `./` stripped. `..` pops a preceding
/// segment where possible and is otherwise kept at the front, so escape
/// detection can look for a leading `..`.
pub fn normalize(p: &str) -> String {
    let p = p.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(&s) if s != "..") {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    out.join("/")
}

/// Resolve `target` relative to the directory of `source`. Returns
/// `None` when the result steps outside the vault root.
pub fn join_relative(source_dir: &str, target: &str) -> Option<String> {
    let joined = if source_dir.is_empty() {
        normalize(target)
    } else {
        normalize(&format!("{source_dir}/{target}"))
    };
    if joined == ".." || joined.starts_with("../") {
        return None;
    }
    Some(joined)
}

/// A vault-absolute link (`/`-prefixed) escapes when any `..` segment
/// survives normalization.
pub fn absolute_escapes(target: &str) -> bool {
    let n = normalize(target);
    n == ".." || n.starts_with("../")
}

/// Directory part of a vault-relative path; the empty string for root
/// files.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(ix) => &path[..ix],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(ix) => &path[ix + 1..],
        None => path,
    }
}

/// Basename with only a `.md` suffix stripped; `Note.v1` keeps `.v1`.
pub fn note_basename(name_or_path: &str) -> &str {
    let name = file_name(name_or_path);
    name.strip_suffix(".md").unwrap_or(name)
}

/// Case-folded lookup key for notes: `lower(basename_without_md)`.
pub fn basename_key(name_or_path: &str) -> String {
    note_basename(name_or_path).to_lowercase()
}

/// Case-folded lookup key for assets: the full filename, lowercased.
pub fn asset_basename_key(name_or_path: &str) -> String {
    file_name(name_or_path).to_lowercase()
}

pub fn is_root_file(path: &str) -> bool {
    !path.contains('/')
}

pub fn is_md(path: &str) -> bool {
    path.to_lowercase().ends_with(".md")
}

/// A basename link has no `/` in its target and no relative prefix.
/// The caller passes the target already stripped of alias, subpath and
/// embed syntax.
pub fn is_basename_link(target: &str) -> bool {
    !target.contains('/') && !target.starts_with("./") && !target.starts_with("../")
}

/// Relative raw-link target from `from_dir` to `to_path`, with the
/// `../.`-style artifacts of path diffing cleaned away.
pub fn relative_link(from_dir: &str, to_path: &str) -> String {
    let diff = pathdiff::diff_paths(
        std::path::Path::new(to_path),
        std::path::Path::new(from_dir),
    )
    .unwrap_or_else(|| std::path::PathBuf::from(to_path));
    normalize(&diff.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots_and_separators() {
        assert_eq!(normalize("./a//b/./c"), "a/b/c");
        assert_eq!(normalize("a/../b"), "b");
        assert_eq!(normalize("."), "");
        assert_eq!(normalize("a/.."), "");
        assert_eq!(normalize("../a"), "../a");
    }

    #[test]
    fn join_relative_detects_escape() {
        assert_eq!(join_relative("sub", "../A"), Some("A".into()));
        assert_eq!(join_relative("", "../A"), None);
        assert_eq!(join_relative("sub", "../../A"), None);
        assert_eq!(join_relative("a/b", "./c"), Some("a/b/c".into()));
    }

    #[test]
    fn basename_key_strips_only_md() {
        assert_eq!(basename_key("sub/Note.md"), "note");
        assert_eq!(basename_key("Note.v1"), "note.v1");
        assert_eq!(basename_key("Note.v1.md"), "note.v1");
        assert_eq!(asset_basename_key("sub/Photo.PNG"), "photo.png");
    }

    #[test]
    fn basename_link_detection() {
        assert!(is_basename_link("Note"));
        assert!(is_basename_link("Note.png"));
        assert!(!is_basename_link("sub/Note"));
        assert!(!is_basename_link("./Note"));
        assert!(!is_basename_link("../Note"));
    }

    #[test]
    fn relative_link_between_directories() {
        assert_eq!(relative_link("a/b", "a/c/N.md"), "../c/N.md");
        assert_eq!(relative_link("", "sub/N.md"), "sub/N.md");
        assert_eq!(relative_link("sub", "N.md"), "../N.md");
        assert_eq!(relative_link("sub", "sub/N.md"), "N.md");
    }
}
