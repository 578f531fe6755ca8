//! Textual link substitution.
//!
//! Rewrites replace one `raw_link` with another everywhere it occurs
//! outside fenced blocks and inline code, so the Markdown never has to
//! be re-rendered. Files are written atomically (temp + rename) with
//! their mode bits preserved, and every write returns an in-memory
//! backup so a failing transaction can restore the vault byte-for-byte.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::parse::{FenceState, ParsedRaw, RawForm, inline_code_spans};
use crate::{Error, Result, paths};

/// Original bytes and permissions of a rewritten file.
#[derive(Debug)]
pub struct FileBackup {
    pub path: PathBuf,
    bytes: Vec<u8>,
    permissions: fs::Permissions,
}

/// Replace every occurrence of `old` outside code with `new`. Returns
/// the new body and the substitution count.
pub fn replace_outside_code(body: &str, old: &str, new: &str) -> (String, usize) {
    if old.is_empty() {
        return (body.to_string(), 0);
    }
    let mut out = String::with_capacity(body.len());
    let mut count = 0usize;
    let mut fence = FenceState::default();
    for line in body.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\r', '\n']);
        if fence.feed(stripped) || fence.in_fence() {
            out.push_str(line);
            continue;
        }
        let spans = inline_code_spans(stripped);
        let mut cursor = 0usize;
        while let Some(off) = stripped[cursor..].find(old) {
            let at = cursor + off;
            if spans.iter().any(|&(s, e)| at < e && at + old.len() > s) {
                out.push_str(&line[cursor..at + old.len()]);
                cursor = at + old.len();
                continue;
            }
            out.push_str(&line[cursor..at]);
            out.push_str(new);
            count += 1;
            cursor = at + old.len();
        }
        out.push_str(&line[cursor..]);
    }
    (out, count)
}

/// Apply `(old, new)` pairs to one file, atomically. The returned
/// backup restores the original content and mode on rollback.
pub fn apply_file_rewrites(abs: &Path, pairs: &[(String, String)]) -> Result<FileBackup> {
    let original = fs::read_to_string(abs).map_err(|e| Error::io(abs, e))?;
    let permissions = fs::metadata(abs)
        .map_err(|e| Error::io(abs, e))?
        .permissions();

    let mut body = original.clone();
    for (old, new) in pairs {
        let (next, n) = replace_outside_code(&body, old, new);
        debug!(file = %abs.display(), old, new, count = n, "rewrite");
        body = next;
    }

    let tmp = abs.with_extension("mdhop-tmp");
    fs::write(&tmp, body.as_bytes()).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, abs).map_err(|e| Error::io(abs, e))?;
    fs::set_permissions(abs, permissions.clone()).map_err(|e| Error::io(abs, e))?;

    Ok(FileBackup {
        path: abs.to_path_buf(),
        bytes: original.into_bytes(),
        permissions,
    })
}

/// Restore rewritten files after a failed transaction. Best effort:
/// a file that cannot be restored is reported, not fatal, because the
/// caller is already surfacing the original error.
pub fn rollback(backups: &[FileBackup]) {
    for b in backups {
        if let Err(e) = fs::write(&b.path, &b.bytes) {
            error!(file = %b.path.display(), error = %e, "rollback write failed");
            continue;
        }
        if let Err(e) = fs::set_permissions(&b.path, b.permissions.clone()) {
            error!(file = %b.path.display(), error = %e, "rollback chmod failed");
        }
    }
}

/// The vault-relative raw-link target for a path: `sub/Note` for
/// `sub/Note.md`, the bare basename for root notes, the path as-is for
/// assets.
pub fn build_rewrite_path(target_path: &str) -> String {
    match target_path.strip_suffix(".md") {
        Some(stripped) => stripped.to_string(),
        None => target_path.to_string(),
    }
}

/// Reassemble a raw link in its original flavor around a new target.
pub(crate) fn rebuild_raw(parsed: &ParsedRaw, new_target: &str) -> String {
    let sub = if parsed.subpath.is_empty() {
        String::new()
    } else {
        format!("#{}", parsed.subpath)
    };
    match parsed.form {
        RawForm::Wiki => {
            let alias = parsed
                .alias
                .as_ref()
                .map(|a| format!("|{a}"))
                .unwrap_or_default();
            let bang = if parsed.embed { "!" } else { "" };
            format!("{bang}[[{new_target}{sub}{alias}]]")
        }
        RawForm::Markdown => {
            let bang = if parsed.embed { "!" } else { "" };
            let text = parsed.alias.as_deref().unwrap_or("");
            format!("{bang}[{text}]({new_target}{sub})")
        }
        RawForm::Plain => format!("{new_target}{sub}"),
        RawForm::Tag => parsed.target.clone(),
    }
}

/// New raw-link target text pointing a parsed link at `new_path`,
/// preserving the original form's extension discipline: wikilinks to
/// notes drop `.md`, markdown and frontmatter targets keep whatever
/// extension presence they had.
pub(crate) fn retargeted_text(parsed: &ParsedRaw, new_path: &str) -> String {
    match parsed.form {
        RawForm::Wiki => build_rewrite_path(new_path),
        RawForm::Markdown | RawForm::Plain => {
            if paths::is_md(new_path) && !paths::is_md(&parsed.target) {
                build_rewrite_path(new_path)
            } else {
                new_path.to_string()
            }
        }
        RawForm::Tag => parsed.target.clone(),
    }
}

/// Recompute a relative raw target so it keeps pointing at the same
/// file after source and/or target moved.
pub(crate) fn relative_target_text(
    parsed: &ParsedRaw,
    new_source_dir: &str,
    new_target_path: &str,
) -> String {
    let rel = paths::relative_link(new_source_dir, new_target_path);
    let rel = match parsed.form {
        RawForm::Wiki => build_rewrite_path(&rel),
        RawForm::Markdown | RawForm::Plain => {
            if paths::is_md(&rel) && !paths::is_md(&parsed.target) {
                build_rewrite_path(&rel)
            } else {
                rel
            }
        }
        RawForm::Tag => return parsed.target.clone(),
    };
    // Keep an explicit `./` if the original carried one and the result
    // has no relative prefix of its own.
    if parsed.target.starts_with("./") && !rel.starts_with("../") {
        format!("./{rel}")
    } else {
        rel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_raw_target;

    #[test]
    fn replaces_only_outside_code() {
        let body = "[[N]]\n`[[N]]`\n```\n[[N]]\n```\n[[N]] end\n";
        let (out, n) = replace_outside_code(body, "[[N]]", "[[sub/N]]");
        assert_eq!(n, 2);
        assert_eq!(out, "[[sub/N]]\n`[[N]]`\n```\n[[N]]\n```\n[[sub/N]] end\n");
    }

    #[test]
    fn replaces_multiple_occurrences_on_one_line() {
        let (out, n) = replace_outside_code("[[N]] and [[N]]\n", "[[N]]", "[[x/N]]");
        assert_eq!(n, 2);
        assert_eq!(out, "[[x/N]] and [[x/N]]\n");
    }

    #[test]
    fn build_rewrite_path_strips_md_only() {
        assert_eq!(build_rewrite_path("sub/Note.md"), "sub/Note");
        assert_eq!(build_rewrite_path("Note.md"), "Note");
        assert_eq!(build_rewrite_path("image.png"), "image.png");
    }

    #[test]
    fn rebuild_preserves_alias_subpath_and_embed() {
        let p = parse_raw_target("![[N#H|alias]]");
        assert_eq!(rebuild_raw(&p, "sub/N"), "![[sub/N#H|alias]]");

        let p = parse_raw_target("[text](N.md#frag)");
        assert_eq!(
            rebuild_raw(&p, &retargeted_text(&p, "sub/N.md")),
            "[text](sub/N.md#frag)"
        );
    }

    #[test]
    fn markdown_without_extension_stays_bare() {
        let p = parse_raw_target("[t](sub/N)");
        assert_eq!(retargeted_text(&p, "other/N.md"), "other/N");
    }

    #[test]
    fn relative_target_recomputed_from_new_dir() {
        let p = parse_raw_target("[[../B]]");
        assert_eq!(relative_target_text(&p, "x/y", "B.md"), "../../B");

        let p = parse_raw_target("[[./C]]");
        assert_eq!(relative_target_text(&p, "a", "a/C.md"), "./C");
    }

    #[test]
    fn apply_and_rollback_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.md");
        std::fs::write(&f, "[[N]]\n").unwrap();
        let backup =
            apply_file_rewrites(&f, &[("[[N]]".to_string(), "[[sub/N]]".to_string())]).unwrap();
        assert_eq!(std::fs::read_to_string(&f).unwrap(), "[[sub/N]]\n");
        rollback(&[backup]);
        assert_eq!(std::fs::read_to_string(&f).unwrap(), "[[N]]\n");
    }
}
