//! Markdown link scanner.
//!
//! Produces [`LinkOccurrence`] records for wikilinks, markdown links,
//! inline tags and frontmatter entries, honoring code-fence and
//! inline-code exclusions. The scanner is line-based: no recognized
//! construct spans lines.

use crate::config::FrontmatterConfig;
use crate::links::{LinkOccurrence, LinkType};
use crate::paths;

/// Tracks triple-backtick / triple-tilde fences across lines.
#[derive(Debug, Default)]
pub(crate) struct FenceState {
    open: Option<char>,
}

impl FenceState {
    /// Feed one line; returns true when the line is a fence delimiter
    /// (the line itself produces no occurrences).
    pub(crate) fn feed(&mut self, line: &str) -> bool {
        let t = line.trim_start();
        let marker = if t.starts_with("```") {
            Some('`')
        } else if t.starts_with("~~~") {
            Some('~')
        } else {
            None
        };
        let Some(m) = marker else {
            return false;
        };
        match self.open {
            None => {
                self.open = Some(m);
                true
            }
            Some(o) if o == m => {
                self.open = None;
                true
            }
            // A different marker inside an open fence is fence content.
            Some(_) => true,
        }
    }

    pub(crate) fn in_fence(&self) -> bool {
        self.open.is_some()
    }
}

/// Byte spans of inline code on one line. An unclosed opener extends
/// to end of line; a closer must repeat the opener's backtick count.
pub(crate) fn inline_code_spans(line: &str) -> Vec<(usize, usize)> {
    let bytes = line.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'`' || (i > 0 && bytes[i - 1] == b'\\') {
            i += 1;
            continue;
        }
        let start = i;
        let mut n = 0usize;
        while i < bytes.len() && bytes[i] == b'`' {
            n += 1;
            i += 1;
        }
        // Find a closing run of exactly n backticks.
        let mut close = None;
        let mut j = i;
        while j < bytes.len() {
            if bytes[j] == b'`' && bytes[j - 1] != b'\\' {
                let mut m = 0usize;
                while j < bytes.len() && bytes[j] == b'`' {
                    m += 1;
                    j += 1;
                }
                if m == n {
                    close = Some(j);
                    break;
                }
            } else {
                j += 1;
            }
        }
        match close {
            Some(end) => {
                spans.push((start, end));
                i = end;
            }
            None => {
                spans.push((start, bytes.len()));
                break;
            }
        }
    }
    spans
}

/// Spans of bare URLs (`scheme://...`) on one line; tags inside them
/// are not tags and the URLs themselves are not occurrences.
fn url_spans(line: &str) -> Vec<(usize, usize)> {
    let bytes = line.as_bytes();
    let mut spans = Vec::new();
    let mut from = 0usize;
    while let Some(off) = line[from..].find("://") {
        let at = from + off;
        let mut start = at;
        while start > 0 && !bytes[start - 1].is_ascii_whitespace() && bytes[start - 1] != b'<' {
            start -= 1;
        }
        let mut end = at + 3;
        while end < bytes.len() && !bytes[end].is_ascii_whitespace() && bytes[end] != b'>' {
            end += 1;
        }
        spans.push((start, end));
        from = end;
    }
    spans
}

fn in_spans(spans: &[(usize, usize)], ix: usize) -> bool {
    spans.iter().any(|&(s, e)| ix >= s && ix < e)
}

fn overlaps(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|&(s, e)| start < e && end > s)
}

/// Parse a full note body (frontmatter included) into occurrences.
pub(crate) fn parse_note(content: &str, fm_cfg: &FrontmatterConfig) -> Vec<LinkOccurrence> {
    let mut out = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    let body_start = match frontmatter_close(&lines) {
        Some(close_ix) => {
            let fm_body = &lines[1..close_ix];
            let fm_text = fm_body.join("\n");
            if fm_text.trim().is_empty()
                || serde_yaml::from_str::<serde_yaml::Value>(&fm_text).is_ok()
            {
                scan_frontmatter(fm_body, fm_cfg, &mut out);
                close_ix + 1
            } else {
                // Malformed frontmatter: the file has none.
                0
            }
        }
        None => 0,
    };

    let mut fence = FenceState::default();
    for (ix, line) in lines.iter().enumerate().skip(body_start) {
        let line_no = ix as u32 + 1;
        if fence.feed(line) || fence.in_fence() {
            continue;
        }
        scan_body_line(line, line_no, &mut out);
    }
    out
}

/// Parse a raw link snippet (as stored on an edge or typed by a user)
/// as if it were a body line. Frontmatter-style plain targets yield no
/// occurrence here; callers fall back to [`parse_raw_target`].
pub(crate) fn parse_snippet(raw: &str) -> Vec<LinkOccurrence> {
    let mut out = Vec::new();
    scan_body_line(raw, 1, &mut out);
    out
}

fn frontmatter_close(lines: &[&str]) -> Option<usize> {
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return None;
    }
    lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, l)| l.trim_end() == "---")
        .map(|(ix, _)| ix)
}

fn scan_body_line(line: &str, line_no: u32, out: &mut Vec<LinkOccurrence>) {
    let code = inline_code_spans(line);
    let urls = url_spans(line);
    let mut link_spans: Vec<(usize, usize)> = Vec::new();

    scan_wikilinks(line, line_no, &code, &mut link_spans, out);
    scan_markdown_links(line, line_no, &code, &mut link_spans, out);
    scan_tags(line, line_no, &code, &urls, &link_spans, out);
}

fn scan_wikilinks(
    line: &str,
    line_no: u32,
    code: &[(usize, usize)],
    link_spans: &mut Vec<(usize, usize)>,
    out: &mut Vec<LinkOccurrence>,
) {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] != b'[' || bytes[i + 1] != b'[' || in_spans(code, i) {
            i += 1;
            continue;
        }
        let embed = i > 0 && bytes[i - 1] == b'!';
        let raw_start = if embed { i - 1 } else { i };
        let Some(close_off) = line[i + 2..].find("]]") else {
            break;
        };
        let inner_end = i + 2 + close_off;
        let raw_end = inner_end + 2;
        if overlaps(code, raw_start, raw_end) {
            i = raw_end;
            continue;
        }
        let inner = &line[i + 2..inner_end];
        if let Some(occ) = wikilink_occurrence(inner, embed, &line[raw_start..raw_end], line_no) {
            link_spans.push((raw_start, raw_end));
            out.push(occ);
        }
        i = raw_end;
    }
}

fn wikilink_occurrence(
    inner: &str,
    embed: bool,
    raw: &str,
    line_no: u32,
) -> Option<LinkOccurrence> {
    let (before_alias, alias) = match inner.split_once('|') {
        Some((l, r)) => (l, Some(r.to_string())),
        None => (inner, None),
    };
    let (target, subpath) = match before_alias.split_once('#') {
        Some((l, r)) => (l.trim(), r.trim().to_string()),
        None => (before_alias.trim(), String::new()),
    };
    if target.is_empty() && subpath.is_empty() {
        return None;
    }
    Some(LinkOccurrence {
        link_type: LinkType::Wikilink,
        target: target.to_string(),
        subpath,
        is_relative: target.starts_with("./") || target.starts_with("../"),
        is_basename: !target.is_empty() && paths::is_basename_link(target),
        raw_link: raw.to_string(),
        line_start: line_no,
        line_end: line_no,
        embed,
        alias,
        fm_tag: false,
    })
}

fn scan_markdown_links(
    line: &str,
    line_no: u32,
    code: &[(usize, usize)],
    link_spans: &mut Vec<(usize, usize)>,
    out: &mut Vec<LinkOccurrence>,
) {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'[' || in_spans(code, i) || overlaps(link_spans, i, i + 1) {
            i += 1;
            continue;
        }
        // `[[` opens a wikilink, not a markdown link.
        if i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            i += 2;
            continue;
        }
        let embed = i > 0 && bytes[i - 1] == b'!';
        let raw_start = if embed { i - 1 } else { i };
        let Some(text_off) = line[i + 1..].find(']') else {
            break;
        };
        let text_end = i + 1 + text_off;
        if text_end + 1 >= bytes.len() || bytes[text_end + 1] != b'(' {
            i = text_end + 1;
            continue;
        }
        let Some(tgt_off) = line[text_end + 2..].find(')') else {
            break;
        };
        let tgt_end = text_end + 2 + tgt_off;
        let raw_end = tgt_end + 1;
        if overlaps(code, raw_start, raw_end) {
            i = raw_end;
            continue;
        }
        let text = &line[i + 1..text_end];
        let target_raw = line[text_end + 2..tgt_end].trim();
        if let Some(occ) = markdown_occurrence(
            text,
            target_raw,
            embed,
            &line[raw_start..raw_end],
            line_no,
        ) {
            link_spans.push((raw_start, raw_end));
            out.push(occ);
        }
        i = raw_end;
    }
}

fn markdown_occurrence(
    text: &str,
    target_raw: &str,
    embed: bool,
    raw: &str,
    line_no: u32,
) -> Option<LinkOccurrence> {
    if target_raw.is_empty() || target_raw.contains("://") {
        return None;
    }
    let (target, subpath) = match target_raw.split_once('#') {
        Some((l, r)) => (l.trim(), r.trim().to_string()),
        None => (target_raw, String::new()),
    };
    if target.is_empty() && subpath.is_empty() {
        return None;
    }
    Some(LinkOccurrence {
        link_type: LinkType::Markdown,
        target: target.to_string(),
        subpath,
        is_relative: target.starts_with("./") || target.starts_with("../"),
        is_basename: !target.is_empty() && paths::is_basename_link(target),
        raw_link: raw.to_string(),
        line_start: line_no,
        line_end: line_no,
        embed,
        alias: if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        },
        fm_tag: false,
    })
}

fn scan_tags(
    line: &str,
    line_no: u32,
    code: &[(usize, usize)],
    urls: &[(usize, usize)],
    link_spans: &[(usize, usize)],
    out: &mut Vec<LinkOccurrence>,
) {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut ci = 0usize;
    while ci < chars.len() {
        let (byte_ix, c) = chars[ci];
        if c != '#'
            || in_spans(code, byte_ix)
            || in_spans(urls, byte_ix)
            || in_spans(link_spans, byte_ix)
        {
            ci += 1;
            continue;
        }
        // Tag needs a boundary on the left.
        if ci > 0 {
            let prev = chars[ci - 1].1;
            if prev.is_alphanumeric() || prev == '/' || prev == '#' {
                ci += 1;
                continue;
            }
        }
        let mut cj = ci + 1;
        while cj < chars.len() && is_tag_char(chars[cj].1) {
            cj += 1;
        }
        let text_start = chars[ci + 1..cj].first().map(|&(b, _)| b);
        let text_end = if cj < chars.len() {
            chars[cj].0
        } else {
            line.len()
        };
        if let Some(start) = text_start {
            let text = line[start..text_end].trim_end_matches('/');
            if !text.is_empty() && !text.chars().next().is_some_and(|c| c.is_numeric()) {
                expand_tag(text, true, line_no, false, out);
            }
        }
        ci = cj.max(ci + 1);
    }
}

fn is_tag_char(c: char) -> bool {
    if matches!(c, '_' | '-' | '/') {
        return true;
    }
    // General Punctuation block terminates a tag.
    if ('\u{2000}'..='\u{206f}').contains(&c) {
        return false;
    }
    c.is_alphanumeric()
}

/// Nested tags produce one occurrence per prefix: `#a/b` yields `#a`
/// and `#a/b`, each with the literal prefix as its raw text.
fn expand_tag(
    text: &str,
    hash_prefix: bool,
    line_no: u32,
    fm_tag: bool,
    out: &mut Vec<LinkOccurrence>,
) {
    let mut prefix_len = 0usize;
    let segments: Vec<&str> = text.split('/').collect();
    for (ix, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        prefix_len += seg.len() + if ix > 0 { 1 } else { 0 };
        let prefix = &text[..prefix_len];
        let raw = if hash_prefix {
            format!("#{prefix}")
        } else {
            prefix.to_string()
        };
        out.push(LinkOccurrence {
            link_type: if fm_tag {
                LinkType::Frontmatter
            } else {
                LinkType::Tag
            },
            target: prefix.to_string(),
            subpath: String::new(),
            is_relative: false,
            is_basename: false,
            raw_link: raw,
            line_start: line_no,
            line_end: line_no,
            embed: false,
            alias: None,
            fm_tag,
        });
    }
}

fn scan_frontmatter(fm_body: &[&str], cfg: &FrontmatterConfig, out: &mut Vec<LinkOccurrence>) {
    let mut ix = 0usize;
    while ix < fm_body.len() {
        let line = fm_body[ix];
        let Some((key, rest)) = top_level_key(line) else {
            ix += 1;
            continue;
        };
        let is_tags = key == "tags";
        let is_link_key = cfg.link_keys.iter().any(|k| k == key);
        if !is_tags && !is_link_key {
            ix += 1;
            continue;
        }

        let rest = rest.trim();
        if rest.is_empty() {
            // Block list on the following lines; indentation is
            // optional in YAML sequences.
            let mut j = ix + 1;
            while j < fm_body.len() {
                let t = fm_body[j].trim_start();
                if !t.starts_with('-') {
                    break;
                }
                let item = unquote(t.trim_start_matches('-').trim());
                if !item.is_empty() {
                    emit_frontmatter_item(&item, j as u32 + 2, is_tags, out);
                }
                j += 1;
            }
            ix = j;
            continue;
        }

        // Flow list or comma-separated scalar on the key line.
        // Occurrence line = yaml line within the body + 1 for the opener.
        let line_no = ix as u32 + 2;
        let items: Vec<String> = if rest.starts_with('[') && rest.ends_with(']') {
            rest[1..rest.len() - 1]
                .split(',')
                .map(|s| unquote(s.trim()))
                .collect()
        } else if is_tags {
            rest.split(',').map(|s| unquote(s.trim())).collect()
        } else {
            vec![unquote(rest)]
        };
        for item in items.iter().filter(|i| !i.is_empty()) {
            emit_frontmatter_item(item, line_no, is_tags, out);
        }
        ix += 1;
    }
}

fn emit_frontmatter_item(item: &str, line_no: u32, is_tags: bool, out: &mut Vec<LinkOccurrence>) {
    if is_tags {
        let hash = item.starts_with('#');
        let text = item.trim_start_matches('#').trim_end_matches('/');
        if !text.is_empty() {
            expand_tag(text, hash, line_no, true, out);
        }
        return;
    }
    // Link key: a plain link string, optionally with a subpath.
    let (target, subpath) = match item.split_once('#') {
        Some((l, r)) => (l.trim(), r.trim().to_string()),
        None => (item, String::new()),
    };
    if target.is_empty() {
        return;
    }
    out.push(LinkOccurrence {
        link_type: LinkType::Frontmatter,
        target: target.to_string(),
        subpath,
        is_relative: target.starts_with("./") || target.starts_with("../"),
        is_basename: paths::is_basename_link(target),
        raw_link: item.to_string(),
        line_start: line_no,
        line_end: line_no,
        embed: false,
        alias: None,
        fm_tag: false,
    });
}

fn top_level_key(line: &str) -> Option<(&str, &str)> {
    if line.starts_with([' ', '\t', '#', '-']) {
        return None;
    }
    let (key, rest) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, rest))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// The parsed shape of a stored raw link, used when re-identifying
/// edges during rewrites. Plain strings (frontmatter link values) parse
/// as `Plain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedRaw {
    pub form: RawForm,
    pub embed: bool,
    pub alias: Option<String>,
    pub target: String,
    pub subpath: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawForm {
    Wiki,
    Markdown,
    Tag,
    Plain,
}

impl ParsedRaw {
    pub(crate) fn from_occurrence(occ: &LinkOccurrence) -> Self {
        let form = match occ.link_type {
            LinkType::Wikilink => RawForm::Wiki,
            LinkType::Markdown => RawForm::Markdown,
            LinkType::Tag => RawForm::Tag,
            LinkType::Frontmatter => {
                if occ.fm_tag {
                    RawForm::Tag
                } else {
                    RawForm::Plain
                }
            }
        };
        Self {
            form,
            embed: occ.embed,
            alias: occ.alias.clone(),
            target: occ.target.clone(),
            subpath: occ.subpath.clone(),
        }
    }
}

pub(crate) fn parse_raw_target(raw: &str) -> ParsedRaw {
    if let Some(occ) = parse_snippet(raw).into_iter().find(|o| o.raw_link == raw) {
        let form = match occ.link_type {
            LinkType::Wikilink => RawForm::Wiki,
            LinkType::Markdown => RawForm::Markdown,
            LinkType::Tag => RawForm::Tag,
            LinkType::Frontmatter => RawForm::Plain,
        };
        return ParsedRaw {
            form,
            embed: occ.embed,
            alias: occ.alias,
            target: occ.target,
            subpath: occ.subpath,
        };
    }
    let (target, subpath) = match raw.split_once('#') {
        Some((l, r)) => (l.trim().to_string(), r.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    };
    ParsedRaw {
        form: RawForm::Plain,
        embed: false,
        alias: None,
        target,
        subpath,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<LinkOccurrence> {
        parse_note(content, &FrontmatterConfig::default())
    }

    #[test]
    fn wikilink_components_are_split() {
        let occs = parse("See [[Note#Heading|alias]] and ![[img.png]].\n");
        assert_eq!(occs.len(), 2);
        assert_eq!(occs[0].target, "Note");
        assert_eq!(occs[0].subpath, "Heading");
        assert_eq!(occs[0].alias.as_deref(), Some("alias"));
        assert_eq!(occs[0].raw_link, "[[Note#Heading|alias]]");
        assert!(occs[0].is_basename);
        assert!(occs[1].embed);
        assert_eq!(occs[1].raw_link, "![[img.png]]");
    }

    #[test]
    fn self_link_has_empty_target() {
        let occs = parse("[[#Section]]\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].target, "");
        assert_eq!(occs[0].subpath, "Section");
        assert!(!occs[0].is_basename);
    }

    #[test]
    fn block_reference_subpath_keeps_caret() {
        let occs = parse("[[Note#^block1]]\n");
        assert_eq!(occs[0].subpath, "^block1");
    }

    #[test]
    fn markdown_link_and_image() {
        let occs = parse("[text](sub/B.md) ![pic](photo.png)\n");
        assert_eq!(occs.len(), 2);
        assert_eq!(occs[0].link_type, LinkType::Markdown);
        assert_eq!(occs[0].target, "sub/B.md");
        assert!(!occs[0].is_basename);
        assert!(occs[1].embed);
        assert!(occs[1].is_basename);
    }

    #[test]
    fn double_bracket_is_not_a_markdown_link() {
        let occs = parse("[[A]](not-a-target)\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].link_type, LinkType::Wikilink);
    }

    #[test]
    fn url_markdown_targets_are_skipped() {
        let occs = parse("[site](https://example.com#frag) #real\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].link_type, LinkType::Tag);
        assert_eq!(occs[0].target, "real");
    }

    #[test]
    fn fenced_blocks_produce_nothing() {
        let occs = parse("```\n[[hidden]] #hidden\n```\n[[shown]]\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].target, "shown");
    }

    #[test]
    fn tilde_fences_toggle_independently() {
        let occs = parse("~~~\n[[hidden]]\n~~~\n[[shown]]\n");
        assert_eq!(occs.len(), 1);
    }

    #[test]
    fn inline_code_is_excluded() {
        let occs = parse("`[[no]]` and [[yes]] and ``[[also no]]``\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].target, "yes");
    }

    #[test]
    fn unclosed_backtick_masks_to_end_of_line() {
        let occs = parse("before [[yes]] `rest [[no]]\n[[next]]\n");
        let targets: Vec<_> = occs.iter().map(|o| o.target.as_str()).collect();
        assert_eq!(targets, vec!["yes", "next"]);
    }

    #[test]
    fn nested_tags_expand_per_prefix() {
        let occs = parse("#parent/子\n");
        let raws: Vec<_> = occs.iter().map(|o| o.raw_link.as_str()).collect();
        assert_eq!(raws, vec!["#parent", "#parent/子"]);
    }

    #[test]
    fn leading_digit_is_not_a_tag_but_unicode_is() {
        assert!(parse("#123\n").is_empty());
        let occs = parse("#あいうえお\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].target, "あいうえお");
    }

    #[test]
    fn headings_and_url_fragments_are_not_tags() {
        assert!(parse("# Title\n").is_empty());
        assert!(parse("see https://x.test/page#anchor\n").is_empty());
    }

    #[test]
    fn frontmatter_tags_list_and_string() {
        let occs = parse("---\ntags: [a, b/c]\n---\nbody\n");
        let targets: Vec<_> = occs.iter().map(|o| o.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "b/c"]);
        assert!(occs.iter().all(|o| o.fm_tag));
        assert!(occs.iter().all(|o| o.line_start == 2));
    }

    #[test]
    fn frontmatter_block_list_line_numbers() {
        let occs = parse("---\ntitle: x\ntags:\n  - one\n  - two\n---\n");
        assert_eq!(occs.len(), 2);
        // Item lines 4 and 5 in the file.
        assert_eq!(occs[0].line_start, 4);
        assert_eq!(occs[1].line_start, 5);
    }

    #[test]
    fn malformed_frontmatter_is_treated_as_body() {
        let occs = parse("---\ntags: [unclosed\n---\n[[A]]\n");
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].target, "A");
    }

    #[test]
    fn frontmatter_link_keys_resolve_as_links() {
        let cfg = FrontmatterConfig {
            link_keys: vec!["up".into()],
        };
        let occs = parse_note("---\nup: sub/Parent\n---\n", &cfg);
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].link_type, LinkType::Frontmatter);
        assert_eq!(occs[0].target, "sub/Parent");
        assert!(!occs[0].fm_tag);
        assert!(!occs[0].is_basename);
    }

    #[test]
    fn parse_raw_target_roundtrips_forms() {
        let w = parse_raw_target("[[sub/N#H|a]]");
        assert_eq!(w.form, RawForm::Wiki);
        assert_eq!(w.target, "sub/N");
        assert_eq!(w.subpath, "H");
        assert_eq!(w.alias.as_deref(), Some("a"));

        let m = parse_raw_target("![x](img.png)");
        assert_eq!(m.form, RawForm::Markdown);
        assert!(m.embed);

        let p = parse_raw_target("sub/Parent#H");
        assert_eq!(p.form, RawForm::Plain);
        assert_eq!(p.target, "sub/Parent");
        assert_eq!(p.subpath, "H");
    }
}
