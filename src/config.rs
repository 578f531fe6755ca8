use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

pub const CONFIG_FILE: &str = "mdhop.yaml";
pub const DATA_DIR: &str = ".mdhop";
pub const INDEX_FILE: &str = "index.sqlite";

/// Vault configuration loaded from `mdhop.yaml` at the vault root.
/// Every key is optional; an absent file is the default config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build: BuildConfig,
    pub exclude: ExcludeConfig,
    pub frontmatter: FrontmatterConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Glob patterns excluded from indexing entirely.
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Glob patterns excluded from query results.
    pub paths: Vec<String>,
    /// Tag names excluded from query results, with or without `#`.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrontmatterConfig {
    /// Frontmatter keys whose string values are treated as links.
    pub link_keys: Vec<String>,
}

impl Config {
    pub fn load(vault_root: &Path) -> Result<Self> {
        let path = vault_root.join(CONFIG_FILE);
        let cfg: Self = match std::fs::read_to_string(&path) {
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(Error::io(&path, e)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for pat in self
            .build
            .exclude_paths
            .iter()
            .chain(self.exclude.paths.iter())
        {
            validate_glob(pat)?;
        }
        Ok(())
    }

    pub fn is_build_excluded(&self, path: &str) -> bool {
        self.build
            .exclude_paths
            .iter()
            .any(|pat| glob_match(pat, path))
    }

    pub fn is_query_excluded_path(&self, path: &str) -> bool {
        self.exclude.paths.iter().any(|pat| glob_match(pat, path))
    }

    pub fn is_query_excluded_tag(&self, tag: &str) -> bool {
        let t = tag.trim_start_matches('#').to_lowercase();
        self.exclude
            .tags
            .iter()
            .any(|x| x.trim_start_matches('#').to_lowercase() == t)
    }
}

/// Character classes are not supported; a `[` in a pattern is an error.
pub fn validate_glob(pattern: &str) -> Result<()> {
    if pattern.contains('[') {
        return Err(Error::BadGlob(pattern.to_string()));
    }
    Ok(())
}

/// Glob match where `*` matches any run of characters including `/` and
/// `?` matches exactly one character. Mirrors SQLite GLOB so that
/// query-time SQL filters and build-time Rust filters agree.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = s.chars().collect();
    glob_match_at(&pat, 0, &txt, 0)
}

fn glob_match_at(pat: &[char], mut pi: usize, txt: &[char], mut ti: usize) -> bool {
    // Iterative wildcard matching with a single backtrack point.
    let mut star: Option<(usize, usize)> = None;
    loop {
        if ti == txt.len() {
            while pi < pat.len() && pat[pi] == '*' {
                pi += 1;
            }
            return pi == pat.len();
        }
        if pi < pat.len() {
            match pat[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                c if c == txt[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((spi, sti)) => {
                pi = spi + 1;
                ti = sti + 1;
                star = Some((spi, sti + 1));
            }
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_crosses_directory_separators() {
        assert!(glob_match("drafts/*", "drafts/a/b.md"));
        assert!(glob_match("*.md", "deep/nested/x.md"));
        assert!(!glob_match("drafts/*", "notes/a.md"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("a?.md", "ab.md"));
        assert!(!glob_match("a?.md", "a.md"));
        assert!(!glob_match("a?.md", "abc.md"));
    }

    #[test]
    fn bracket_is_rejected() {
        assert!(validate_glob("a[b]c").is_err());
        assert!(validate_glob("a*c").is_ok());
    }

    #[test]
    fn config_parses_yaml() {
        let cfg: Config = serde_yaml::from_str(
            "build:\n  exclude_paths: [\"drafts/*\"]\nexclude:\n  tags: [\"#wip\"]\n",
        )
        .unwrap();
        assert!(cfg.is_build_excluded("drafts/x.md"));
        assert!(cfg.is_query_excluded_tag("WIP"));
        assert!(!cfg.is_query_excluded_tag("done"));
    }
}
