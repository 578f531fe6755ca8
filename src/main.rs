use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use mdhop::{
    LinkForm, QueryEntry, QueryOptions, RewriteRecord, ScanReport, Vault,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConvertToArg {
    Wikilink,
    Markdown,
}

impl From<ConvertToArg> for LinkForm {
    fn from(value: ConvertToArg) -> Self {
        match value {
            ConvertToArg::Wikilink => LinkForm::Wikilink,
            ConvertToArg::Markdown => LinkForm::Markdown,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mdhop",
    version,
    about = "Index and mutate the link graph of a Markdown vault"
)]
struct Cli {
    /// Path to the vault root.
    #[arg(long, env = "MDHOP_VAULT", global = true, default_value = ".")]
    vault: PathBuf,

    /// Output format.
    #[arg(long, value_enum, global = true, default_value_t = FormatArg::Text)]
    format: FormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the vault and (re)build the index.
    Build,
    /// Register new files, auto-disambiguating basename collisions.
    Add {
        #[arg(long = "file", required = true)]
        files: Vec<String>,
        /// Fail instead of rewriting links when a collision appears.
        #[arg(long)]
        no_auto_disambiguate: bool,
    },
    /// Re-index changed files; missing files are deleted.
    Update {
        #[arg(long = "file", required = true)]
        files: Vec<String>,
    },
    /// Unregister files; referenced notes demote to phantoms.
    Delete {
        #[arg(long = "file", required = true)]
        files: Vec<String>,
        /// Also remove the files from disk (enables directory mode).
        #[arg(long = "rm")]
        remove_files: bool,
    },
    /// Move or rename a file or directory, rewriting links.
    Move {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Rewrite basename links of a name to an explicit path.
    Disambiguate {
        #[arg(long)]
        name: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long = "file")]
        files: Vec<String>,
        /// Walk files instead of using the index.
        #[arg(long)]
        scan: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rewrite unique path links to basename form.
    Simplify {
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rewrite broken and escaping path links to basename form.
    Repair {
        #[arg(long)]
        dry_run: bool,
    },
    /// Convert links between wikilink and markdown form.
    Convert {
        #[arg(long, value_enum)]
        to: ConvertToArg,
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve one raw link from a source note.
    Resolve {
        #[arg(long)]
        from: String,
        #[arg(long)]
        link: String,
    },
    /// Query neighborhoods of a file, tag, phantom or name.
    Query {
        /// `#tag`, a path, or a note/phantom name.
        entry: String,
        #[arg(long)]
        backlinks: bool,
        #[arg(long)]
        outgoing: bool,
        #[arg(long)]
        tags: bool,
        #[arg(long)]
        twohop: bool,
        /// Include the first N body lines of the entry note.
        #[arg(long, value_name = "N")]
        include_head: Option<usize>,
        /// Include N context lines around each incoming link.
        #[arg(long, value_name = "N")]
        include_snippet: Option<usize>,
        #[arg(long)]
        max_backlinks: Option<usize>,
        #[arg(long)]
        max_twohop: Option<usize>,
        #[arg(long)]
        max_via_per_target: Option<usize>,
        /// Skip the mtime check for head/snippet.
        #[arg(long)]
        allow_stale: bool,
    },
    /// Print node and edge counts.
    Stats {
        /// Restrict output to the named counters.
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Report basename conflicts and phantom names.
    Diagnose {
        /// Restrict output to the named sections.
        #[arg(long = "field")]
        fields: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MDHOP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let vault = Vault::open(&cli.vault)?;
    let format = cli.format;

    match cli.command {
        Command::Build => {
            let summary = mdhop::build(&vault)?;
            emit(format, &summary, || {
                format!(
                    "indexed {} notes, {} assets, {} links",
                    summary.notes, summary.assets, summary.edges
                )
            });
        }
        Command::Add {
            files,
            no_auto_disambiguate,
        } => {
            let res = mdhop::add(&vault, &files, !no_auto_disambiguate)?;
            emit(format, &res, || {
                let mut s = format!("added {}", res.added.join(", "));
                if !res.promoted.is_empty() {
                    s.push_str(&format!("\npromoted {}", res.promoted.join(", ")));
                }
                s.push_str(&rewrites_text(&res.rewritten));
                s
            });
        }
        Command::Update { files } => {
            let res = mdhop::update(&vault, &files)?;
            emit(format, &res, || {
                format!(
                    "updated {}; deleted {}; phantomed {}",
                    res.updated.join(", "),
                    res.deleted.join(", "),
                    res.phantomed.join(", ")
                )
            });
        }
        Command::Delete {
            files,
            remove_files,
        } => {
            let res = mdhop::delete(&vault, &files, remove_files)?;
            emit(format, &res, || {
                format!(
                    "deleted {}; phantomed {}",
                    res.deleted.join(", "),
                    res.phantomed.join(", ")
                )
            });
        }
        Command::Move { from, to } => {
            let res = mdhop::move_entry(&vault, &from, &to)?;
            emit(format, &res, || {
                let mut s = String::new();
                for m in &res.moved {
                    s.push_str(&format!("moved {} -> {}\n", m.from, m.to));
                }
                s.push_str(rewrites_text(&res.rewritten).trim_start_matches('\n'));
                s
            });
        }
        Command::Disambiguate {
            name,
            target,
            files,
            scan,
            dry_run,
        } => {
            let res = mdhop::disambiguate(
                &vault,
                &name,
                target.as_deref(),
                subset(&files),
                scan,
                dry_run,
            )?;
            emit_scan(format, &res);
        }
        Command::Simplify { files, dry_run } => {
            let res = mdhop::simplify(&vault, subset(&files), dry_run)?;
            emit_scan(format, &res);
        }
        Command::Repair { dry_run } => {
            let res = mdhop::repair(&vault, dry_run)?;
            emit_scan(format, &res);
        }
        Command::Convert { to, files, dry_run } => {
            let res = mdhop::convert(&vault, to.into(), subset(&files), dry_run)?;
            emit_scan(format, &res);
        }
        Command::Resolve { from, link } => {
            let res = mdhop::resolve(&vault, &from, &link)?;
            emit(format, &res, || {
                format!(
                    "{} {} {}{}",
                    res.node_type,
                    res.name,
                    res.path.as_deref().unwrap_or("-"),
                    res.subpath
                        .as_deref()
                        .map(|s| format!(" #{s}"))
                        .unwrap_or_default()
                )
            });
        }
        Command::Query {
            entry,
            backlinks,
            outgoing,
            tags,
            twohop,
            include_head,
            include_snippet,
            max_backlinks,
            max_twohop,
            max_via_per_target,
            allow_stale,
        } => {
            let default_sections = !(backlinks || outgoing || tags || twohop)
                && include_head.is_none()
                && include_snippet.is_none();
            let opts = QueryOptions {
                backlinks: backlinks || default_sections,
                outgoing: outgoing || default_sections,
                tags: tags || default_sections,
                twohop,
                head: include_head,
                snippet: include_snippet,
                max_backlinks,
                max_twohop,
                max_via_per_target,
                allow_stale,
            };
            let res = mdhop::query(&vault, &detect_entry(&entry), &opts)?;
            emit(format, &res, || query_text(&res));
        }
        Command::Stats { fields } => {
            let res = mdhop::stats(&vault)?;
            let pairs = [
                ("notes_total", res.notes_total),
                ("notes_existing", res.notes_existing),
                ("assets", res.assets),
                ("edges", res.edges),
                ("tags", res.tags),
                ("phantoms", res.phantoms),
            ];
            let selected: Vec<(&str, i64)> = pairs
                .into_iter()
                .filter(|(k, _)| fields.is_empty() || fields.iter().any(|f| f == k))
                .collect();
            match format {
                FormatArg::Json => {
                    let obj: serde_json::Map<String, serde_json::Value> = selected
                        .iter()
                        .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&obj)?);
                }
                FormatArg::Text => {
                    let line = selected
                        .iter()
                        .map(|(k, v)| format!("{k} {v}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!("{line}");
                }
            }
        }
        Command::Diagnose { fields } => {
            let mut res = mdhop::diagnose(&vault)?;
            if !fields.is_empty() {
                if !fields.iter().any(|f| f == "basename_conflicts") {
                    res.basename_conflicts.clear();
                }
                if !fields.iter().any(|f| f == "asset_basename_conflicts") {
                    res.asset_basename_conflicts.clear();
                }
                if !fields.iter().any(|f| f == "phantoms") {
                    res.phantoms.clear();
                }
            }
            emit(format, &res, || {
                let mut s = String::new();
                for c in &res.basename_conflicts {
                    s.push_str(&format!("conflict {}: {}\n", c.name, c.paths.join(", ")));
                }
                for c in &res.asset_basename_conflicts {
                    s.push_str(&format!(
                        "asset conflict {}: {}\n",
                        c.name,
                        c.paths.join(", ")
                    ));
                }
                for p in &res.phantoms {
                    s.push_str(&format!("phantom {p}\n"));
                }
                if s.is_empty() {
                    s.push_str("no issues");
                }
                s
            });
        }
    }
    Ok(())
}

fn subset(files: &[String]) -> Option<&[String]> {
    if files.is_empty() { None } else { Some(files) }
}

fn detect_entry(entry: &str) -> QueryEntry {
    if entry.starts_with('#') {
        QueryEntry::Tag(entry.to_string())
    } else if entry.contains('/') || entry.to_lowercase().ends_with(".md") {
        QueryEntry::File(entry.to_string())
    } else {
        QueryEntry::Name(entry.to_string())
    }
}

fn emit<T: Serialize>(format: FormatArg, value: &T, text: impl FnOnce() -> String) {
    match format {
        FormatArg::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("serialization error: {e}"),
        },
        FormatArg::Text => {
            let t = text();
            if !t.is_empty() {
                println!("{t}");
            }
        }
    }
}

fn emit_scan(format: FormatArg, res: &ScanReport) {
    emit(format, res, || {
        let mut s = rewrites_text(&res.rewritten)
            .trim_start_matches('\n')
            .to_string();
        for skip in &res.skipped {
            s.push_str(&format!(
                "\nskipped {} {} ({})",
                skip.file, skip.raw_link, skip.reason
            ));
        }
        if s.is_empty() {
            s.push_str("nothing to do");
        }
        s
    });
}

fn rewrites_text(records: &[RewriteRecord]) -> String {
    let mut s = String::new();
    for r in records {
        s.push_str(&format!(
            "\nrewrote {}: {} -> {}",
            r.file, r.old_link, r.new_link
        ));
    }
    s
}

fn query_text(res: &mdhop::QueryResult) -> String {
    let mut s = format!(
        "{} {}{}",
        res.entry.node_type,
        res.entry.name,
        res.entry
            .path
            .as_deref()
            .map(|p| format!(" ({p})"))
            .unwrap_or_default()
    );
    let section = |s: &mut String, title: &str, nodes: &Option<Vec<mdhop::NodePayload>>| {
        if let Some(nodes) = nodes {
            s.push_str(&format!("\n{title}:"));
            for n in nodes {
                s.push_str(&format!(
                    "\n  {}",
                    n.path.as_deref().unwrap_or(n.name.as_str())
                ));
            }
        }
    };
    section(&mut s, "backlinks", &res.backlinks);
    section(&mut s, "outgoing", &res.outgoing);
    section(&mut s, "tags", &res.tags);
    if let Some(twohop) = &res.twohop {
        s.push_str("\ntwohop:");
        for entry in twohop {
            s.push_str(&format!(
                "\n  via {}:",
                entry.via.path.as_deref().unwrap_or(entry.via.name.as_str())
            ));
            for t in &entry.targets {
                s.push_str(&format!(
                    "\n    {}",
                    t.path.as_deref().unwrap_or(t.name.as_str())
                ));
            }
        }
    }
    if let Some(head) = &res.head {
        s.push_str("\nhead:");
        for line in head {
            s.push_str(&format!("\n  {line}"));
        }
    }
    if let Some(snips) = &res.snippets {
        for snip in snips {
            s.push_str(&format!(
                "\n{}:{}-{}\n{}",
                snip.file, snip.line_start, snip.line_end, snip.text
            ));
        }
    }
    s
}
