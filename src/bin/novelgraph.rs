//! Novelgraph CLI: inspect and maintain a narrative memory store.
//!
//! Usage:
//!   novelgraph stats [--novel id] [--db path] [--config file]
//!   novelgraph query <kind> <novel> <chapter> [--limit n]
//!   novelgraph states <novel> [--character name]
//!   novelgraph rollback <novel> <chapter>

use clap::{Parser, Subcommand, ValueEnum};
use novelgraph::{connect_backend, EngineConfig, NarrativeStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "novelgraph",
    version,
    about = "Narrative memory graph for long-form fiction"
)]
struct Cli {
    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store counts
    Stats {
        /// Restrict counts to one novel
        #[arg(long)]
        novel: Option<String>,
    },
    /// Run a ranked query as of a chapter
    Query {
        kind: QueryKind,
        novel: String,
        chapter: u32,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show ledger state for a novel
    States {
        novel: String,
        /// Show one character's current state and history
        #[arg(long)]
        character: Option<String>,
    },
    /// Delete a chapter's facts, rolling ledgers back if it is the latest
    Rollback { novel: String, chapter: u32 },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKind {
    Events,
    Foreshadowing,
    Plotlines,
    Rhythm,
    ConflictArcs,
    CharacterArcs,
    Perspective,
    WorldRules,
    Quests,
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn open_store(config_path: Option<PathBuf>, db: Option<PathBuf>) -> Result<NarrativeStore, String> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(db) = db {
        config.storage.path = Some(db);
    }
    if let Some(parent) = config.storage.resolved_path().parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let (backend, _) = connect_backend(&config.storage);
    Ok(NarrativeStore::new(backend))
}

fn cmd_stats(store: &NarrativeStore, novel: Option<&str>) -> i32 {
    let stats = store.stats(novel);
    println!("backend:           {}", store.backend_kind());
    println!("entities:          {}", stats.entities);
    for (kind, count) in &stats.entities_by_kind {
        println!("  {:<16} {}", kind, count);
    }
    println!("relations:         {}", stats.relations);
    println!("ledger records:    {}", stats.ledger_records);
    println!("history snapshots: {}", stats.history_snapshots);
    0
}

fn cmd_query(store: &NarrativeStore, kind: QueryKind, novel: &str, chapter: u32, limit: usize) -> i32 {
    match kind {
        QueryKind::Events => print_json(&store.relevant_events(novel, chapter, limit)),
        QueryKind::Foreshadowing => print_json(&store.unresolved_foreshadowing(novel, chapter, limit)),
        QueryKind::Plotlines => print_json(&store.plotline_status(novel, chapter, limit)),
        QueryKind::Rhythm => print_json(&store.narrative_rhythm(novel, chapter, limit)),
        QueryKind::ConflictArcs => print_json(&store.active_conflict_arcs(novel, chapter, limit)),
        QueryKind::CharacterArcs => print_json(&store.active_character_arcs(novel, chapter, limit)),
        QueryKind::Perspective => print_json(&store.perspective_history(novel, chapter, limit)),
        QueryKind::WorldRules => print_json(&store.world_rules(novel, chapter, limit)),
        QueryKind::Quests => print_json(&store.open_quests(novel)),
    }
}

fn cmd_states(store: &NarrativeStore, novel: &str, character: Option<&str>) -> i32 {
    match character {
        Some(name) => match store.character_state(novel, name) {
            Some(current) => print_json(&serde_json::json!({
                "current": current,
                "history": store.character_history(novel, name),
            })),
            None => {
                eprintln!("Error: no state for '{}' in novel '{}'", name, novel);
                1
            }
        },
        None => print_json(&serde_json::json!({
            "characters": store.character_states(novel),
            "relationships": store.relationship_states(novel),
        })),
    }
}

fn cmd_rollback(store: &NarrativeStore, novel: &str, chapter: u32) -> i32 {
    match store.delete_chapter(novel, chapter) {
        Ok(report) if report.skipped => {
            println!(
                "Chapter {} is historical (latest is {}); ledgers left unchanged",
                chapter,
                report.max_chapter.map_or_else(|| "-".to_string(), |c| c.to_string())
            );
            0
        }
        Ok(report) => {
            println!(
                "Rolled back chapter {}: {} restored, {} removed, {} entities and {} relations deleted",
                chapter, report.restored, report.removed, report.entities_deleted, report.relations_deleted
            );
            if report.foreshadows_deleted > 0 {
                println!("{} foreshadowing entries resolved in the chapter deleted", report.foreshadows_deleted);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_env("NOVELGRAPH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match open_store(cli.config, cli.db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Stats { novel } => cmd_stats(&store, novel.as_deref()),
        Commands::Query {
            kind,
            novel,
            chapter,
            limit,
        } => cmd_query(&store, kind, &novel, chapter, limit),
        Commands::States { novel, character } => cmd_states(&store, &novel, character.as_deref()),
        Commands::Rollback { novel, chapter } => cmd_rollback(&store, &novel, chapter),
    };
    std::process::exit(code);
}
