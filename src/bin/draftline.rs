//! Draftline CLI
//!
//! Analyze manuscript files and manage saved engine snapshots.

use clap::{Parser, Subcommand};
use draftline::{
    AnalysisPipeline, ChunkAnalyzer, ChunkId, ChunkStatus, EngineConfig, IncrementalManager,
    OpenStore, SqliteStateStore, StateStore, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "draftline",
    version,
    about = "Incremental analysis for long manuscripts"
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze chapter files and print the book summary
    Analyze {
        /// Chapter files, in reading order; the file stem is the chapter id
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Save the resulting state under this snapshot name
        #[arg(long)]
        save: Option<String>,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// Path to a YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Manage saved snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
        /// Path to SQLite database file
        #[arg(long, global = true)]
        db: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    Config {
        /// Path to a YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List saved snapshots
    List,
    /// Print the stats and chapter summaries of a snapshot
    Show {
        #[arg(required = true)]
        name: String,
    },
    /// Delete a snapshot
    Delete {
        #[arg(required = true)]
        name: String,
    },
}

/// Get the default database path (~/.local/share/draftline/draftline.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("draftline").join("draftline.db")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStateStore, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteStateStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn build_manager(config: &EngineConfig, analyzer: Arc<dyn ChunkAnalyzer>) -> IncrementalManager {
    IncrementalManager::new(analyzer)
        .with_config(config.manager.clone())
        .with_policy(config.policy.clone())
}

fn builtin_analyzer() -> Arc<dyn ChunkAnalyzer> {
    Arc::new(AnalysisPipeline::with_builtin_analyzers())
}

/// Fan whole-chapter analyses out over the worker pool, then let the
/// manager work through the remaining scenes.
fn run_analysis(
    manager: &mut IncrementalManager,
    analyzer: Arc<dyn ChunkAnalyzer>,
    config: &EngineConfig,
) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    let pool = WorkerPool::new(analyzer, config.pool.clone());
    let applied = runtime.block_on(async {
        pool.init();
        let applied = manager.analyze_chapters_with(&pool).await;
        pool.shutdown();
        applied
    });
    tracing::debug!(applied, workers = config.pool.workers, "chapter pass done");
    manager.process_all_dirty();
    Ok(())
}

fn chapter_id(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().to_string())
}

fn print_chapters(manager: &IncrementalManager) {
    let analyses = manager.get_all_chapter_analyses();
    println!(
        "{:<24}  {:>7}  {:>6}  {:>7}  {:<8}",
        "CHAPTER", "WORDS", "SCENES", "TENSION", "STATUS"
    );
    println!("{}", "-".repeat(60));
    for (id, analysis) in &analyses {
        let chunk = manager.get_chunk(&ChunkId::chapter(id));
        let scenes = chunk.map(|c| c.child_ids.len()).unwrap_or(0);
        let status = chunk.map(|c| format!("{:?}", c.status)).unwrap_or_default();
        println!(
            "{:<24}  {:>7}  {:>6}  {:>7.2}  {:<8}",
            id, analysis.word_count, scenes, analysis.tension, status
        );
    }
}

fn print_book_summary(manager: &IncrementalManager) {
    let Some(summary) = manager.get_book_summary() else {
        println!("No book summary: some chapters are not fresh.");
        return;
    };
    println!();
    println!("Words:               {}", summary.total_word_count);
    println!("Dialogue ratio:      {:.2}", summary.avg_dialogue_ratio);
    println!("Tension:             {:.2}", summary.avg_tension);
    println!("Entities:            {}", summary.entity_names.len());
    println!("Locations:           {}", summary.location_names.len());
    println!("Unresolved promises: {}", summary.unresolved_promises.len());
    for hotspot in summary.risk_hotspots.iter().take(5) {
        println!(
            "  hotspot {:>5.2}  {} [{}..{}] {}",
            hotspot.score, hotspot.chunk_id, hotspot.start, hotspot.end, hotspot.reason
        );
    }
}

fn cmd_analyze(
    files: &[PathBuf],
    save: Option<&str>,
    db: Option<PathBuf>,
    config: Option<&Path>,
) -> i32 {
    let config = match load_config(config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let analyzer = builtin_analyzer();
    let mut manager = build_manager(&config, Arc::clone(&analyzer));

    for path in files {
        let Some(id) = chapter_id(path) else {
            eprintln!("Error: cannot derive a chapter id from '{}'", path.display());
            return 1;
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Error: cannot read '{}': {}", path.display(), e);
                return 1;
            }
        };
        manager.register_chapter(&id, &text);
    }
    if let Err(e) = run_analysis(&mut manager, analyzer, &config) {
        eprintln!("Error: {}", e);
        return 1;
    }

    print_chapters(&manager);
    print_book_summary(&manager);

    let errored: Vec<_> = manager
        .tree()
        .chunks()
        .filter(|c| c.status == ChunkStatus::Error)
        .collect();
    for chunk in &errored {
        eprintln!(
            "Warning: {} failed: {}",
            chunk.id,
            chunk.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(name) = save {
        let store = match open_store(db) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        match store.save_snapshot(name, &manager.export_state()) {
            Ok(info) => println!("\nSaved snapshot '{}' ({} bytes)", info.name, info.bytes),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }

    if errored.is_empty() {
        0
    } else {
        2
    }
}

fn cmd_snapshot_list(store: &dyn StateStore) -> i32 {
    let snapshots = match store.list_snapshots() {
        Ok(snapshots) => snapshots,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if snapshots.is_empty() {
        println!("No snapshots saved.");
        return 0;
    }
    println!(
        "{:<24}  {:<25}  {:>8}  {:>6}  {:>10}",
        "NAME", "SAVED", "CHAPTERS", "CHUNKS", "BYTES"
    );
    println!("{}", "-".repeat(81));
    for info in snapshots {
        println!(
            "{:<24}  {:<25}  {:>8}  {:>6}  {:>10}",
            info.name,
            info.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
            info.chapter_count,
            info.chunk_count,
            info.bytes
        );
    }
    0
}

fn cmd_snapshot_show(store: &dyn StateStore, name: &str) -> i32 {
    let snapshot = match store.load_snapshot(name) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            eprintln!("Error: snapshot '{}' not found", name);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut manager = build_manager(&EngineConfig::default(), builtin_analyzer());
    manager.load_state(snapshot);
    manager.pause();

    match serde_json::to_string_pretty(&manager.get_stats()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    }
    println!();
    print_chapters(&manager);
    print_book_summary(&manager);
    0
}

fn cmd_snapshot_delete(store: &dyn StateStore, name: &str) -> i32 {
    match store.delete_snapshot(name) {
        Ok(true) => {
            println!("Deleted snapshot '{}'", name);
            0
        }
        Ok(false) => {
            eprintln!("Error: snapshot '{}' not found", name);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_config(config: Option<&Path>) -> i32 {
    let yaml = load_config(config).and_then(|c| c.to_yaml().map_err(|e| e.to_string()));
    match yaml {
        Ok(yaml) => {
            print!("{}", yaml);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let code = match cli.command {
        Commands::Analyze {
            files,
            save,
            db,
            config,
        } => cmd_analyze(&files, save.as_deref(), db, config.as_deref()),
        Commands::Snapshot { action, db } => {
            let store = match open_store(db) {
                Ok(store) => store,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            match action {
                SnapshotAction::List => cmd_snapshot_list(&store),
                SnapshotAction::Show { name } => cmd_snapshot_show(&store, &name),
                SnapshotAction::Delete { name } => cmd_snapshot_delete(&store, &name),
            }
        }
        Commands::Config { config } => cmd_config(config.as_deref()),
    };
    std::process::exit(code);
}
