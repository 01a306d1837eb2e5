use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use librarian_core::{AppConfig, Candidate, Database, ExitCode, Record, RecordFilter};
use librarian_dedup::{Decision, DedupError, IngestOptions, Ingestor, build_engine};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "librarian",
    about = "Duplicate-aware catalogue of books and papers",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting LIBRARIAN_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a batch of records from a JSON file ("-" reads stdin).
    Ingest {
        file: String,
        /// Contributor name stored on every accepted record.
        #[arg(long, default_value = "cli")]
        by: String,
        /// Skip fuzzy and semantic checks (unique id and title checks still apply).
        #[arg(long)]
        force: bool,
    },

    /// Dry-run the duplicate check for one record.
    Check {
        title: Option<String>,
        #[arg(long, action = clap::ArgAction::Append)]
        author: Vec<String>,
        #[arg(long)]
        unique_id: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },

    /// List the most recently added records.
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Only records filed under this search topic.
        #[arg(long)]
        topic: Option<String>,
    },

    /// Semantic search over stored records.
    Search {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show store statistics.
    Stats,

    /// Delete records in bulk.
    Delete {
        /// Delete every record.
        #[arg(long, conflicts_with = "collector")]
        all: bool,
        /// Delete records added by this contributor.
        #[arg(long)]
        collector: Option<String>,
        #[arg(long)]
        confirm: bool,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information.
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all config values.
    List,
    /// Print the config file path.
    Path,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let start = Instant::now();
    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("LIBRARIAN_JSON").as_deref() == Ok("1");

    let config = AppConfig::load()?;
    tracing::debug!(path = %AppConfig::config_path().display(), "config loaded");

    match cli.command {
        // ── Ingest ─────────────────────────────────────────────────────────

        Commands::Ingest { file, by, force } => {
            let raw = read_input(&file)?;
            let submission: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    fail(json_output, "invalid_json", &format!("{file}: {e}"), ExitCode::InvalidArgs);
                }
            };

            let db = open_db(&config)?;
            let ingestor = Ingestor::new(build_engine(&config, db)?);
            let report = match ingestor
                .ingest_value(submission, &by, IngestOptions { force })
                .await
            {
                Ok(report) => report,
                Err(DedupError::InvalidSubmission(msg)) => {
                    fail(json_output, "invalid_submission", &msg, ExitCode::InvalidArgs);
                }
                Err(e) => return Err(e.into()),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                let mut value = serde_json::to_value(&report)?;
                value["meta"] = serde_json::json!({ "duration_ms": dur });
                print_json(&value)?;
            } else {
                println!("{}", report.message());
            }

            if report.is_conflict() {
                std::process::exit(ExitCode::Conflict.code());
            }
        }

        // ── Check ──────────────────────────────────────────────────────────

        Commands::Check { title, author, unique_id, source } => {
            let mut candidate = Candidate::new(title.unwrap_or_default(), "cli").with_authors(author);
            if let Some(s) = source {
                candidate = candidate.with_source(s);
            }
            if let Some(id) = unique_id {
                candidate = candidate.with_unique_id(id);
            }
            if !candidate.is_valid() {
                fail(json_output, "invalid_args", "give a title or --unique-id", ExitCode::InvalidArgs);
            }

            let db = open_db(&config)?;
            let engine = build_engine(&config, db)?;
            let decision = engine.check(&candidate).await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":decision,"meta":{"duration_ms":dur}}))?;
            } else {
                match &decision {
                    Decision::Accept => println!("ACCEPT  no duplicate found for \"{}\"", candidate.title),
                    Decision::Reject { existing, reason } => {
                        println!("REJECT  duplicate of {} ({reason:?})", existing.label());
                    }
                    Decision::Escalate { suspect, explanation } => {
                        println!(
                            "ESCALATE  similar to {} (ratio {:.2}): {explanation}",
                            suspect.record.label(),
                            suspect.score
                        );
                    }
                }
            }
        }

        // ── List ───────────────────────────────────────────────────────────

        Commands::List { limit, topic } => {
            let db = open_db(&config)?;
            let records = match &topic {
                Some(topic) => db.list_by_topic(topic, limit)?,
                None => db.list_recent(limit)?,
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                let total = db.count_records()?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": records, "total": total, "limit": limit, "topic": topic },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if records.is_empty() {
                match &topic {
                    Some(topic) => println!("No records under topic '{topic}'."),
                    None => println!("No records yet. Use `librarian ingest` to add some."),
                }
            } else {
                for record in &records {
                    print_record_line(record);
                }
            }
        }

        // ── Search ─────────────────────────────────────────────────────────

        Commands::Search { query, limit } => {
            let db = open_db(&config)?;
            let engine = build_engine(&config, db)?;
            let hits = engine.search_similar(&query, limit).await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                let items: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|(record, score)| serde_json::json!({"record": record, "score": score}))
                    .collect();
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": items, "total": items.len(), "query": query },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if hits.is_empty() {
                println!("No results for: {query}");
            } else {
                println!("Found {} results:", hits.len());
                for (record, score) in &hits {
                    println!("  {score:.3}  {}", record.label());
                }
            }
        }

        // ── Stats ──────────────────────────────────────────────────────────

        Commands::Stats => {
            let db = open_db(&config)?;
            let stats = db.stats()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":stats,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Store statistics:");
                println!("  Total records:   {}", stats.total);
                println!("  With embedding:  {}", stats.with_embedding);
                print_counts("By contributor", &stats.by_contributor);
                print_counts("By type", &stats.by_type);
                print_counts("Top topics", &stats.top_topics);
            }
        }

        // ── Delete ─────────────────────────────────────────────────────────

        Commands::Delete { all, collector, confirm } => {
            let filter = match (all, collector) {
                (true, _) => RecordFilter::All,
                (false, Some(name)) => RecordFilter::AddedBy(name),
                (false, None) => {
                    fail(json_output, "invalid_args", "use --all or --collector <name>", ExitCode::InvalidArgs);
                }
            };
            if !confirm {
                eprintln!("Add --confirm to delete without prompt.");
                std::process::exit(ExitCode::ConfirmRequired.code());
            }

            let db = open_db(&config)?;
            let deleted = db.delete_by(&filter)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":{"deleted":deleted},"meta":{"duration_ms":dur}}))?;
            } else {
                match filter {
                    RecordFilter::All => println!("Deleted all {deleted} records."),
                    RecordFilter::AddedBy(name) => println!("Deleted {deleted} records added by '{name}'."),
                }
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => {
            let dur = start.elapsed().as_millis();
            match action {
                ConfigAction::List => {
                    let kv = config.key_values();
                    if json_output {
                        let data: serde_json::Map<String, serde_json::Value> = kv
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                            .collect();
                        print_json(&serde_json::json!({"status":"ok","data":data,"meta":{"duration_ms":dur}}))?;
                    } else {
                        for (k, v) in &kv {
                            println!("{k} = {v}");
                        }
                    }
                }
                ConfigAction::Path => {
                    let path = AppConfig::config_path();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status":"ok",
                            "data":{"path":path.display().to_string(),"exists":path.exists()},
                            "meta":{"duration_ms":dur}
                        }))?;
                    } else {
                        println!("{}", path.display());
                    }
                }
            }
        }

        // ── Version ────────────────────────────────────────────────────────

        Commands::Version => {
            let version = env!("CARGO_PKG_VERSION");
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":{"version":version},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("librarian v{version}");
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

/// Report a user-facing error and exit.
fn fail(json_output: bool, kind: &str, message: &str, code: ExitCode) -> ! {
    if json_output {
        let body = serde_json::json!({"status":"error","error":kind,"message":message});
        println!("{body:#}");
    } else {
        eprintln!("{message}");
    }
    std::process::exit(code.code());
}

fn open_db(config: &AppConfig) -> Result<Arc<Database>> {
    let db_path = config.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;
    tracing::debug!(path = ?db.path(), "database opened");
    Ok(Arc::new(db))
}

fn read_input(file: &str) -> Result<String> {
    let mut raw = String::new();
    if file == "-" {
        std::io::stdin().read_to_string(&mut raw)?;
    } else {
        raw = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    }
    Ok(raw)
}

fn print_record_line(record: &Record) {
    let authors = record.authors.join(", ");
    let year = record.year.map(|y| y.to_string()).unwrap_or_default();
    println!(
        "{id}  {title:<40}  {authors:<25}  {year:<4}  {by}",
        id = &record.id.to_string()[..8],
        title = record.title,
        by = record.added_by,
    );
}

fn print_counts(label: &str, counts: &[(String, usize)]) {
    if counts.is_empty() {
        return;
    }
    println!("  {label}:");
    for (name, count) in counts {
        println!("    {name:<24} {count}");
    }
}
