//! Plunger - structured log sink.
//!
//! Command-line front end over the SQLite store:
//! - `write` stores JSON events given as arguments or read from stdin
//! - `query` prints matching events as JSON lines
//! - `register` and `schema` manage the attribute name registry
//! - `log` routes `tracing` records through the sink as a demonstration

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use plunger::{FieldValue, JsonLineSink, PlungerConfig, QueryFilter, SqliteEventStore};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Plunger - structured log sink backed by SQLite
#[derive(Parser, Debug)]
#[command(name = "plunger")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the database path from config
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Run in verbose mode (debug logging)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write events given as JSON objects, or JSON lines from stdin
    Write {
        /// Event as a JSON object; repeatable
        #[arg(short, long, value_name = "JSON")]
        event: Vec<String>,
    },

    /// Print matching events as JSON lines
    Query {
        #[arg(long)]
        level: Option<String>,

        #[arg(long)]
        session: Option<String>,

        /// Inclusive lower bound (RFC 3339)
        #[arg(long, value_name = "TIME")]
        from: Option<DateTime<Utc>>,

        /// Inclusive upper bound (RFC 3339)
        #[arg(long, value_name = "TIME")]
        to: Option<DateTime<Utc>>,

        /// Only return these attributes; repeatable
        #[arg(long = "select", value_name = "NAME")]
        select: Vec<String>,

        /// Require an attribute value, e.g. `user="ada"` or `retries=3`; repeatable
        #[arg(long = "filter", value_name = "NAME=JSON", value_parser = parse_value_filter)]
        filter: Vec<(String, FieldValue)>,
    },

    /// Promote attribute names into the registry
    Register {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the attribute name registry
    Schema,

    /// Emit a few sample `tracing` records into the store
    Log,
}

/// Parse `NAME=VALUE`, reading VALUE as JSON and falling back to a string.
fn parse_value_filter(raw: &str) -> Result<(String, FieldValue), String> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(format!("expected NAME=VALUE, got '{raw}'"));
    };
    if name.is_empty() {
        return Err(format!("missing attribute name in '{raw}'"));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map_or_else(|_| FieldValue::from(value), FieldValue::from);
    Ok((name.to_string(), value))
}

/// Load configuration from the given path or default locations.
///
/// A missing file at a default location is not an error; defaults apply.
fn load_config(path: Option<PathBuf>) -> Result<PlungerConfig> {
    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        return Ok(PlungerConfig::load(&path)?);
    }

    let local = PathBuf::from("plunger.toml");
    let candidate = if local.exists() {
        Some(local)
    } else {
        directories::ProjectDirs::from("com", "go-go-golems", "plunger")
            .map(|dirs| dirs.config_dir().join("plunger.toml"))
            .filter(|path| path.exists())
    };

    match candidate {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Ok(PlungerConfig::load(&path)?)
        }
        None => {
            info!("No configuration file found, using defaults");
            Ok(PlungerConfig::default())
        }
    }
}

fn console_filter(verbose: bool) -> EnvFilter {
    let log_level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

fn run_write(store: &SqliteEventStore, events: &[String]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    if events.is_empty() {
        for (number, line) in std::io::stdin().lock().lines().enumerate() {
            let line = line.context("Failed to read stdin")?;
            if line.trim().is_empty() {
                continue;
            }
            let event = store
                .write_json(line.as_bytes())
                .with_context(|| format!("Failed to write event on line {}", number + 1))?;
            writeln!(stdout, "{}", event.id)?;
        }
    } else {
        for raw in events {
            let event = store
                .write_json(raw.as_bytes())
                .with_context(|| format!("Failed to write event {raw}"))?;
            writeln!(stdout, "{}", event.id)?;
        }
    }
    Ok(())
}

fn run_query(store: &SqliteEventStore, filter: &QueryFilter) -> Result<()> {
    let events = store.query(filter).context("Query failed")?;
    let mut stdout = std::io::stdout().lock();
    for event in &events {
        serde_json::to_writer(&mut stdout, event)?;
        writeln!(stdout)?;
    }
    info!("{} event(s) matched", events.len());
    Ok(())
}

fn run_log(store: SqliteEventStore, config: &PlungerConfig, verbose: bool) -> Result<()> {
    let store = Arc::new(store);
    let sink_filter = JsonLineSink::<SqliteEventStore>::internal_filter()
        .with_default(config.level_filter());
    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter(verbose)),
        )
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .without_time()
                .with_writer(JsonLineSink::new(Arc::clone(&store)))
                .with_filter(sink_filter),
        );

    let before = store.count()?;
    tracing::subscriber::with_default(subscriber, || {
        tracing::debug!(session = "demo", step = 0, "starting demo");
        tracing::info!(session = "demo", user = "ada", "signed in");
        tracing::warn!(session = "demo", attempts = 3, latency_ms = 12.5, "retrying upstream");
        tracing::error!(session = "demo", code = 503, "upstream unavailable");
    });

    let recorded = store.count()?.saturating_sub(before);
    println!("Stored {recorded} demo record(s) at level {} and above", config.sink.log_level);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Console output goes to stderr so query results stay machine readable.
    // The `log` command overrides this with a scoped subscriber.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter(args.verbose)),
        )
        .init();

    let mut config = load_config(args.config).context("Failed to load configuration")?;
    if let Some(db) = args.db {
        config.sink.db_path = db;
    }

    let store = SqliteEventStore::open_with_schema(&config.sink.db_path, &config.schema.names)
        .with_context(|| format!("Failed to open store at {}", config.sink.db_path.display()))?;

    match args.command {
        Command::Write { event } => run_write(&store, &event)?,
        Command::Query {
            level,
            session,
            from,
            to,
            select,
            filter,
        } => {
            let mut query = QueryFilter::new()
                .with_selected_names(select)
                .with_value_filters(filter);
            query.level = level;
            query.session = session;
            query.from = from;
            query.to = to;
            run_query(&store, &query)?;
        }
        Command::Register { names } => {
            for entry in store.register(&names).context("Failed to register names")? {
                println!("{} {}", entry.id, entry.name);
            }
        }
        Command::Schema => {
            for entry in store.attribute_names()? {
                println!("{} {}", entry.id, entry.name);
            }
        }
        Command::Log => run_log(store, &config, args.verbose)?,
    }

    Ok(())
}
