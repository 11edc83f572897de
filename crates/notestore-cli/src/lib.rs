//! `notestore` command line: report and migrate the notes store.

#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use notestore_core::{MigrationError, StoreConfig};
use notestore_migrate::{
    MigrationReport, Migrator, Store, StoreSnapshot, fingerprint_of, prepare_store,
};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl CliError {
    /// Stable code printed next to the message.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Migration(err) => err.error_code(),
            _ => "CLI_ERROR",
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "notestore", version, about = "Inspect and migrate the notes store")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Directory holding the store (overrides NOTESTORE_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Model name / store file stem (overrides NOTESTORE_MODEL_NAME).
    #[arg(long, global = true)]
    pub model_name: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered schema versions.
    Versions,
    /// Show the store's recorded version and whether it needs migrating.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Bring the store to the latest schema version.
    Migrate,
    /// Record counts per entity under the store's current version.
    Inspect,
}

/// Entry point used by the binary. Returns the process exit code.
pub fn run() -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    match execute(cli, &mut stdout.lock()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error [{}]: {err}", err.code());
            1
        }
    }
}

fn store_config(global: &GlobalArgs) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(dir) = &global.data_dir {
        config.data_dir.clone_from(dir);
    }
    if let Some(name) = &global.model_name {
        config.model_name.clone_from(name);
    }
    config
}

pub fn execute(cli: Cli, out: &mut dyn Write) -> CliResult<()> {
    let config = store_config(&cli.global);
    let migrator = Migrator::notes()?;
    match cli.command {
        Commands::Versions => handle_versions(&migrator, out),
        Commands::Status { json } => handle_status(&config, &migrator, json, out),
        Commands::Migrate => handle_migrate(&config, &migrator, out),
        Commands::Inspect => handle_inspect(&config, &migrator, out),
    }
}

fn handle_versions(migrator: &Migrator, out: &mut dyn Write) -> CliResult<()> {
    let latest = migrator.registry().latest()?;
    for version in migrator.registry().versions() {
        let marker = if version == latest { "  (latest)" } else { "" };
        writeln!(
            out,
            "v{}  {}  {}{marker}",
            version.version(),
            version.fingerprint(),
            version.name()
        )?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    store: PathBuf,
    exists: bool,
    fingerprint: Option<String>,
    version: Option<u32>,
    latest: u32,
    needs_migration: bool,
    migrations_enabled: bool,
}

fn handle_status(
    config: &StoreConfig,
    migrator: &Migrator,
    json: bool,
    out: &mut dyn Write,
) -> CliResult<()> {
    let store = Store::at(config.store_path());
    let fingerprint = fingerprint_of(&store)?;
    let report = StatusReport {
        store: store.path().to_path_buf(),
        exists: fingerprint.is_some(),
        version: migrator.current_version(&store)?.map(|v| v.version()),
        fingerprint: fingerprint.map(|fp| fp.to_string()),
        latest: migrator.registry().latest()?.version(),
        needs_migration: migrator.needs_migration(&store)?,
        migrations_enabled: config.migrations_enabled,
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "store:       {}", report.store.display())?;
    match (&report.fingerprint, report.version) {
        (None, _) => writeln!(out, "version:     none (store not created yet)")?,
        (Some(fp), Some(version)) => writeln!(out, "version:     v{version} ({fp})")?,
        (Some(fp), None) => writeln!(out, "version:     unrecognized ({fp})")?,
    }
    writeln!(out, "latest:      v{}", report.latest)?;
    writeln!(
        out,
        "migration:   {}",
        if report.needs_migration { "needed" } else { "not needed" }
    )?;
    Ok(())
}

fn handle_migrate(config: &StoreConfig, migrator: &Migrator, out: &mut dyn Write) -> CliResult<()> {
    let prepared = prepare_store(config, migrator)?;
    print_report(&prepared.store, &prepared.report, out)
}

fn print_report(store: &Store, report: &MigrationReport, out: &mut dyn Write) -> CliResult<()> {
    for run in &report.runs {
        writeln!(
            out,
            "v{} -> v{} ({}): {} records read, {} written in {} ms",
            run.source_version,
            run.destination_version,
            run.plan,
            run.records_read,
            run.records_written,
            run.elapsed_ms
        )?;
    }
    match (report.start, report.is_noop()) {
        (None, _) => writeln!(
            out,
            "{}: no recognized store; nothing to migrate",
            store.path().display()
        )?,
        (Some(_), true) => writeln!(
            out,
            "{}: already at v{}",
            store.path().display(),
            report.end
        )?,
        (Some(start), false) => writeln!(
            out,
            "{}: migrated v{start} -> v{}",
            store.path().display(),
            report.end
        )?,
    }
    Ok(())
}

fn handle_inspect(config: &StoreConfig, migrator: &Migrator, out: &mut dyn Write) -> CliResult<()> {
    let store = Store::at(config.store_path());
    let Some(version) = migrator.current_version(&store)? else {
        return Err(CliError::Other(format!(
            "{} is missing or matches no registered schema version",
            store.path().display()
        )));
    };
    let snapshot = StoreSnapshot::open(store.path(), version.model())?;
    writeln!(out, "{} at {version}", store.path().display())?;
    for (entity, count) in snapshot.entity_counts() {
        writeln!(out, "  {entity:<16} {count}")?;
    }
    writeln!(out, "  {:<16} {}", "total", snapshot.record_count())?;
    Ok(())
}
