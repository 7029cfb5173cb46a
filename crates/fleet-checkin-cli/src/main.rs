// crates/fleet-checkin-cli/src/main.rs
// ============================================================================
// Module: Fleet Check-in CLI Entry Point
// Description: Command dispatcher for the fleet check-in ledger.
// Purpose: Expose cluster, query, version, and config operations as commands.
// Dependencies: clap, fleet-checkin-config, fleet-checkin-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The `fleet-checkin` binary loads configuration once, opens the configured
//! store, runs one command, and prints its result as JSON on stdout. Client
//! errors (bad input, impossible filters, oversized payloads) exit with
//! status 2; store and I/O failures exit with status 1.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use fleet_checkin_config::ConfigError;
use fleet_checkin_config::FleetCheckinConfig;
use fleet_checkin_config::StoreType;
use fleet_checkin_core::CheckinStore;
use fleet_checkin_core::ClusterAgeFilter;
use fleet_checkin_core::ClusterCheckinsFilter;
use fleet_checkin_core::ClusterId;
use fleet_checkin_core::FilterError;
use fleet_checkin_core::FilterKey;
use fleet_checkin_core::InMemoryCheckinStore;
use fleet_checkin_core::PersistentClustersFilter;
use fleet_checkin_core::StoreError;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::TrainKey;
use fleet_checkin_core::VersionKey;
use fleet_checkin_core::VersionStore;
use fleet_checkin_core::VersionSubmission;
use fleet_checkin_core::parse_field;
use fleet_checkin_store_sqlite::SqliteCheckinStore;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit status for rejected input.
const EXIT_CLIENT_ERROR: u8 = 2;
/// Exit status for store and I/O failures.
const EXIT_SERVER_ERROR: u8 = 1;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "fleet-checkin", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (overrides `FLEET_CHECKIN_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster ledger operations.
    Cluster {
        /// Selected cluster subcommand.
        #[command(subcommand)]
        command: ClusterCommand,
    },
    /// Time-window cluster queries.
    Query {
        /// Selected query subcommand.
        #[command(subcommand)]
        command: QueryCommand,
    },
    /// Component version catalog operations.
    Version {
        /// Selected version subcommand.
        #[command(subcommand)]
        command: VersionCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Cluster subcommands.
#[derive(Subcommand, Debug)]
enum ClusterCommand {
    /// Record a check-in now and create or replace the cluster record.
    Upsert(ClusterPayloadArgs),
    /// Append a check-in at an explicit instant.
    Checkin(ClusterCheckinArgs),
    /// Show a cluster record.
    Get(ClusterIdArgs),
    /// List a cluster's check-ins in chronological order.
    Checkins(ClusterIdArgs),
}

/// Cluster identifier argument.
#[derive(Args, Debug)]
struct ClusterIdArgs {
    /// Cluster identifier.
    cluster_id: String,
}

/// Cluster identifier with a payload.
#[derive(Args, Debug)]
struct ClusterPayloadArgs {
    /// Cluster identifier.
    cluster_id: String,
    /// JSON payload.
    #[arg(long, value_parser = parse_payload, default_value = "{}")]
    payload: Value,
}

/// Explicit check-in arguments.
#[derive(Args, Debug)]
struct ClusterCheckinArgs {
    /// Cluster identifier.
    cluster_id: String,
    /// RFC3339 check-in instant (defaults to now).
    #[arg(long)]
    at: Option<String>,
    /// JSON payload.
    #[arg(long, value_parser = parse_payload, default_value = "{}")]
    payload: Value,
}

/// Query subcommands.
#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Clusters by first and last check-in windows.
    Age(AgeQueryArgs),
    /// Clusters by first check-in window.
    Checkins(CheckinsQueryArgs),
    /// Clusters checking in repeatedly and recently.
    Persistent(PersistentQueryArgs),
}

/// Cluster age query bounds (RFC3339).
#[derive(Args, Debug)]
struct AgeQueryArgs {
    /// Latest check-in strictly before this instant.
    #[arg(long)]
    checked_in_before: Option<String>,
    /// First check-in strictly after this instant.
    #[arg(long)]
    checked_in_after: Option<String>,
    /// First check-in strictly before this instant.
    #[arg(long)]
    created_before: Option<String>,
    /// First check-in strictly after this instant.
    #[arg(long)]
    created_after: Option<String>,
}

/// Cluster checkins query bounds (RFC3339).
#[derive(Args, Debug)]
struct CheckinsQueryArgs {
    /// First check-in strictly after this instant.
    #[arg(long)]
    created_after: Option<String>,
    /// First check-in strictly before this instant.
    #[arg(long)]
    created_before: Option<String>,
}

/// Persistent clusters query bounds (RFC3339).
#[derive(Args, Debug)]
struct PersistentQueryArgs {
    /// First check-in strictly after this instant.
    #[arg(long)]
    epoch: Option<String>,
    /// First check-in strictly before this instant; also anchors "recent".
    #[arg(long)]
    timestamp: Option<String>,
}

/// Version subcommands.
#[derive(Subcommand, Debug)]
enum VersionCommand {
    /// Create or replace a version.
    Upsert(VersionUpsertArgs),
    /// Show one version.
    Get(VersionKeyArgs),
    /// Show the latest version of a train.
    Latest(TrainArgs),
    /// Show the latest version of each `component/train` pair.
    LatestBatch(LatestBatchArgs),
}

/// Version upsert arguments.
#[derive(Args, Debug)]
struct VersionUpsertArgs {
    /// Component name.
    component: String,
    /// Release train.
    train: String,
    /// Version string.
    version: String,
    /// RFC3339 release instant.
    #[arg(long)]
    released_at: String,
    /// JSON payload.
    #[arg(long, value_parser = parse_payload, default_value = "null")]
    payload: Value,
}

/// Version natural key.
#[derive(Args, Debug)]
struct VersionKeyArgs {
    /// Component name.
    component: String,
    /// Release train.
    train: String,
    /// Version string.
    version: String,
}

/// Train selector.
#[derive(Args, Debug)]
struct TrainArgs {
    /// Component name.
    component: String,
    /// Release train.
    train: String,
}

/// Batch of trains.
#[derive(Args, Debug)]
struct LatestBatchArgs {
    /// `component/train` pairs.
    #[arg(value_parser = parse_train_key, required = true)]
    pairs: Vec<TrainKey>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and probe the store.
    Check,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures, classified by exit status.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration could not be loaded.
    #[error("config load failed: {0}")]
    Config(#[from] ConfigError),
    /// Filter bounds were missing, malformed, or contradictory.
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
    /// Store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// Writing output failed.
    #[error("failed to write {stream}: {error}")]
    Output {
        /// Stream name.
        stream: &'static str,
        /// I/O error text.
        error: String,
    },
}

impl CliError {
    /// Returns true when the failure was caused by the caller's input.
    const fn is_client_error(&self) -> bool {
        match self {
            Self::Config(ConfigError::Io(_)) | Self::Output { .. } => false,
            Self::Config(_) | Self::Filter(_) => true,
            Self::Store(error) => error.is_client_error(),
        }
    }

    /// Returns the process exit status for this failure.
    fn exit_code(&self) -> ExitCode {
        if self.is_client_error() {
            ExitCode::from(EXIT_CLIENT_ERROR)
        } else {
            ExitCode::from(EXIT_SERVER_ERROR)
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Store Backend
// ============================================================================

/// Store selected by configuration.
enum StoreBackend {
    /// Process-local store.
    Memory(InMemoryCheckinStore),
    /// Durable `SQLite` store.
    Sqlite(SqliteCheckinStore),
}

impl StoreBackend {
    /// Opens the configured store with its audit sink.
    fn open(config: &FleetCheckinConfig) -> CliResult<Self> {
        let audit = config.audit.build_sink()?;
        match config.store.store_type {
            StoreType::Memory => Ok(Self::Memory(
                InMemoryCheckinStore::new()
                    .with_max_payload_bytes(config.store.max_payload_bytes)
                    .with_audit_sink(audit),
            )),
            StoreType::Sqlite => {
                let store = SqliteCheckinStore::new(config.store.sqlite_config()?)
                    .map_err(StoreError::from)?;
                Ok(Self::Sqlite(store.with_audit_sink(audit)))
            }
        }
    }

    /// Returns the check-in ledger.
    fn checkins(&self) -> &dyn CheckinStore {
        match self {
            Self::Memory(store) => store,
            Self::Sqlite(store) => store,
        }
    }

    /// Returns the version catalog.
    fn versions(&self) -> &dyn VersionStore {
        match self {
            Self::Memory(store) => store,
            Self::Sqlite(store) => store,
        }
    }

    /// Returns the backend label.
    const fn label(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = write_stderr_line(&err.to_string());
            err.exit_code()
        }
    }
}

/// Loads configuration, opens the store, and runs one command.
fn run(cli: Cli) -> CliResult<()> {
    let config = FleetCheckinConfig::load(cli.config.as_deref())?;
    let backend = StoreBackend::open(&config)?;
    let output = execute(cli.command, &backend)?;
    write_stdout_line(&output.to_string()).map_err(|err| CliError::Output {
        stream: "stdout",
        error: err.to_string(),
    })
}

/// Executes a command against `backend` and returns its JSON output.
fn execute(command: Commands, backend: &StoreBackend) -> CliResult<Value> {
    match command {
        Commands::Cluster {
            command,
        } => command_cluster(command, backend.checkins()),
        Commands::Query {
            command,
        } => command_query(command, backend.checkins()),
        Commands::Version {
            command,
        } => command_version(command, backend.versions()),
        Commands::Config {
            command: ConfigCommand::Check,
        } => command_config_check(backend),
    }
}

// ============================================================================
// SECTION: Cluster Commands
// ============================================================================

/// Dispatches cluster subcommands.
fn command_cluster(command: ClusterCommand, store: &dyn CheckinStore) -> CliResult<Value> {
    match command {
        ClusterCommand::Upsert(args) => {
            let record = store.upsert_cluster(&ClusterId::new(args.cluster_id), &args.payload)?;
            to_output(&record)
        }
        ClusterCommand::Checkin(args) => {
            let created_at = match args.at.as_deref() {
                Some(raw) => parse_field("at", raw).map_err(StoreError::from)?,
                None => Timestamp::now_utc(),
            };
            let record =
                store.check_in(&ClusterId::new(args.cluster_id), created_at, &args.payload)?;
            to_output(&record)
        }
        ClusterCommand::Get(args) => to_output(&store.get_cluster(&ClusterId::new(args.cluster_id))?),
        ClusterCommand::Checkins(args) => {
            to_output(&store.list_checkins(&ClusterId::new(args.cluster_id))?)
        }
    }
}

// ============================================================================
// SECTION: Query Commands
// ============================================================================

/// Dispatches query subcommands.
fn command_query(command: QueryCommand, store: &dyn CheckinStore) -> CliResult<Value> {
    let records = match command {
        QueryCommand::Age(args) => {
            let params = bound_params([
                (FilterKey::CheckedInBefore, args.checked_in_before),
                (FilterKey::CheckedInAfter, args.checked_in_after),
                (FilterKey::CreatedBefore, args.created_before),
                (FilterKey::CreatedAfter, args.created_after),
            ]);
            store.query_cluster_age(&ClusterAgeFilter::from_params(&params)?)?
        }
        QueryCommand::Checkins(args) => {
            let params = bound_params([
                (FilterKey::CreatedAfter, args.created_after),
                (FilterKey::CreatedBefore, args.created_before),
            ]);
            store.query_cluster_checkins(&ClusterCheckinsFilter::from_params(&params)?)?
        }
        QueryCommand::Persistent(args) => {
            let params = bound_params([
                (FilterKey::Epoch, args.epoch),
                (FilterKey::Timestamp, args.timestamp),
            ]);
            store.query_persistent_clusters(&PersistentClustersFilter::from_params(&params)?)?
        }
    };
    to_output(&records)
}

/// Collects the supplied bounds keyed by parameter name.
fn bound_params<const N: usize>(bounds: [(FilterKey, Option<String>); N]) -> BTreeMap<String, String> {
    bounds
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key.as_str().to_string(), value)))
        .collect()
}

// ============================================================================
// SECTION: Version Commands
// ============================================================================

/// Dispatches version subcommands.
fn command_version(command: VersionCommand, store: &dyn VersionStore) -> CliResult<Value> {
    match command {
        VersionCommand::Upsert(args) => {
            let submission = VersionSubmission {
                component: args.component.into(),
                train: args.train.into(),
                version: args.version.into(),
                released_at: args.released_at,
                payload: args.payload,
            };
            to_output(&store.upsert_version(&submission)?)
        }
        VersionCommand::Get(args) => {
            let key = VersionKey::new(args.component, args.train, args.version);
            to_output(&store.get_version(&key)?)
        }
        VersionCommand::Latest(args) => {
            to_output(&store.get_latest_version(&args.train.into(), &args.component.into())?)
        }
        VersionCommand::LatestBatch(args) => to_output(&store.get_latest_versions(&args.pairs)?),
    }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Reports the validated configuration and probes store readiness.
fn command_config_check(backend: &StoreBackend) -> CliResult<Value> {
    backend.checkins().readiness()?;
    backend.versions().readiness()?;
    Ok(json!({
        "status": "ok",
        "store": backend.label(),
    }))
}

// ============================================================================
// SECTION: Argument Parsing
// ============================================================================

/// Parses a JSON payload argument.
fn parse_payload(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|err| format!("invalid payload json: {err}"))
}

/// Parses a `component/train` pair.
fn parse_train_key(raw: &str) -> Result<TrainKey, String> {
    match raw.split_once('/') {
        Some((component, train)) if !component.is_empty() && !train.is_empty() => {
            Ok(TrainKey::new(component, train))
        }
        _ => Err(format!("expected component/train, got {raw}")),
    }
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Serializes a command result.
fn to_output<T: Serialize>(value: &T) -> CliResult<Value> {
    serde_json::to_value(value).map_err(|err| CliError::Output {
        stream: "stdout",
        error: err.to_string(),
    })
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}
