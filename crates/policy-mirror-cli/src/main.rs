// crates/policy-mirror-cli/src/main.rs
// ============================================================================
// Module: Policy Mirror CLI Entry Point
// Description: Command dispatcher for rule conversion, store, and mirror workflows.
// Purpose: Provide a safe CLI over the rule store and synchronizer.
// Dependencies: clap, policy-mirror-config, policy-mirror-core, policy-mirror-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! `policy-mirror` converts flat policy files into rule documents, applies
//! and inspects rules in the configured store, and runs a long-lived mirror
//! that keeps an in-memory engine in step with the store. Store and scope
//! come from `policy-mirror.toml`; the `convert` command needs no config.
//! Security posture: inputs are untrusted and validated before any store
//! write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use policy_mirror_cli::convert::ConvertError;
use policy_mirror_cli::convert::PolicySource;
use policy_mirror_cli::convert::RuleDocument;
use policy_mirror_cli::convert::parse_documents;
use policy_mirror_cli::convert::parse_label;
use policy_mirror_cli::convert::parse_policy;
use policy_mirror_cli::convert::read_file;
use policy_mirror_cli::convert::render_documents;
use policy_mirror_cli::convert::write_output;
use policy_mirror_cli::logging::init_logging;
use policy_mirror_config::LoggingConfig;
use policy_mirror_config::MirrorConfig;
use policy_mirror_config::StoreType;
use policy_mirror_core::InMemoryObjectStore;
use policy_mirror_core::KindRegistry;
use policy_mirror_core::Labels;
use policy_mirror_core::MemoryPolicyEngine;
use policy_mirror_core::ObjectBackend;
use policy_mirror_core::RuleAdapter;
use policy_mirror_core::Scope;
use policy_mirror_core::Synchronizer;
use policy_mirror_store_sqlite::SqliteObjectStore;
use thiserror::Error;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "policy-mirror", version, disable_help_subcommand = true)]
struct Cli {
    /// Path to `policy-mirror.toml` (overrides `POLICY_MIRROR_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a CSV policy file into rule documents.
    Convert(ConvertCommand),
    /// Inspect and modify rules in the configured store.
    Rules {
        /// Selected rules subcommand.
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Mirror the configured scope into memory until interrupted.
    Watch,
}

/// Arguments for `convert`.
#[derive(Args, Debug)]
struct ConvertCommand {
    /// Path or http(s) URL of the policy file.
    #[arg(short = 'i', long = "input", value_name = "FILE|URL")]
    input: String,
    /// Output file, appended to; `-` writes to stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "-")]
    output: String,
    /// Namespace recorded in each document.
    #[arg(short = 'n', long = "namespace", value_name = "NAMESPACE", default_value = "")]
    namespace: String,
    /// Label recorded in each document (repeatable).
    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    labels: Vec<(String, String)>,
}

/// Rules subcommands.
#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Print stored rules in load order.
    List,
    /// Store every rule from a document file.
    Apply {
        /// Rule document file produced by `convert`.
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,
    },
    /// Delete every rule in scope.
    Clear,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing failures.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

impl From<ConvertError> for CliError {
    fn from(error: ConvertError) -> Self {
        Self::new(error.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(command) => {
            init_logging(LoggingConfig::default());
            tokio::task::spawn_blocking(move || command_convert(&command))
                .await
                .map_err(|err| CliError::new(format!("convert task failed: {err}")))?
        }
        Commands::Rules {
            command,
        } => {
            let config = load_config(cli.config)?;
            command_rules(&config, command)
        }
        Commands::Watch => {
            let config = load_config(cli.config)?;
            command_watch(&config).await
        }
    }
}

/// Loads configuration and installs logging from it.
fn load_config(path: Option<PathBuf>) -> CliResult<MirrorConfig> {
    let config = MirrorConfig::load(path.as_deref()).map_err(|err| CliError::new(err.to_string()))?;
    init_logging(config.logging);
    Ok(config)
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Converts a policy file into rule documents.
fn command_convert(command: &ConvertCommand) -> CliResult<ExitCode> {
    let source = PolicySource::parse(&command.input)?;
    let content = source.read()?;
    let labels: Labels = command.labels.iter().cloned().collect();
    let documents: Vec<RuleDocument> = parse_policy(&content)?
        .into_iter()
        .map(|record| RuleDocument::for_record(record, &command.namespace, &labels))
        .collect();
    write_output(&command.output, &render_documents(&documents)?)?;
    info!(input = %command.input, count = documents.len(), "converted policy file");
    Ok(ExitCode::SUCCESS)
}

/// Dispatches rules subcommands.
fn command_rules(config: &MirrorConfig, command: RulesCommand) -> CliResult<ExitCode> {
    let adapter = RuleAdapter::new(open_backend(config)?, &KindRegistry::with_rules(), config.scope.to_scope())
        .map_err(|err| CliError::new(err.to_string()))?;
    match command {
        RulesCommand::List => {
            for record in adapter.load_all().map_err(|err| CliError::new(err.to_string()))? {
                write_stdout_line(&record.policy_line().join(", "))?;
            }
        }
        RulesCommand::Apply {
            file,
        } => {
            let documents = parse_documents(&read_file(&file)?)?;
            for document in &documents {
                check_document_scope(document, adapter.scope())?;
                adapter
                    .add_one(&document.spec.ptype, &document.spec.rule())
                    .map_err(|err| CliError::new(format!("{}: {err}", document.metadata.name)))?;
            }
            write_stdout_line(&format!("applied {} rules", documents.len()))?;
        }
        RulesCommand::Clear => {
            let removed = adapter.clear().map_err(|err| CliError::new(err.to_string()))?;
            write_stdout_line(&format!("removed {removed} rules"))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Mirrors the configured scope into an in-memory engine until Ctrl-C.
async fn command_watch(config: &MirrorConfig) -> CliResult<ExitCode> {
    let backend = open_backend(config)?;
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut synchronizer = Synchronizer::new(
        config.sync.to_synchronizer_config(),
        backend,
        &KindRegistry::with_rules(),
        Arc::<MemoryPolicyEngine>::clone(&engine),
    );
    let scope = config.scope.to_scope();
    synchronizer.start(scope.clone()).await.map_err(|err| CliError::new(err.to_string()))?;
    let count = engine.snapshot().map_err(|err| CliError::new(err.to_string()))?.len();
    info!(scope = %scope, count, "mirroring rules, press Ctrl-C to stop");

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| CliError::new(format!("failed to listen for Ctrl-C: {err}")))?;
            None
        }
        outcome = synchronizer.join() => Some(outcome),
    };
    match finished {
        None => {
            synchronizer.stop();
            info!(scope = %scope, "mirror stopped");
            Ok(ExitCode::SUCCESS)
        }
        Some(Ok(())) => Ok(ExitCode::SUCCESS),
        Some(Err(err)) => Err(CliError::new(format!("mirror feed ended: {err}"))),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens the configured object store backend.
fn open_backend(config: &MirrorConfig) -> CliResult<Arc<dyn ObjectBackend>> {
    match config.store.store_type {
        StoreType::Memory => {
            warn!("using the in-memory store; rules are not shared with other processes");
            Ok(Arc::new(InMemoryObjectStore::new()))
        }
        StoreType::Sqlite => {
            let settings = config
                .store
                .sqlite_config()
                .ok_or_else(|| CliError::new("sqlite store requires path".to_string()))?;
            let store = SqliteObjectStore::new(settings).map_err(|err| CliError::new(err.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Rejects documents addressed to a different namespace or label set.
fn check_document_scope(document: &RuleDocument, scope: &Scope) -> CliResult<()> {
    let metadata = &document.metadata;
    if !metadata.namespace.is_empty() && metadata.namespace != scope.namespace {
        return Err(CliError::new(format!(
            "{} targets namespace {} but the configured scope is {scope}",
            metadata.name, metadata.namespace
        )));
    }
    if !metadata.labels.is_empty() && metadata.labels != scope.labels {
        return Err(CliError::new(format!(
            "{} carries labels that differ from the configured scope {scope}",
            metadata.name
        )));
    }
    Ok(())
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(&format!("error: {message}"));
    ExitCode::FAILURE
}
