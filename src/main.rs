use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trading_audit::audit::{
    AuditService, LedgerAcquisition, Payload, DEFAULT_EXPORT_LIMIT, DEFAULT_LIST_LIMIT,
    DEFAULT_STATUS, DEFAULT_VERIFY_LIMIT,
};
use trading_audit::LedgerConfig;

#[derive(Parser)]
#[command(name = "trading-audit", version, about = "Trading assistant audit ledger")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); AUDIT_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger file, overriding the configured path
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append an audit event
    Log {
        #[arg(long)]
        event_type: String,
        #[arg(long)]
        action: String,
        /// JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, default_value = DEFAULT_STATUS)]
        status: String,
    },
    /// List recent audit events
    Query {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
    },
    /// Export audit events
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long, default_value_t = DEFAULT_EXPORT_LIMIT)]
        limit: i64,
    },
    /// Re-walk the hash chain
    Verify {
        #[arg(long, default_value_t = DEFAULT_VERIFY_LIMIT)]
        limit: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Jsonl,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trading_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::load()?,
    };
    if let Some(path) = cli.db_path {
        config.db_path = path;
    }
    info!("Using audit ledger {}", config.db_path.display());

    let acquisition = LedgerAcquisition::new(config);
    let audit = acquisition.acquire().await?;

    execute(&audit, cli.command).await
}

async fn execute(audit: &AuditService, command: Command) -> Result<ExitCode> {
    match command {
        Command::Log {
            event_type,
            action,
            payload,
            status,
        } => {
            let payload: Payload = serde_json::from_str(&payload)
                .context("payload must be a JSON object")?;
            let id = audit.log(&event_type, &action, payload, &status).await?;
            println!("{}", id);
        }
        Command::Query { event_type, limit } => {
            for entry in audit.query(event_type.as_deref(), limit).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Export {
            format,
            event_type,
            limit,
        } => {
            let content = match format {
                ExportFormat::Csv => audit.export_csv(event_type.as_deref(), limit).await?,
                ExportFormat::Jsonl => audit.export_jsonl(event_type.as_deref(), limit).await?,
            };
            println!("{}", content);
        }
        Command::Verify { limit } => {
            let report = audit.verify_chain(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                eprintln!("error: {}", report.message);
                return Ok(ExitCode::from(2));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
