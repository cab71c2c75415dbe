use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use trading_audit::audit::{AuditEntry, AuditLedger, DEFAULT_VERIFY_LIMIT};
use trading_audit::LedgerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-audit-log")
        .version("1.0.0")
        .about("Verify trading assistant audit ledger integrity")
        .arg(
            Arg::new("db-path")
                .short('d')
                .long("db-path")
                .value_name("PATH")
                .help("Path to the audit ledger database")
                .required(true),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .value_name("ROWS")
                .help("Maximum number of entries to verify")
                .value_parser(clap::value_parser!(i64))
                .default_value("5000"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let db_path = matches
        .get_one::<String>("db-path")
        .ok_or_else(|| anyhow!("--db-path is required"))?;
    let limit = matches
        .get_one::<i64>("limit")
        .copied()
        .unwrap_or(DEFAULT_VERIFY_LIMIT);
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match verify_ledger_file(db_path, limit, verbose).await {
        Ok(true) => {
            if !quiet {
                println!("✓ Audit ledger verification completed successfully");
            }
            Ok(())
        }
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!("Audit ledger verification failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn verify_ledger_file(db_path: &str, limit: i64, verbose: bool) -> Result<bool> {
    info!("Verifying audit ledger: {}", db_path);

    let path = Path::new(db_path);
    if !path.exists() {
        return Err(anyhow!("Audit ledger not found: {}", db_path));
    }

    // Read-only so a damaged ledger can still be inspected
    let ledger = AuditLedger::open_read_only(path, &LedgerConfig::with_path(path)).await?;

    let report = ledger.verify_chain(limit).await?;
    if !report.valid {
        error!("{} ({} rows checked)", report.message, report.checked_rows);
        if let Some(id) = report.first_break_id {
            println!("✗ Hash chain broken at entry #{}", id);
        }
        return Ok(false);
    }

    if verbose {
        println!("✓ Hash chain integrity verified ({} entries)", report.checked_rows);

        let total = ledger.count().await?;
        if total > report.checked_rows as i64 {
            println!("⚠ Only the first {} of {} entries were checked", report.checked_rows, total);
        }

        let recent = ledger.list(None, 1000).await?;
        print_summary(&recent);

        if let Some((id, hash)) = ledger.head().await? {
            println!("  Head entry: #{}", id);
            println!("  Head hash: {}", hash);
        }
    }

    ledger.close().await;
    Ok(true)
}

fn print_summary(entries: &[AuditEntry]) {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        println!("\nAudit ledger is empty");
        return;
    };

    println!("\nAudit Ledger Summary (latest {} entries):", entries.len());
    println!("  First entry: {}", first.summary());
    println!("  Last entry: {}", last.summary());

    let mut event_types: BTreeMap<&str, usize> = BTreeMap::new();
    let mut failures = 0;
    for entry in entries {
        *event_types.entry(&entry.event_type).or_insert(0) += 1;
        if entry.status != "OK" {
            failures += 1;
        }
    }

    println!("\nEvent type distribution:");
    for (event_type, count) in event_types {
        println!("  {}: {}", event_type, count);
    }
    if failures > 0 {
        println!("  ({} entries with non-OK status)", failures);
    }
}
