//! CreditLedger Server Binary
//!
//! Command-line interface for the serial-number ledger:
//! - Serving the HTTP API
//! - Issuing, transferring and retiring credits against the local data directory
//! - Auditing and compacting the commit log
//!
//! # Examples
//!
//! ```bash
//! # Start server
//! creditledger serve --bind 0.0.0.0 --port 8080
//!
//! # Issue a batch of 50000 credits to org-a
//! creditledger issue --project PRJ001 --vintage 2021-2022 --issuer org-a --quantity 50000
//!
//! # Move an explicit serial range
//! creditledger transfer <batch-id> --from org-a --to org-b --range 00000020-00000025
//!
//! # Audit the ledger
//! creditledger verify
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use creditledger::config::LedgerConfig;
use creditledger::ledger::{
    format_range, human_readable_id, parse_range, BatchId, IssuanceRequest, OrgId,
    RetirementRequest, SerialLedger, TransferRequest,
};
use creditledger::server::start_server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CreditLedger - Serial-number ledger for carbon credits
#[derive(Parser, Debug)]
#[command(name = "creditledger")]
#[command(version = creditledger::VERSION)]
#[command(about = "CreditLedger - Serial-number ledger for carbon credits", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CREDITLEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory path (overrides the configuration)
    #[arg(long, global = true, env = "CREDITLEDGER_DATA")]
    data_dir: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "CREDITLEDGER_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve(ServeArgs),

    /// Issue a new credit batch
    Issue(IssueArgs),

    /// Transfer credits between organizations
    Transfer(TransferArgs),

    /// Retire credits and print the certificate
    Retire(RetireArgs),

    /// Show the serial ranges an organization holds in a batch
    Ranges {
        /// Batch id
        batch: String,
        /// Organization id
        org: String,
    },

    /// Show holdings of a batch, or of an organization across batches
    Holdings {
        /// Batch id
        #[arg(long, conflicts_with = "org", required_unless_present = "org")]
        batch: Option<String>,
        /// Organization id
        #[arg(long)]
        org: Option<String>,
    },

    /// List all batches
    Batches,

    /// Look up a retirement certificate
    Certificate {
        /// Certificate id
        id: String,
    },

    /// Audit every ledger invariant
    Verify,

    /// Rewrite the commit log as a snapshot
    Compact,

    /// Format a serial range or certificate id without touching the ledger
    Format(FormatArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show version
    Version,
}

/// Server arguments
#[derive(Args, Debug)]
struct ServeArgs {
    /// HTTP bind address
    #[arg(short, long, env = "CREDITLEDGER_BIND")]
    bind: Option<String>,

    /// HTTP port
    #[arg(short, long, env = "CREDITLEDGER_PORT")]
    port: Option<u16>,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,
}

#[derive(Args, Debug)]
struct IssueArgs {
    /// Project code
    #[arg(long)]
    project: String,

    /// Vintage as `YYYY` or `YYYY-YYYY`
    #[arg(long)]
    vintage: String,

    /// Issuing organization, which receives the whole block
    #[arg(long)]
    issuer: String,

    /// Number of credits
    #[arg(short, long)]
    quantity: u64,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Batch id
    batch: String,

    /// Sending organization
    #[arg(long)]
    from: String,

    /// Receiving organization
    #[arg(long)]
    to: String,

    /// Number of credits
    #[arg(short, long, conflicts_with = "range", required_unless_present = "range")]
    quantity: Option<u64>,

    /// Explicit serial range, `N` or `N-M`
    #[arg(long)]
    range: Option<String>,
}

#[derive(Args, Debug)]
struct RetireArgs {
    /// Batch id
    batch: String,

    /// Retiring organization
    #[arg(long)]
    org: String,

    /// Number of credits
    #[arg(short, long)]
    quantity: u64,

    /// Retirement purpose
    #[arg(long)]
    purpose: String,

    /// Beneficiary named on the certificate
    #[arg(long)]
    beneficiary: Option<String>,
}

#[derive(Args, Debug)]
struct FormatArgs {
    /// First serial
    start: u64,

    /// Last serial
    end: u64,

    /// Also print the certificate id for this project code
    #[arg(long)]
    project: Option<String>,

    /// Vintage for the certificate id, `YYYY` or `YYYY-YYYY`
    #[arg(long, requires = "project")]
    vintage: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let mut config = LedgerConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve(args) => serve_command(config, args),
        Commands::Issue(args) => issue_command(&config, args),
        Commands::Transfer(args) => transfer_command(&config, args),
        Commands::Retire(args) => retire_command(&config, args),
        Commands::Ranges { batch, org } => {
            let ledger = open_ledger(&config)?;
            let batch: BatchId = batch.parse()?;
            let org: OrgId = org.parse()?;
            let ranges = ledger.ranges_for(&batch, &org)?;
            if ranges.is_empty() {
                println!("{} holds no serials in batch {}", org, batch);
            }
            for interval in ranges {
                println!(
                    "{}  ({} credits)",
                    ledger.options().formatter.range(interval.start, interval.end)?,
                    interval.len()
                );
            }
            Ok(())
        }
        Commands::Holdings { batch, org } => {
            let ledger = open_ledger(&config)?;
            let holdings = match (batch, org) {
                (Some(batch), _) => ledger.holdings(&batch.parse()?)?,
                (None, Some(org)) => ledger.holdings_for_org(&org.parse()?),
                (None, None) => bail!("either --batch or --org is required"),
            };
            print_json(&holdings)
        }
        Commands::Batches => {
            let ledger = open_ledger(&config)?;
            let batches = ledger.batches();
            if batches.is_empty() {
                println!("No batches issued.");
                return Ok(());
            }
            println!("Batches ({})", batches.len());
            println!("───────────────────────────────");
            for batch in batches {
                println!(
                    "  • {}  {}  {}  issued {}  retired {}",
                    batch.id,
                    batch.project_code,
                    ledger
                        .options()
                        .formatter
                        .range(batch.serial_start, batch.serial_end)?,
                    batch.total_issued,
                    batch.total_retired
                );
            }
            Ok(())
        }
        Commands::Certificate { id } => {
            let ledger = open_ledger(&config)?;
            print_json(&ledger.certificate(&id)?)
        }
        Commands::Verify => {
            let ledger = open_ledger(&config)?;
            let report = ledger.verify();
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} invariant violation(s) found", report.violations.len());
            }
            Ok(())
        }
        Commands::Compact => {
            let ledger = open_ledger(&config)?;
            let before = ledger.stats().store_batches;
            ledger.compact()?;
            println!(
                "✅ Compacted commit log ({} -> {} batches)",
                before,
                ledger.stats().store_batches
            );
            Ok(())
        }
        Commands::Format(args) => format_command(args),
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        },
        Commands::Version => {
            println!("CreditLedger {}", creditledger::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "creditledger.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color)
                .pretty(),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn open_ledger(config: &LedgerConfig) -> anyhow::Result<SerialLedger> {
    SerialLedger::from_config(config)
        .with_context(|| format!("Failed to open ledger at {}", config.data_dir.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `YYYY` or `YYYY-YYYY`
fn parse_vintage(raw: &str) -> anyhow::Result<(i32, i32)> {
    let (start, end) = match raw.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (raw.trim(), raw.trim()),
    };
    let start: i32 = start
        .parse()
        .with_context(|| format!("invalid vintage '{}'", raw))?;
    let end: i32 = end
        .parse()
        .with_context(|| format!("invalid vintage '{}'", raw))?;
    Ok((start, end))
}

/// Serve command - start the HTTP API
fn serve_command(mut config: LedgerConfig, args: ServeArgs) -> anyhow::Result<()> {
    info!("🚀 CreditLedger {} starting...", creditledger::VERSION);

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_cors {
        config.server.enable_cors = false;
    }

    let ledger = Arc::new(open_ledger(&config)?);
    info!("✅ Ledger opened at {}", config.data_dir.display());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime
        .block_on(start_server(config.server, ledger))
        .map_err(|e| {
            error!(error = %e, "Server stopped with an error");
            e
        })
}

fn issue_command(config: &LedgerConfig, args: IssueArgs) -> anyhow::Result<()> {
    let (vintage_start, vintage_end) = parse_vintage(&args.vintage)?;
    let ledger = open_ledger(config)?;
    let receipt = ledger.issue(IssuanceRequest {
        project_code: args.project,
        vintage_start,
        vintage_end,
        issuer: args.issuer.parse()?,
        quantity: args.quantity,
    })?;

    println!("✅ Issued batch {}", receipt.batch.id);
    println!("Serials: {}", receipt.formatted_range);
    println!("ID:      {}", receipt.human_readable_id);
    Ok(())
}

fn transfer_command(config: &LedgerConfig, args: TransferArgs) -> anyhow::Result<()> {
    let batch_id: BatchId = args.batch.parse()?;
    let from: OrgId = args.from.parse()?;
    let to: OrgId = args.to.parse()?;
    let ledger = open_ledger(config)?;

    let record = match (args.quantity, args.range) {
        (Some(quantity), None) => ledger.transfer(TransferRequest {
            batch_id,
            from,
            to,
            quantity,
        })?,
        (None, Some(range)) => {
            ledger.transfer_subrange(&batch_id, &from, &to, parse_range(&range)?)?
        }
        _ => bail!("exactly one of --quantity or --range is required"),
    };

    println!(
        "✅ Transferred {} credits from {} to {}",
        record.quantity, record.from, record.to
    );
    for range in &record.ranges {
        println!(
            "  {}",
            ledger.options().formatter.range(range.start, range.end)?
        );
    }
    Ok(())
}

fn retire_command(config: &LedgerConfig, args: RetireArgs) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;
    let record = ledger.retire(RetirementRequest {
        batch_id: args.batch.parse()?,
        org_id: args.org.parse()?,
        quantity: args.quantity,
        purpose: args.purpose,
        beneficiary: args.beneficiary,
    })?;
    print_json(&record)
}

fn format_command(args: FormatArgs) -> anyhow::Result<()> {
    println!("{}", format_range(args.start, args.end)?);
    if let Some(project) = args.project {
        let (vintage_start, vintage_end) = match args.vintage.as_deref() {
            Some(vintage) => parse_vintage(vintage)?,
            None => bail!("--vintage is required with --project"),
        };
        println!(
            "{}",
            human_readable_id(
                &project,
                vintage_start,
                vintage_end,
                &BatchId::new(),
                args.start,
                args.end
            )?
        );
    }
    Ok(())
}
