//! Ledger Verification CLI Tool
//!
//! Checks a file-backed audit ledger without writing to it: replays the
//! hash chain, exports signed chain segments and verifies exported ones.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use audit_ledger::audit::{
    skip_corrupt, verify_segment, AuditStore, ChainSegment, EntryFilter, EntryHasher, FieldCodec,
    FileStore, IntegrityValidator, SegmentExporter,
};
use audit_ledger::config::{LedgerConfig, ValidationMode};
use audit_ledger::crypto::StaticKeyProvider;

#[derive(Parser)]
#[command(name = "verify-ledger")]
#[command(about = "Verify audit ledger hash-chain integrity")]
struct Cli {
    /// Ledger configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger directory (overrides storage_dir from the configuration)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the chain and report violations
    Validate {
        /// Start of the window (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// End of the window (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Override the configured validation mode
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a chain segment with its Merkle root
    Export {
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify a previously exported chain segment
    VerifySegment {
        /// Segment file
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Carried,
    Full,
}

impl From<Mode> for ValidationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Carried => ValidationMode::CarriedStoredHash,
            Mode::Full => ValidationMode::FullRederivation,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "audit_ledger=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        config.storage_dir = dir;
    }

    match cli.command {
        Commands::Validate {
            from,
            to,
            mode,
            json,
        } => {
            let violations = validate(&config, from, to, mode, json)?;
            if violations > 0 {
                error!("Ledger verification failed with {} violations", violations);
                std::process::exit(1);
            }
        }
        Commands::Export { from, to, output } => {
            let segment = exporter(&config)?.export(from, to)?;
            let rendered = serde_json::to_string_pretty(&segment)?;
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Segment written to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
        Commands::VerifySegment { file } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let segment: ChainSegment = serde_json::from_str(&content)?;

            let hasher = EntryHasher::new(config.hash_algorithm()?);
            let verification = verify_segment(&hasher, &segment);

            println!("Merkle root:  {}", ok(verification.merkle_root_valid));
            println!("Boundaries:   {}", ok(verification.boundaries_valid));
            match verification.signature_valid {
                Some(valid) => println!("Signature:    {}", ok(valid)),
                None => println!("Signature:    unsigned"),
            }

            if !verification.is_valid() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn ok(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "INVALID"
    }
}

fn open_store(config: &LedgerConfig) -> Result<Arc<dyn AuditStore>> {
    if !config.storage_dir.exists() {
        return Err(anyhow!(
            "Ledger directory not found: {}",
            config.storage_dir.display()
        ));
    }
    Ok(Arc::new(FileStore::open(&config.storage_dir)?))
}

/// Genesis hash from the checkpoint, or from the earliest entry when the
/// checkpoint is missing. Never writes.
fn start_hash(store: &dyn AuditStore) -> Result<String> {
    if let Some(state) = store.load_checkpoint()? {
        return Ok(state.start_hash);
    }

    let mut first: Option<(DateTime<Utc>, String)> = None;
    for entry in store.read_range(&EntryFilter::all())?.filter_map(skip_corrupt) {
        let entry = entry?;
        if first.as_ref().map_or(true, |(ts, _)| entry.timestamp < *ts) {
            first = Some((entry.timestamp, entry.previous_hash));
        }
    }

    first
        .map(|(_, hash)| hash)
        .ok_or_else(|| anyhow!("Ledger is empty and has no checkpoint"))
}

fn codec(config: &LedgerConfig) -> Result<Arc<FieldCodec>> {
    let keys = StaticKeyProvider::from_config(config)?;
    Ok(Arc::new(FieldCodec::new(&keys, config.encryption_enabled)))
}

fn exporter(config: &LedgerConfig) -> Result<SegmentExporter> {
    let store = open_store(config)?;
    let start_hash = start_hash(store.as_ref())?;
    Ok(SegmentExporter::new(
        store,
        codec(config)?,
        EntryHasher::new(config.hash_algorithm()?),
        start_hash,
    ))
}

fn validate(
    config: &LedgerConfig,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    mode: Option<Mode>,
    json: bool,
) -> Result<usize> {
    let store = open_store(config)?;
    let start_hash = start_hash(store.as_ref())?;
    let mode = mode.map(ValidationMode::from).unwrap_or(config.validation_mode);

    info!("Validating ledger at {}", config.storage_dir.display());
    let validator = IntegrityValidator::new(
        store,
        codec(config)?,
        EntryHasher::new(config.hash_algorithm()?),
        mode,
        start_hash,
    );
    let report = validator.validate(from, to)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for violation in &report.violations {
            println!(
                "  {} at {}: expected {}, found {}",
                violation.violation_type, violation.entry_id, violation.expected, violation.actual
            );
        }
    }

    Ok(report.violations.len())
}
