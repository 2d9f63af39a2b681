use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ssc_core::normalizer;
use ssc_core::parser::parse_contract;
use ssc_core::verifier::verify;
use ssc_core::{LedgerView, Node, NodeConfig, SourceBlock, TransactionStatus};

/// SSC — sidechain node operator CLI
///
/// Check, hash and format contracts; replay source-block streams.
#[derive(Parser)]
#[command(name = "ssc", version, about, long_about = None)]
struct Cli {
    /// Suppress non-error output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and verify a contract
    Check {
        /// Path to .ssc file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the code hash (SHA-256 of the canonical form)
    Hash {
        /// Path to .ssc file
        file: PathBuf,
    },

    /// Print a contract in canonical form
    Fmt {
        /// Path to .ssc file
        file: PathBuf,
        /// Rewrite the file in place
        #[arg(long)]
        write: bool,
    },

    /// Produce genesis and feed a JSON array of source blocks through a node
    Replay {
        /// Node config file
        #[arg(long)]
        config: PathBuf,
        /// JSON file holding an array of source blocks
        blocks: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

/// Exit codes: 0 ok, 1 validation failure, 2 error
enum Outcome {
    Ok,
    Invalid,
    Failed(String),
}

impl Outcome {
    fn code(&self) -> i32 {
        match self {
            Outcome::Ok => 0,
            Outcome::Invalid => 1,
            Outcome::Failed(_) => 2,
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    let outcome = match cli.command {
        Commands::Check { file, json } => check(&file, json, quiet),
        Commands::Hash { file } => hash(&file),
        Commands::Fmt { file, write } => fmt(&file, write),
        Commands::Replay { config, blocks, json } => replay(&config, &blocks, json, quiet).await,
        Commands::Version => {
            println!("ssc {} (ssc-core {})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_VERSION"));
            Outcome::Ok
        }
    };

    if let Outcome::Failed(message) = &outcome {
        eprintln!("{} {}", "error:".red().bold(), message);
    }
    process::exit(outcome.code());
}

fn read_source(file: &Path) -> Result<String, Outcome> {
    std::fs::read_to_string(file).map_err(|e| Outcome::Failed(format!("cannot read {}: {}", file.display(), e)))
}

fn check(file: &Path, json: bool, quiet: bool) -> Outcome {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };

    let (errors, warnings, code_hash) = match parse_contract(&source) {
        Ok(ast) => {
            let result = verify(&ast);
            let errors: Vec<String> = result.errors().iter().map(|d| d.to_string()).collect();
            let warnings: Vec<String> = result.warnings().iter().map(|d| d.to_string()).collect();
            let hash = result.is_valid().then(|| normalizer::compute_code_hash(&ast));
            (errors, warnings, hash)
        }
        Err(e) => (vec![e.to_string()], Vec::new(), None),
    };
    let valid = errors.is_empty();

    if json {
        let report = json!({
            "file": file.display().to_string(),
            "valid": valid,
            "errors": errors.len(),
            "warnings": warnings.len(),
            "diagnostics": errors.iter().chain(warnings.iter()).collect::<Vec<_>>(),
            "codeHash": code_hash,
        });
        println!("{}", report);
    } else {
        for e in &errors {
            eprintln!("{}", e.red());
        }
        for w in &warnings {
            eprintln!("{}", w.yellow());
        }
        if valid && !quiet {
            println!("{} {} is valid ({} warnings)", "✓".green(), file.display(), warnings.len());
        }
    }

    if valid {
        Outcome::Ok
    } else {
        Outcome::Invalid
    }
}

fn hash(file: &Path) -> Outcome {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };
    let ast = match parse_contract(&source) {
        Ok(ast) => ast,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return Outcome::Invalid;
        }
    };
    let result = verify(&ast);
    if !result.is_valid() {
        for e in result.errors() {
            eprintln!("{}", e.to_string().red());
        }
        return Outcome::Invalid;
    }
    println!("{}", normalizer::compute_code_hash(&ast));
    Outcome::Ok
}

fn fmt(file: &Path, write: bool) -> Outcome {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };
    let canonical = match normalizer::normalize(&source) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return Outcome::Invalid;
        }
    };
    if write {
        if let Err(e) = std::fs::write(file, &canonical) {
            return Outcome::Failed(format!("cannot write {}: {}", file.display(), e));
        }
    } else {
        print!("{}", canonical);
    }
    Outcome::Ok
}

async fn replay(config: &Path, blocks: &Path, json: bool, quiet: bool) -> Outcome {
    let config = match NodeConfig::from_file(config) {
        Ok(c) => c,
        Err(e) => return Outcome::Failed(e.to_string()),
    };
    let stream: Vec<SourceBlock> = match read_source(blocks).and_then(|text| {
        serde_json::from_str(&text).map_err(|e| Outcome::Failed(format!("{}: {}", blocks.display(), e)))
    }) {
        Ok(stream) => stream,
        Err(outcome) => return outcome,
    };

    let node = match Node::init(config) {
        Ok(node) => node,
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    let mut produced = 0usize;
    let mut skipped = 0usize;
    let mut failed_transactions = 0usize;
    for source in stream {
        match node.produce_new_block_sync(source).await {
            Ok(Some(block)) => {
                produced += 1;
                failed_transactions += block
                    .transactions
                    .iter()
                    .chain(block.virtual_transactions.iter())
                    .filter(|tx| tx.status() == TransactionStatus::Failed)
                    .count();
            }
            Ok(None) => skipped += 1,
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    }
    if let Err(e) = node.stop().await {
        return Outcome::Failed(e.to_string());
    }
    info!(produced, skipped, failed_transactions, "replay finished");

    let Some(head) = node.database().get_latest_block_metadata() else {
        return Outcome::Failed("no blocks in the ledger".into());
    };

    if json {
        let summary = json!({
            "chainId": node.config().chain_id,
            "blocksProduced": produced,
            "blocksSkipped": skipped,
            "failedTransactions": failed_transactions,
            "head": {
                "blockNumber": head.id,
                "sourceBlockNumber": head.source_block_number,
                "hash": head.hash,
                "databaseHash": head.database_hash,
            },
        });
        println!("{}", summary);
    } else if !quiet {
        println!("{} chain {}", "✓".green(), node.config().chain_id.bold());
        println!("  blocks produced:     {}", produced);
        println!("  blocks skipped:      {}", skipped);
        println!("  failed transactions: {}", failed_transactions);
        println!("  head block:          {}", head.id);
        println!("  head hash:           {}", head.hash);
        println!("  database hash:       {}", head.database_hash);
    }
    Outcome::Ok
}
