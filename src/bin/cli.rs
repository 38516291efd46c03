//! SegKV CLI
//!
//! Operator tool that opens a data directory in-process and runs one command.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use segkv::{Config, Engine, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// SegKV CLI
#[derive(Parser, Debug)]
#[command(name = "segkv-cli")]
#[command(about = "Local operator CLI for a SegKV data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./segkv_data")]
    data_dir: String,

    /// Rotate the active segment once it reaches this many bytes
    #[arg(short, long, default_value = "10485760")]
    max_segment_bytes: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Merge all closed segments into one
    Merge,

    /// Print segment statistics
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,segkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .max_segment_bytes(args.max_segment_bytes)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = run(&engine, args.command);

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        return ExitCode::FAILURE;
    }

    code
}

fn run(engine: &Engine, command: Commands) -> ExitCode {
    let result = match command {
        Commands::Get { key } => match engine.get(key.as_bytes()) {
            Ok(Some(value)) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(())
            }
            Ok(None) => {
                println!("(not found)");
                return ExitCode::FAILURE;
            }
            Err(e) => Err(e),
        },
        Commands::Put { key, value } => engine.put(key.as_bytes(), value.as_bytes()),
        Commands::Merge => engine.merge().map(|stats| {
            println!(
                "merged {} segments: {} keys, {} -> {} bytes",
                stats.input_segments, stats.keys_written, stats.bytes_before, stats.bytes_after
            );
        }),
        Commands::Stats => engine.stats().map(|stats| {
            println!("closed segments: {}", stats.closed_segments);
            println!("active bytes:    {}", stats.active_bytes);
            println!("total bytes:     {}", stats.total_bytes);
            println!("indexed keys:    {}", stats.indexed_keys);
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
