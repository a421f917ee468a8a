//! coedit coordinator tooling.
//!
//! # Usage
//!
//! ```bash
//! # Replay a captured session trace and write the routing decisions
//! coedit-server replay --trace session.cbor --out routed.cbor
//!
//! # Same, with transformation details
//! RUST_LOG=coedit_core=trace coedit-server replay --trace session.cbor --out routed.cbor
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use coedit_server::{ReplayConfig, ServerError, replay::replay};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// coedit coordinator tooling
#[derive(Parser, Debug)]
#[command(name = "coedit-server")]
#[command(about = "Coordinating-role tooling for coedit sessions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a session trace through a fresh coordinator
    Replay {
        /// CBOR sequence of trace events
        #[arg(short, long)]
        trace: PathBuf,

        /// Output file for routed activities
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Replay { trace, out } => {
            if trace == out {
                return Err(ServerError::Config("trace and output must differ".to_string()));
            }
            tracing::info!(trace = %trace.display(), out = %out.display(), "replaying trace");
            let summary = replay(&ReplayConfig { trace_path: trace, output_path: out })?;
            tracing::info!(routed = summary.routed, "done");
        },
    }

    Ok(())
}
