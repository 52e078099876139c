//! simqd — the simq daemon.
//!
//! Single binary that opens the redb state store and serves the
//! work-queue scheduler over HTTP.
//!
//! # Usage
//!
//! ```text
//! simqd --config simq.toml serve --port 8080 --data-dir /var/lib/simq
//! simqd import-codes --code-type fast-ssc codes.json
//! simqd print-config
//! ```

mod import;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use simq_core::SimqConfig;

#[derive(Parser)]
#[command(name = "simqd", about = "Simulation work-queue daemon", version)]
struct Cli {
    /// Path to simq.toml. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve prepare / get-params / save-result / clear over HTTP.
    Serve {
        /// Port to listen on.
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Load code descriptors from a JSON array into the catalog.
    ImportCodes {
        /// Code type the descriptors belong to (e.g. fast-ssc).
        #[arg(long)]
        code_type: String,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// JSON file holding an array of code objects.
        file: PathBuf,
    },
    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,simqd=debug,simq=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SimqConfig::from_file(path)?,
        None => SimqConfig::default(),
    };

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            serve::run_serve(config).await
        }
        Command::ImportCodes {
            code_type,
            data_dir,
            file,
        } => {
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            import::run_import(&config, &code_type, &file)
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
