//! Clipforge CLI — Command-line interface for planning and exporting timelines.
//!
//! Usage:
//!   clipforge export <REQUEST>   Export a timeline request to video
//!   clipforge plan <REQUEST>     Print the execution plan without encoding
//!   clipforge probe <MEDIA>...   Report audio stream presence
//!   clipforge check              Check encoder availability and configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipforge_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "clipforge",
    about = "Multi-lane timeline composition and export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a timeline request to a video file
    Export {
        /// Path to the export request (JSON)
        request: PathBuf,

        /// Output file path (overrides the request)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Downscale target: none|720|1080 (overrides the request)
        #[arg(long)]
        scale: Option<String>,

        /// Multi-clip overlay lanes: concat-full|earliest-clip-only
        #[arg(long)]
        overlay_lanes: Option<String>,
    },

    /// Print the execution plan for a request without encoding
    Plan {
        /// Path to the export request (JSON)
        request: PathBuf,

        /// Skip probing and assume every clip has audio
        #[arg(long)]
        assume_audio: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report audio stream presence for media files
    Probe {
        /// Media files to inspect
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Check encoder availability and configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    clipforge_common::logging::init_logging(&logging);

    let result = match cli.command {
        Commands::Export {
            request,
            output,
            scale,
            overlay_lanes,
        } => commands::export::run(request, output, scale, overlay_lanes, config).await,
        Commands::Plan {
            request,
            assume_audio,
            json,
        } => commands::plan::run(request, assume_audio, json, config).await,
        Commands::Probe { paths } => commands::probe::run(paths, config).await,
        Commands::Check => commands::check::run(config),
    };

    if let Err(err) = &result {
        if commands::export::is_cancellation(err) {
            std::process::exit(commands::export::EXIT_CANCELLED);
        }
    }
    result
}
