// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "filtercam")]
#[command(about = "Real-time camera filters with preview and MP4 recording")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras and microphones
    List,

    /// Run the filter pipeline
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Record the filtered video to an MP4 file
    #[arg(short, long)]
    record: bool,

    /// Capture and record audio
    #[arg(short, long)]
    audio: bool,

    /// Use test pattern sources instead of hardware devices
    #[arg(long)]
    test_pattern: bool,

    /// Brightness offset
    #[arg(long, allow_negative_numbers = true)]
    brightness: Option<f32>,

    /// Contrast factor
    #[arg(long)]
    contrast: Option<f32>,

    /// Saturation factor
    #[arg(long)]
    saturation: Option<f32>,

    /// Recordings directory (default: ~/.local/share/filtercam/recordings)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=filtercam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_capture_devices(),
        Commands::Run(args) => cli::run(cli::RunOptions {
            duration: args.duration,
            record: args.record,
            audio: args.audio,
            test_pattern: args.test_pattern,
            brightness: args.brightness,
            contrast: args.contrast,
            saturation: args.saturation,
            output_dir: args.output_dir,
        }),
    }
}
