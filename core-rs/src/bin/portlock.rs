//! portlock - reserve a port for a shell-driven test shard
//!
//! `hold` prints the reserved port on stdout and keeps the lock until stdin
//! closes or the process is interrupted. Logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use portlock::{scan_markers, AllocatorConfig, MarkerState, PortAllocator};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "portlock")]
#[command(version = "0.1.0")]
#[command(about = "Cross-process port reservation through advisory file locks", long_about = None)]
struct Cli {
    /// YAML config file (defaults to $PORTLOCK_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Lowest candidate port
    #[arg(long, global = true)]
    low: Option<u16>,
    /// Highest candidate port
    #[arg(long, global = true)]
    high: Option<u16>,
    /// Directory holding the lock marker files
    #[arg(long, global = true)]
    lock_dir: Option<PathBuf>,
    /// Marker file name prefix
    #[arg(long, global = true)]
    prefix: Option<String>,
    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve a port, print it, hold it until stdin closes
    Hold,
    /// Show marker files and whether they are locked
    ///
    /// Each free marker is checked by briefly taking its lock. An allocator
    /// running at the same moment may see that port as busy and skip it, so
    /// on a small pool this can cause a spurious exhaustion.
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as YAML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Hold => hold(&config),
        Commands::Status { json } => status(&config, json),
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

/// File (or environment), then command-line flags
fn resolve_config(cli: &Cli) -> anyhow::Result<AllocatorConfig> {
    let mut config = match &cli.config {
        Some(path) => AllocatorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AllocatorConfig::from_env().context("reading PORTLOCK_* environment")?,
    };

    if let Some(low) = cli.low {
        config.port_range_low = low;
    }
    if let Some(high) = cli.high {
        config.port_range_high = high;
    }
    if let Some(dir) = &cli.lock_dir {
        config.lock_directory = dir.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.lock_file_prefix = prefix.clone();
    }

    config.validate()?;
    Ok(config)
}

fn hold(config: &AllocatorConfig) -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        tracing::info!("interrupted, dropping port lock");
        std::process::exit(130);
    })
    .context("installing Ctrl+C handler")?;

    let allocator = PortAllocator::new(config)?;
    let port = allocator.get_port()?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", port)?;
    stdout.flush()?;
    drop(stdout);

    io::copy(&mut io::stdin().lock(), &mut io::sink()).context("waiting on stdin")?;

    allocator.release_port();
    Ok(())
}

fn status(config: &AllocatorConfig, json: bool) -> anyhow::Result<()> {
    let markers = scan_markers(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&markers)?);
        return Ok(());
    }

    println!(
        "Lock directory: {} (range {}-{})",
        config.lock_directory.display(),
        config.port_range_low,
        config.port_range_high
    );

    if markers.is_empty() {
        println!("No marker files.");
        return Ok(());
    }

    for marker in &markers {
        let state = match marker.state {
            MarkerState::Held => "HELD".red().bold(),
            MarkerState::Free => "free".green(),
            MarkerState::Unknown => "unknown".yellow(),
        };
        let note = if marker.in_range { "" } else { " (outside range)" };
        println!("  {:<6} {:<8} {}{}", marker.port, state, marker.path.display(), note.dimmed());
    }

    let held = markers.iter().filter(|m| m.state == MarkerState::Held).count();
    println!("{} of {} markers held", held, markers.len());
    Ok(())
}
