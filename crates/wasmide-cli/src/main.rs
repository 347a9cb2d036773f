//! wasmide CLI
//!
//! A command-line tool for compiling and running WebAssembly text
//! submissions in the in-process sandbox.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;
use wasmide::{CompileError, Config, EXAMPLE_CONFIG, ExecutionOutcome, ResourceLimits, Supervisor};

#[derive(Parser)]
#[command(name = "wasmide")]
#[command(about = "A tool for running untrusted WebAssembly submissions in a sandbox")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: wasmide.toml)
        #[arg(short, long, default_value = "wasmide.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Compile a submission without running it
    Check {
        /// WebAssembly text file to compile
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Compile and run a submission
    Run {
        /// WebAssembly text file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Input file (default: empty input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Wall time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in KB
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// List the redirected standard facilities
    Facilities,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Check { source } => run_check(&source).await,
        Commands::Run {
            source,
            input,
            time_limit,
            memory_limit,
        } => run_execute(config, &source, input.as_deref(), time_limit, memory_limit).await,
        Commands::Facilities => {
            list_facilities(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_check(source: &Path) -> Result<()> {
    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    info!(source = %source.display(), "compiling source");

    match wasmide::compile(&source_content) {
        Ok(module) => {
            println!("Compilation successful");
            println!("Module: ${}", module.name());
            println!("Size: {} bytes", module.bytes().len());
            Ok(())
        }
        Err(CompileError::InputRejected) => {
            println!("{}", ExecutionOutcome::InputRejected.render());
            std::process::exit(1);
        }
        Err(CompileError::Diagnostics(diagnostics)) => {
            println!("Compilation failed");
            for diagnostic in &diagnostics {
                println!(
                    "  {} on line {}: {}",
                    diagnostic.severity, diagnostic.line, diagnostic.message
                );
            }
            std::process::exit(1);
        }
    }
}

async fn run_execute(
    config: Config,
    source: &Path,
    input: Option<&Path>,
    time_limit: Option<f64>,
    memory_limit: Option<u64>,
) -> Result<()> {
    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let input_data = if let Some(input_path) = input {
        tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?
    } else {
        String::new()
    };

    // Only explicitly specified values override the configured limits
    let user_limits = ResourceLimits {
        wall_time_limit: time_limit,
        memory_limit,
        max_output: None,
    };
    let limits_ref = if time_limit.is_some() || memory_limit.is_some() {
        Some(&user_limits)
    } else {
        None
    };

    let supervisor = Supervisor::new(config).context("failed to start supervisor")?;

    info!("executing program");
    let outcome = supervisor
        .execute_with_limits(&source_content, &input_data, limits_ref)
        .await;
    supervisor.shutdown();

    // Log the outcome kind via tracing (stderr), keeping stdout clean for piping
    info!(success = outcome.is_success(), "execution result");
    println!("{}", outcome.render());

    if outcome.is_success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn list_facilities(config: &Config) {
    println!("Redirected facilities:\n");
    for (label, redirect) in [
        ("system", &config.facilities.system),
        ("scanner", &config.facilities.scanner),
    ] {
        println!(
            "  {:<10} {} -> {}",
            label, redirect.standard, redirect.substitute
        );
    }
}

fn show_config(config: &Config) {
    println!("Entry point: {}", config.entry_point);
    println!("Epoch tick: {} ms", config.epoch_tick_ms);
    println!();
    println!("Worker pool:");
    println!("  Workers: {}", config.pool.workers);
    println!("  Queue capacity: {}", config.pool.queue_capacity);
    println!();
    println!("Default resource limits:");
    println!("  Wall time limit: {:?}", config.limits.wall_time_limit);
    println!("  Memory limit: {:?} KB", config.limits.memory_limit);
    println!("  Max output: {:?} KB", config.limits.max_output);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
