//! stagewright CLI
//!
//! Entry point for the `stagewright` command-line tool.

use clap::{Parser, Subcommand};
use stagewright::telemetry::{init_tracing, level_from_verbosity};
use stagewright::{CancelToken, DriverError, ExecutionContext, Registry, Source, SourceType, Stage};
use stagewright_source::convert;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::warn;

#[derive(Parser)]
#[command(name = "stagewright")]
#[command(about = "Staged compiler driver with remote hardware emulation", version)]
struct Cli {
    /// Config file (default: ~/.config/stagewright/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Set a stage option, e.g. `-s wdb.host=host.cpp` (repeatable)
    #[arg(short = 's', long = "set", value_name = "STAGE.KEY=VALUE", global = true)]
    set: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stages turning INPUT from one state into another
    Exec {
        /// Input artifact
        input: PathBuf,

        /// State of the input
        #[arg(long)]
        from: String,

        /// State to produce
        #[arg(long)]
        to: String,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List registered stages
    Stages,

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let level = level_from_verbosity(cli.verbose);
    init_tracing(cli.json_logs, level);

    let config_path = cli.config.clone().unwrap_or_else(ExecutionContext::default_path);
    let ctx = match ExecutionContext::build(Some(&config_path), &cli.set) {
        Ok(ctx) => ctx.with_verbosity(level),
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Exec {
            input,
            from,
            to,
            output,
        } => run_exec(&ctx, input, &from, &to, output.as_deref()),
        Commands::Stages => run_stages(&ctx),
        Commands::Config => run_config(&ctx),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run_exec(
    ctx: &ExecutionContext,
    input: PathBuf,
    from: &str,
    to: &str,
    output: Option<&Path>,
) -> Result<(), DriverError> {
    let cancel = install_interrupt_handler();
    let registry = Registry::from_context(ctx, Some(cancel))?;

    let result = registry.run_path(from, to, Source::Path(input))?;
    let mut stream = convert(result, SourceType::Stream)?
        .into_stream()
        .map_err(|other| {
            DriverError::Io(io::Error::other(format!(
                "stage output is {}, not a stream",
                other.kind()
            )))
        })?;

    match output {
        Some(path) => {
            let mut file = File::create(path)?;
            io::copy(&mut stream, &mut file)?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            io::copy(&mut stream, &mut lock)?;
            lock.flush()?;
        }
    }
    Ok(())
}

fn run_stages(ctx: &ExecutionContext) -> Result<(), DriverError> {
    let registry = Registry::from_context(ctx, None)?;
    for stage in registry.stages() {
        println!(
            "{} -> {}: {}",
            stage.src_state(),
            stage.target_state(),
            stage.description()
        );
    }
    Ok(())
}

fn run_config(ctx: &ExecutionContext) -> Result<(), DriverError> {
    let json = ctx
        .to_redacted_json()
        .map_err(|e| DriverError::Io(io::Error::other(e)))?;
    println!("{}", json);
    Ok(())
}

/// First Ctrl-C cancels the running remote command; a second exits at once
fn install_interrupt_handler() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    let installed = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("\nReceived second interrupt, exiting immediately...");
            process::exit(130);
        }
        eprintln!("\nReceived interrupt signal, cancelling...");
        handler_token.cancel();
    });
    if let Err(e) = installed {
        warn!(error = %e, "could not install interrupt handler");
    }
    token
}
