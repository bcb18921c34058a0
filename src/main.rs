//! meldwork CLI - inspect data-only pattern declarations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use meldwork::{report, Declarations};
use meldwork_core::{Idea, PhaseTarget, Runtime, RuntimeConfig};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "meldwork",
    version = env!("CARGO_PKG_VERSION"),
    about = "Pattern composition runtime - resolve, build and inspect declared patterns"
)]
struct Cli {
    /// Runtime config file
    #[arg(short, long, global = true, default_value = "meldwork.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved ancestor list of a pattern
    Resolve {
        file: PathBuf,
        pattern: String,
        /// Leave out core patterns
        #[arg(long)]
        skip_core: bool,
    },
    /// Build an object and print its state
    Build {
        file: PathBuf,
        pattern: String,
        /// Phase to build to (default from config)
        #[arg(short, long)]
        phase: Option<String>,
    },
    /// Print the descendant tree of every declared pattern
    Tree { file: PathBuf },
    /// Show the runtime config
    Config {
        /// Print the effective config as TOML
        #[arg(long)]
        print: bool,
    },
}

fn load_runtime(config: RuntimeConfig, file: &Path) -> anyhow::Result<Runtime> {
    let runtime = Runtime::with_config(config);
    let decls = Declarations::load(file)?;
    decls.register(&runtime)?;
    Ok(runtime)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meldwork=info,meldwork_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::load(&cli.config);
    config.validate().context("Invalid runtime config")?;

    match cli.command {
        Commands::Resolve {
            file,
            pattern,
            skip_core,
        } => {
            let runtime = load_runtime(config, &file)?;
            print!("{}", report::resolution(&runtime, &pattern, skip_core));
        }

        Commands::Build {
            file,
            pattern,
            phase,
        } => {
            let phase = phase.unwrap_or_else(|| config.default_phase.clone());
            let runtime = load_runtime(config, &file)?;
            let object = runtime
                .new_object(pattern.as_str(), Idea::new(), PhaseTarget::from(phase))
                .with_context(|| format!("Failed to build '{}'", pattern))?;
            print!("{}", report::object(&object));
        }

        Commands::Tree { file } => {
            let runtime = load_runtime(config, &file)?;
            print!("{}", report::tree(&runtime));
        }

        Commands::Config { print } => {
            if print {
                print!("{}", config.to_toml());
            } else {
                println!("strict_contracts     = {}", config.strict_contracts);
                println!("observer_queue_limit = {}", config.observer_queue_limit);
                println!("core_patterns        = {}", config.core_patterns.join(", "));
                println!("default_phase        = {}", config.default_phase);
            }
        }
    }

    Ok(())
}
