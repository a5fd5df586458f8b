mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use layerbuild_lib::config::BuildConfig;
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// layerbuild - layered, cached filesystem builds from recipes
#[derive(Parser)]
#[command(name = "layerbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Layer store directory (defaults to LAYERBUILD_STORE or the platform data dir)
  #[arg(long, global = true, value_name = "DIR")]
  store: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a recipe into a stack of layers
  Build {
    /// Path to the recipe file
    #[arg(default_value = "Recipe")]
    recipe: PathBuf,

    /// Directory COPY sources are resolved against
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    context: PathBuf,

    /// Limit on each RUN instruction, e.g. "30s" or "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Execute every instruction instead of reusing cached layers
    #[arg(long)]
    no_cache: bool,
  },

  /// Manage base images
  Base {
    #[command(subcommand)]
    command: BaseCommands,
  },

  /// Show a layer's metadata
  Inspect {
    /// Layer id or unique prefix
    layer: String,
  },

  /// List a layer and its ancestors, newest first
  History {
    /// Layer id or unique prefix
    layer: String,
  },

  /// Write a layer's complete filesystem to a directory
  Export {
    /// Layer id or unique prefix
    layer: String,

    /// Destination directory; must be empty or absent
    dest: PathBuf,
  },
}

#[derive(Subcommand)]
enum BaseCommands {
  /// Import a directory tree as a named base image
  Import {
    /// Name recipes refer to in FROM
    name: String,

    /// Root filesystem to import
    source: PathBuf,
  },

  /// List imported base images
  Ls,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("layerbuild=debug,layerbuild_lib=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  let mut config = BuildConfig::default();
  if let Some(store) = cli.store {
    config = config.with_store(store);
  }
  let format = cli.output;

  match cli.command {
    Commands::Build {
      recipe,
      context,
      timeout,
      no_cache,
    } => {
      if timeout.is_some() {
        config = config.with_timeout(timeout);
      }
      cmd::cmd_build(config.with_no_cache(no_cache), &recipe, &context, format)
    }
    Commands::Base { command } => {
      match command {
        BaseCommands::Import { name, source } => cmd::cmd_base_import(&config, &name, &source, format)?,
        BaseCommands::Ls => cmd::cmd_base_ls(&config, format)?,
      }
      Ok(ExitCode::SUCCESS)
    }
    Commands::Inspect { layer } => cmd::cmd_inspect(&config, &layer, format).map(|()| ExitCode::SUCCESS),
    Commands::History { layer } => cmd::cmd_history(&config, &layer, format).map(|()| ExitCode::SUCCESS),
    Commands::Export { layer, dest } => cmd::cmd_export(&config, &layer, &dest, format).map(|()| ExitCode::SUCCESS),
  }
}
