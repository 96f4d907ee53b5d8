use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

use subway::cleanup::clean_up;
use subway::config::{
    format_config, generate_default_config, Config, ConfigOverrides, DEFAULT_CONFIG_FILE,
};
use subway::lifecycle::Coordinator;
use subway::logging::{init_logging, LogConfig, Verbosity};
use subway::shutdown::Shutdown;

#[derive(Parser)]
#[command(name = "subway")]
#[command(version)]
#[command(about = "Serve a local directory as a Tor hidden service")]
#[command(
    long_about = "Runs a private tor instance, waits for it to publish a .onion address, and serves a local directory (or forwards to another address) through that hidden service until interrupted."
)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Increase diagnostic output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write diagnostics to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tor and serve the root directory (the default)
    Run(RunArgs),
    /// Write the default configuration file
    Gen {
        /// Where to write the configuration
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
    /// Remove the .subway/ directory and the configuration file
    Clean {
        /// Configuration file to remove
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Print the effective configuration
    Show(RunArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Load config from this file instead of ./subway.json
    #[arg(long)]
    load: Option<PathBuf>,

    /// Root directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// Port to serve on
    #[arg(long)]
    port: Option<u16>,

    /// Path to the tor executable
    #[arg(long = "tor")]
    tor_path: Option<PathBuf>,

    /// Forward hidden service traffic to this address (e.g. localhost:8080)
    #[arg(long = "pf")]
    port_forwarding: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            root: self.root.clone(),
            port: self.port,
            tor_path: self.tor_path.clone(),
            port_forwarding: self.port_forwarding.clone(),
        }
    }

    /// Defaults, then the config file, then explicit flags.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match self.load {
            Some(ref path) => Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load_or_default(Path::new(DEFAULT_CONFIG_FILE)),
        };

        config.apply_overrides(&self.overrides());
        Ok(config)
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let base_dir = std::env::current_dir().context("Failed to get current directory")?;

    let coordinator = Coordinator::new(config, &base_dir);
    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    let result = coordinator.run(&shutdown).await;
    signals.abort();

    let report = result?;
    debug!(?report, "Run finished");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_occurrences(cli.verbose),
        log_file: cli.log_file.clone(),
    });

    let result = match cli.command {
        None => run(cli.run).await,
        Some(Commands::Run(args)) => run(args).await,
        Some(Commands::Gen { output }) => generate_default_config(&output)
            .with_context(|| format!("Failed to generate default config at {}", output.display()))
            .map(|()| println!("✓ Default config generated: {}", output.display())),
        Some(Commands::Clean { config }) => std::env::current_dir()
            .context("Failed to get current directory")
            .and_then(|cwd| clean_up(&cwd, &config).context("Cleanup failed"))
            .map(|()| println!("✓ Cleanup successful")),
        Some(Commands::Show(args)) => args
            .resolve_config()
            .map(|config| println!("{}", format_config(&config))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
