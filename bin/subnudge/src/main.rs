mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use subnudge_core::{Config, Paths};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "subnudge")]
#[command(about = "Keeps captions in sync during high-speed playback", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a browser and nudge captions on matching pages
    Run {
        /// Launch a browser instead of attaching to a running one
        #[arg(long)]
        launch: bool,

        /// Page to open when launching
        #[arg(long, requires = "launch")]
        url: Option<String>,

        /// DevTools host (overrides browser.debugHost)
        #[arg(long)]
        host: Option<String>,

        /// DevTools port (overrides browser.debugPort)
        #[arg(short, long)]
        port: Option<u16>,

        /// Playback rate at which nudging starts (overrides nudge.speedThreshold)
        #[arg(long)]
        threshold: Option<f64>,

        /// Milliseconds between ticks (overrides nudge.intervalMs)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Milliseconds between clear and restore (overrides nudge.restoreDelayMs)
        #[arg(long)]
        restore_delay_ms: Option<u64>,
    },

    /// Show configuration and open pages
    Status,

    /// Run environment diagnostics
    Doctor,

    /// Write the default configuration file
    Onboard {
        /// Overwrite an existing configuration without asking
        #[arg(long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Get a value by dot path, e.g. `nudge.speedThreshold`
    Get { key: String },
    /// Set a value by dot path
    Set { key: String, value: String },
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself.
    let config_verbose = Config::load_or_default(&Paths::new())
        .map(|c| c.logging.verbose)
        .unwrap_or(false);

    let filter = if cli.verbose || config_verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            launch,
            url,
            host,
            port,
            threshold,
            interval_ms,
            restore_delay_ms,
        } => {
            let opts = commands::run::RunOptions {
                launch,
                url,
                host,
                port,
                threshold,
                interval_ms,
                restore_delay_ms,
            };
            commands::run::run(opts).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Get { key } => {
                commands::config_cmd::get(&key).await?;
            }
            ConfigCommands::Set { key, value } => {
                commands::config_cmd::set(&key, &value).await?;
            }
            ConfigCommands::Path => {
                commands::config_cmd::path().await?;
            }
        },
        Commands::Completions { shell } => {
            commands::completions_cmd::run(&shell, Cli::command()).await?;
        }
    }

    Ok(())
}
