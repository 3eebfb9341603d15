use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sentinel_config::{AppConfig, Mode};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "sentineld", version, about = "Always-on personal autonomous agent runtime")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs the supervisor in the foreground, starting every worker.
    Run,
    /// Inspects or changes the current operating mode.
    Mode {
        #[command(subcommand)]
        command: ModeCommands,
    },
    /// Runs every health probe once and prints the result.
    Health,
    /// Inspects the memory store.
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Runs one watchdog repair sweep.
    Watchdog,
    /// Prints or rewrites the loaded configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ModeCommands {
    /// Prints the current mode and whether an override is active.
    Show,
    /// Forces a mode switch via a user-sourced override.
    Set {
        mode: String,
        /// Override duration in minutes; omit for a standing switch.
        #[arg(long)]
        minutes: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    /// Prints today's diary summary.
    Summary,
    /// Searches memory topics for a substring.
    Search { query: String },
    /// Prints the last N diary lines.
    Tail {
        #[arg(default_value_t = 20)]
        lines: usize,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Prints the effective configuration as TOML.
    Show,
    /// Writes the (possibly env-overridden) configuration back to disk.
    Save,
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    AppConfig::load_from(path).with_context(|| format!("failed to load config from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => {
            sentinel_runtime::run_supervisor(config).await?;
        }
        Commands::Mode { command } => run_mode_command(config, command).await?,
        Commands::Health => run_health_command(config).await?,
        Commands::Memory { command } => run_memory_command(config, command).await?,
        Commands::Watchdog => run_watchdog_command(config).await?,
        Commands::Config { command } => run_config_command(&cli.config, config, command)?,
    }

    Ok(())
}

async fn run_mode_command(config: AppConfig, command: ModeCommands) -> Result<()> {
    let mut manager = sentinel_mode::ModeManager::new(config.state_dir(), config.modes.clone());
    manager.load().await;

    match command {
        ModeCommands::Show => {
            let status = manager.status();
            println!("mode={} override_active={}", status.mode.as_str(), status.override_active);
        }
        ModeCommands::Set { mode, minutes } => {
            let target = Mode::parse_primary(&mode).with_context(|| format!("unrecognized mode '{mode}'"))?;
            match minutes {
                Some(minutes) => {
                    let duration = chrono::Duration::minutes(minutes);
                    manager.override_mode(target, duration, sentinel_mode::Source::User).await?;
                }
                None => {
                    manager.switch(target, "cli mode set", sentinel_mode::Source::User).await?;
                }
            }
            println!("mode set to {}", target.as_str());
        }
    }
    Ok(())
}

async fn run_health_command(config: AppConfig) -> Result<()> {
    let archive_root = Some(PathBuf::from(&config.storage.archive_root));
    let monitor = sentinel_health::HealthMonitor::new(config.health.clone(), config.state_dir(), archive_root);
    let samples = monitor.run_all().await;
    let overall = sentinel_health::HealthMonitor::overall(&samples);
    println!("overall: {overall:?}");
    for sample in &samples {
        println!("  {:<20} {:?} value={:.1} {}", sample.name, sample.status, sample.value, sample.message);
    }
    Ok(())
}

async fn run_memory_command(config: AppConfig, command: MemoryCommands) -> Result<()> {
    let memory = sentinel_memory::MemoryStore::new(config.memory_dir());
    match command {
        MemoryCommands::Summary => println!("{}", memory.summary().await),
        MemoryCommands::Search { query } => {
            for hit in memory.search(&query).await {
                println!("{hit}");
            }
        }
        MemoryCommands::Tail { lines } => {
            for line in memory.read_diary_tail(lines).await {
                println!("{line}");
            }
        }
    }
    Ok(())
}

async fn run_watchdog_command(config: AppConfig) -> Result<()> {
    let watchdog = sentinel_watchdog::Watchdog::new(
        config.watchdog.clone(),
        config.agent.root_dir.clone(),
        config.logs_dir(),
        config.logs_dir().join("recovery.jsonl"),
        sentinel_exec::CommandExecutor::new(config.exec.clone(), config.logs_dir().join("exec_audit.jsonl")),
        sentinel_memory::MemoryStore::new(config.memory_dir()),
    );
    let actions = watchdog.run_once().await?;
    if actions.is_empty() {
        println!("no repair actions taken");
    } else {
        for action in actions {
            println!("{action:?}");
        }
    }
    Ok(())
}

fn run_config_command(path: &std::path::Path, config: AppConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
        }
        ConfigCommands::Save => {
            config.save_to(path)?;
            println!("saved to {}", path.display());
        }
    }
    Ok(())
}
