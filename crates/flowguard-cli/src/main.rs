use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowguard_core::{CacheProfile, ResilienceConfig};

mod replay;

use replay::{Replay, Script};

#[derive(Parser)]
#[command(name = "flowguard")]
#[command(about = "Check resilience configs and replay cache/breaker scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the resolved configuration
    Check {
        /// YAML or JSON config file
        config: PathBuf,
    },

    /// Run a step script against one cache and one breaker on a virtual clock
    Replay {
        /// YAML or JSON script
        script: PathBuf,

        /// Config file supplying the cache and breaker sections
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Which cache section of the config to use
        #[arg(short, long, value_enum, default_value_t = Profile::General)]
        profile: Profile,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    General,
    Video,
    Image,
}

impl From<Profile> for CacheProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::General => CacheProfile::General,
            Profile::Video => CacheProfile::Video,
            Profile::Image => CacheProfile::Image,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let resolved = load_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::Replay {
            script,
            config,
            profile,
        } => {
            let resilience = match config {
                Some(path) => load_config(&path)?,
                None => ResilienceConfig::default(),
            };
            let script = Script::from_file(&script)?;
            let replay = Replay::from_script(&script, &resilience, profile.into())
                .context("Failed to build cache and breaker for replay")?;

            for line in replay.run(&script.steps).await {
                println!("{}", serde_json::to_string(&line)?);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ResilienceConfig> {
    ResilienceConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
