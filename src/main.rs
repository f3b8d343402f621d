//! Stash CLI - runs one cache operation against the configured driver
//!
//! The driver is selected from `STASH_*` environment variables (see
//! [`stash::Config::from_env`]). Values are stored as UTF-8 strings.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stash::{Config, Context, Stash};

#[derive(Parser, Debug)]
#[command(name = "stash")]
#[command(about = "Cache facade over memory, file and remote drivers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY
    Get { key: String },
    /// Store VALUE under KEY for --ttl seconds
    Put {
        key: String,
        value: String,
        #[arg(long, default_value = "300")]
        ttl: u64,
    },
    /// Store VALUE only if KEY holds no live value
    Add {
        key: String,
        value: String,
        #[arg(long, default_value = "300")]
        ttl: u64,
    },
    /// Store VALUE under KEY with no expiry
    Forever { key: String, value: String },
    /// Remove KEY
    Forget { key: String },
    /// Remove every value owned by the driver
    Flush,
    /// Exit 0 if KEY holds a live value, 1 otherwise
    Has { key: String },
    /// Print the value stored under KEY and remove it
    Pull { key: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stash=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    info!(
        driver = ?config.driver,
        format = %config.format,
        "configuration loaded"
    );

    let stash = Stash::from_config(&config)
        .await
        .context("failed to initialize cache driver")?;
    let ctx = Context::background();

    run(&stash, &ctx, args.command).await
}

async fn run(stash: &Stash, ctx: &Context, command: Command) -> Result<ExitCode> {
    match command {
        Command::Get { key } => match stash.get::<String>(ctx, &key).await {
            Ok(value) => println!("{value}"),
            Err(err) if err.is_cache_miss() => return Ok(ExitCode::FAILURE),
            Err(err) => return Err(err.into()),
        },
        Command::Put { key, value, ttl } => {
            stash
                .put(ctx, &key, &value, Duration::from_secs(ttl))
                .await?;
        }
        Command::Add { key, value, ttl } => {
            let added = stash
                .add(ctx, &key, &value, Duration::from_secs(ttl))
                .await?;
            println!("{added}");
            if !added {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Forever { key, value } => {
            stash.forever(ctx, &key, &value).await?;
        }
        Command::Forget { key } => {
            let removed = stash.forget(ctx, &key).await?;
            println!("{removed}");
        }
        Command::Flush => {
            stash.flush(ctx).await?;
            info!(driver = stash.driver().name(), "cache flushed");
        }
        Command::Has { key } => {
            if !stash.has(ctx, &key).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Pull { key } => match stash.pull::<String>(ctx, &key).await {
            Ok(pulled) => {
                println!("{}", pulled.value);
                if let Some(err) = pulled.forget_error {
                    return Err(anyhow::Error::new(err).context("value read but not removed"));
                }
            }
            Err(err) if err.is_cache_miss() => return Ok(ExitCode::FAILURE),
            Err(err) => return Err(err.into()),
        },
    }

    Ok(ExitCode::SUCCESS)
}
