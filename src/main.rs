mod cache;
mod commands;
mod config;
mod error;
mod harvest;
mod logging;
mod quickstart;
mod stack;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use crate::cache::{CacheLayer, NoopStorage, SqliteStorage};
use crate::commands::Command;
use crate::harvest::{CachedHarvestClient, HarvestClient, Session};
use crate::stack::TimerStack;

#[derive(Parser, Debug)]
#[command(name = "scythe")]
#[command(about = "A command-line client for Harvest time tracking")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/scythe/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Skip the response cache for this run
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(&config::Config::log_dir())?;

  // Authorizing must work before there is anything to authorize with
  let command = match args.command {
    Command::Auth {
      access_token,
      refresh_token,
    } => return commands::auth(access_token, refresh_token),
    command => command,
  };

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let session = Session::new(config.session_config()?, config::Config::load_credentials()?)?
    .on_refresh(|credentials| {
      if let Err(e) = config::Config::save_credentials(credentials) {
        tracing::warn!(error = %e, "failed to persist refreshed credentials");
      }
    });

  let mut cache = if args.no_cache {
    CacheLayer::new(NoopStorage)
  } else {
    CacheLayer::new(SqliteStorage::open_default()?)
  };
  if let Some(ttl) = config.cache_ttl() {
    cache = cache.with_ttl(ttl);
  }

  let client = CachedHarvestClient::new(HarvestClient::new(session), cache);
  let mut stack = TimerStack::open_default(config.stack.max_size)?;

  // Save the stack whether or not the command succeeded
  let result = commands::run(command, &client, &mut stack).await;
  let saved = stack.save();
  result?;
  saved?;

  Ok(())
}
