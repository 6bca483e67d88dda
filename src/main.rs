mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use pmdeck::app::App;
use pmdeck::config::Config;
use pmdeck::context::Notifier;
use pmdeck::logging;
use pmdeck::session::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "pmdeck")]
#[command(about = "Command-line client for the project management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pmdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

/// Prints confirmations; failures reach the user through the command's
/// returned error.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn success(&self, message: &str) {
    println!("{}", message);
  }

  fn error(&self, message: &str) {
    warn!(message, "notify");
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let data_dir = Config::data_dir()?;
  let _log_guard = logging::init(&config.log, &data_dir.join("logs"))?;

  let session = SessionStore::open()?;
  let app = App::new(config, Arc::new(ConsoleNotifier), session)?;
  commands::run(&app, args.command).await?;

  Ok(())
}
