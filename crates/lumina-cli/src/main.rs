//! `lumina`: local vault maintenance and the offline shell server.
//!
//! # Usage
//!
//! ```text
//! lumina health
//! lumina export --encrypt --out backup.json
//! lumina import backup.json
//! lumina repair --yes
//! lumina serve
//! ```

mod commands;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use settings::AppConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lumina", version, about = "Offline-first personal data vault")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "lumina.toml")]
  config: PathBuf,

  /// Vault database, overriding the config file.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Write a full snapshot of the vault to a file.
  Export {
    #[arg(short, long, value_name = "FILE")]
    out:            PathBuf,
    /// Seal the snapshot under a passphrase.
    #[arg(long)]
    encrypt:        bool,
    /// Read the passphrase from this environment variable instead of stdin.
    #[arg(long, value_name = "VAR")]
    passphrase_env: Option<String>,
  },
  /// Replace the vault's contents with a backup file (plain or encrypted).
  Import {
    file:           PathBuf,
    #[arg(long, value_name = "VAR")]
    passphrase_env: Option<String>,
  },
  /// Run the one-time legacy import and report what happened.
  Migrate,
  /// Reset a vault that cannot be opened. Destroys all local data.
  Repair {
    /// Do not ask for confirmation.
    #[arg(long)]
    yes: bool,
  },
  /// Print a JSON report on the vault.
  Health,
  #[command(subcommand)]
  Notes(NotesCommand),
  /// Serve the offline app shell.
  Serve,
}

#[derive(Subcommand, Debug)]
enum NotesCommand {
  List,
  Add {
    title:   String,
    #[arg(default_value = "")]
    content: String,
    #[arg(short, long = "tag")]
    tags:    Vec<String>,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut cfg = AppConfig::load(&cli.config)?;
  if let Some(store) = cli.store {
    cfg.store_path = settings::expand_tilde(&store);
  }

  match cli.command {
    Command::Export { out, encrypt, passphrase_env } => {
      commands::export(&cfg, &out, encrypt, passphrase_env.as_deref()).await
    }
    Command::Import { file, passphrase_env } => {
      commands::import(&cfg, &file, passphrase_env.as_deref()).await
    }
    Command::Migrate => commands::migrate(&cfg).await,
    Command::Repair { yes } => commands::repair(&cfg, yes).await,
    Command::Health => commands::health(&cfg).await,
    Command::Notes(NotesCommand::List) => commands::list_notes(&cfg).await,
    Command::Notes(NotesCommand::Add { title, content, tags }) => {
      commands::add_note(&cfg, title, content, tags).await
    }
    Command::Serve => commands::serve(cfg).await,
  }
}
