//! One function per subcommand.

use std::{
  collections::BTreeMap,
  io::{self, BufRead, Write},
  path::Path,
};

use anyhow::{Context as _, bail};
use lumina_core::{
  Vault,
  backup::{ImportSummary, Snapshot},
  legacy::{JsonFileSource, LegacySource},
  migrate::{MIGRATION_FLAG, MigrationOutcome},
  model::{NewNote, SETTINGS_ID, Settings, Table, now_ms},
  store::VaultStore,
};
use lumina_crypto::{BackupDocument, EncryptionEngine};
use lumina_shell::ShellState;
use lumina_store_sqlite::{CURRENT_VERSION, OpenOutcome, RepairPolicy, SqliteStore};
use serde::Serialize;
use tokio::net::TcpListener;
use zeroize::Zeroizing;

use crate::settings::AppConfig;

// ─── Opening ──────────────────────────────────────────────────────────────────

async fn open_store(
  cfg: &AppConfig,
  policy: RepairPolicy,
) -> anyhow::Result<OpenOutcome> {
  if let Some(parent) = cfg.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  Ok(SqliteStore::open_safe(&cfg.store_path, policy).await)
}

/// Open the vault and run the legacy migration before anything reads it.
async fn open_vault(
  cfg: &AppConfig,
) -> anyhow::Result<(Vault<SqliteStore>, MigrationOutcome)> {
  let store = match open_store(cfg, RepairPolicy::Never).await? {
    OpenOutcome::Ready(store) => store,
    OpenOutcome::Broken(e) => {
      bail!("local vault is unavailable: {e}\nrun `lumina repair` to reset it")
    }
  };
  let legacy = cfg.legacy_path.as_ref().map(JsonFileSource::load);
  let source = legacy.as_ref().map(|s| s as &dyn LegacySource);
  Ok(Vault::start(store, source).await)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Read a passphrase from `env_var`, or prompt for one on stdin.
fn read_passphrase(env_var: Option<&str>) -> anyhow::Result<Zeroizing<String>> {
  if let Some(var) = env_var {
    return std::env::var(var)
      .map(Zeroizing::new)
      .with_context(|| format!("environment variable {var} is not set"));
  }
  eprint!("Passphrase: ");
  io::stderr().flush().ok();
  let mut line = Zeroizing::new(String::new());
  io::stdin().lock().read_line(&mut line)?;
  let trimmed = line.trim_end_matches(['\n', '\r']).to_owned();
  Ok(Zeroizing::new(trimmed))
}

fn confirm(question: &str) -> bool {
  eprint!("{question} [y/N] ");
  io::stderr().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line).is_ok()
    && matches!(line.trim(), "y" | "Y" | "yes")
}

// ─── Backup ───────────────────────────────────────────────────────────────────

/// Write a snapshot of the vault to `out`, sealed under `passphrase` when one
/// is given, then record the backup time.
async fn write_backup(
  cfg: &AppConfig,
  out: &Path,
  passphrase: Option<Zeroizing<String>>,
  engine: EncryptionEngine,
) -> anyhow::Result<Snapshot> {
  let (vault, _) = open_vault(cfg).await?;
  let snapshot = vault.export_snapshot().await?;

  let json = match passphrase {
    Some(passphrase) => {
      let sealed = snapshot.clone();
      let envelope = tokio::task::spawn_blocking(move || {
        engine.encrypt(&passphrase, &sealed)
      })
      .await??;
      serde_json::to_vec_pretty(&envelope)?
    }
    None => serde_json::to_vec_pretty(&snapshot)?,
  };
  tokio::fs::write(out, json)
    .await
    .with_context(|| format!("failed to write {}", out.display()))?;

  vault.settings().mark_backup(now_ms()).await?;
  Ok(snapshot)
}

/// Read a backup file and replace the vault's contents with it.
///
/// The passphrase is only asked for when the file is encrypted, and the
/// vault is not opened until the file has been decrypted.
async fn restore_backup(
  cfg: &AppConfig,
  file: &Path,
  passphrase: impl FnOnce() -> anyhow::Result<Zeroizing<String>>,
  engine: EncryptionEngine,
) -> anyhow::Result<ImportSummary> {
  let bytes = tokio::fs::read(file)
    .await
    .with_context(|| format!("failed to read {}", file.display()))?;
  let value = match BackupDocument::sniff(&bytes)? {
    BackupDocument::Plain(value) => value,
    BackupDocument::Encrypted(envelope) => {
      let passphrase = passphrase()?;
      tokio::task::spawn_blocking(move || {
        engine.decrypt(&passphrase, &envelope)
      })
      .await??
    }
  };

  let (vault, _) = open_vault(cfg).await?;
  Ok(vault.import_snapshot(value).await?)
}

pub async fn export(
  cfg: &AppConfig,
  out: &Path,
  encrypt: bool,
  passphrase_env: Option<&str>,
) -> anyhow::Result<()> {
  let passphrase =
    if encrypt { Some(read_passphrase(passphrase_env)?) } else { None };
  let snapshot =
    write_backup(cfg, out, passphrase, EncryptionEngine::default()).await?;
  tracing::info!(
    notes = snapshot.notes.len(),
    shopping = snapshot.shopping.len(),
    encrypted = encrypt,
    "exported backup to {}",
    out.display()
  );
  Ok(())
}

pub async fn import(
  cfg: &AppConfig,
  file: &Path,
  passphrase_env: Option<&str>,
) -> anyhow::Result<()> {
  let summary = restore_backup(
    cfg,
    file,
    || read_passphrase(passphrase_env),
    EncryptionEngine::default(),
  )
  .await?;
  print_json(&summary)
}

// ─── Maintenance ──────────────────────────────────────────────────────────────

pub async fn migrate(cfg: &AppConfig) -> anyhow::Result<()> {
  let (_, outcome) = open_vault(cfg).await?;
  print_json(&outcome)
}

pub async fn repair(cfg: &AppConfig, yes: bool) -> anyhow::Result<()> {
  let policy = if yes {
    RepairPolicy::Auto
  } else {
    RepairPolicy::Confirm(Box::new(|err: &lumina_core::Error| {
      eprintln!("The local vault cannot be opened: {err}");
      confirm("Delete all local data and start over?")
    }))
  };
  match open_store(cfg, policy).await? {
    OpenOutcome::Ready(store) => {
      println!("vault is ready (schema v{})", store.schema_version().await?);
      Ok(())
    }
    OpenOutcome::Broken(e) => bail!("vault is still unavailable: {e}"),
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
  store:             &'static str,
  path:              String,
  #[serde(skip_serializing_if = "Option::is_none")]
  error:             Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  schema_version:    Option<i64>,
  supported_version: i64,
  counts:            BTreeMap<String, u64>,
  migrated:          bool,
  last_backup:       Option<i64>,
  cache_version:     String,
}

async fn health_report(cfg: &AppConfig) -> anyhow::Result<HealthReport> {
  let mut report = HealthReport {
    store:             "ok",
    path:              cfg.store_path.display().to_string(),
    error:             None,
    schema_version:    None,
    supported_version: CURRENT_VERSION,
    counts:            BTreeMap::new(),
    migrated:          false,
    last_backup:       None,
    cache_version:     cfg.shell.cache_version.clone(),
  };

  match open_store(cfg, RepairPolicy::Never).await? {
    OpenOutcome::Broken(e) => {
      report.store = "broken";
      report.error = Some(e.to_string());
    }
    OpenOutcome::Ready(store) => {
      report.schema_version = Some(store.schema_version().await?);
      let (counts, migrated, settings) = store
        .transaction(Table::ALL, |tx| {
          let mut counts = BTreeMap::new();
          for table in Table::ALL {
            counts.insert(table.to_string(), tx.count(table)?);
          }
          let migrated = tx.get_meta(MIGRATION_FLAG)?.is_some();
          let settings = tx.get::<Settings>(SETTINGS_ID)?;
          Ok((counts, migrated, settings))
        })
        .await?;
      report.counts = counts;
      report.migrated = migrated;
      report.last_backup = settings.and_then(|s| s.last_backup);
    }
  }
  Ok(report)
}

pub async fn health(cfg: &AppConfig) -> anyhow::Result<()> {
  print_json(&health_report(cfg).await?)
}

// ─── Notes ────────────────────────────────────────────────────────────────────

pub async fn list_notes(cfg: &AppConfig) -> anyhow::Result<()> {
  let (vault, _) = open_vault(cfg).await?;
  for note in vault.notes().list().await? {
    let updated = chrono::DateTime::from_timestamp_millis(note.updated_at)
      .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
      .unwrap_or_default();
    let tags = if note.tags.is_empty() {
      String::new()
    } else {
      format!(" [{}]", note.tags.join(", "))
    };
    println!("{}  {updated}  {}{tags}", note.id, note.title);
  }
  Ok(())
}

pub async fn add_note(
  cfg: &AppConfig,
  title: String,
  content: String,
  tags: Vec<String>,
) -> anyhow::Result<()> {
  let (vault, _) = open_vault(cfg).await?;
  let note = vault.notes().add(NewNote { title, content, tags }).await?;
  println!("{}", note.id);
  Ok(())
}

// ─── Shell server ─────────────────────────────────────────────────────────────

pub async fn serve(cfg: AppConfig) -> anyhow::Result<()> {
  let shell = cfg.shell;
  let upstream = shell.upstream()?;
  let address = format!("{}:{}", shell.host, shell.port);
  let state = ShellState::start(shell, upstream).await?;
  let app = lumina_shell::router(state);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  axum::serve(listener, app).await.context("server error")?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use lumina_shell::ShellConfig;

  use super::*;

  fn config(dir: &Path, name: &str) -> AppConfig {
    AppConfig {
      store_path:  dir.join(name).join("vault.db"),
      legacy_path: None,
      shell:       ShellConfig::default(),
    }
  }

  fn engine() -> EncryptionEngine { EncryptionEngine::with_iterations(1_000) }

  fn passphrase(s: &str) -> Zeroizing<String> { Zeroizing::new(s.to_owned()) }

  fn no_passphrase() -> anyhow::Result<Zeroizing<String>> {
    bail!("no passphrase expected")
  }

  async fn add(cfg: &AppConfig, title: &str) {
    let (vault, _) = open_vault(cfg).await.unwrap();
    vault
      .notes()
      .add(NewNote {
        title:   title.into(),
        content: "body".into(),
        tags:    vec![],
      })
      .await
      .unwrap();
  }

  async fn titles(cfg: &AppConfig) -> Vec<String> {
    let (vault, _) = open_vault(cfg).await.unwrap();
    let mut titles: Vec<String> = vault
      .notes()
      .list()
      .await
      .unwrap()
      .into_iter()
      .map(|n| n.title)
      .collect();
    titles.sort();
    titles
  }

  fn backup_path(dir: &Path) -> PathBuf { dir.join("backup.json") }

  #[tokio::test]
  async fn plain_backup_restores_into_another_vault() {
    let dir = tempfile::tempdir().unwrap();
    let source = config(dir.path(), "source");
    let target = config(dir.path(), "target");
    add(&source, "groceries").await;
    add(&target, "stale").await;

    let out = backup_path(dir.path());
    write_backup(&source, &out, None, engine()).await.unwrap();
    let bytes = std::fs::read(&out).unwrap();
    assert!(matches!(
      BackupDocument::sniff(&bytes).unwrap(),
      BackupDocument::Plain(_)
    ));

    let summary =
      restore_backup(&target, &out, no_passphrase, engine()).await.unwrap();
    assert_eq!(summary.notes, 1);
    assert_eq!(titles(&target).await, ["groceries"]);
  }

  #[tokio::test]
  async fn encrypted_backup_restores_with_its_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    let source = config(dir.path(), "source");
    let target = config(dir.path(), "target");
    add(&source, "pharmacy hours").await;

    let out = backup_path(dir.path());
    write_backup(&source, &out, Some(passphrase("correct-horse")), engine())
      .await
      .unwrap();
    let bytes = std::fs::read(&out).unwrap();
    assert!(!String::from_utf8_lossy(&bytes).contains("pharmacy hours"));
    assert!(matches!(
      BackupDocument::sniff(&bytes).unwrap(),
      BackupDocument::Encrypted(_)
    ));

    let summary = restore_backup(
      &target,
      &out,
      || Ok(passphrase("correct-horse")),
      engine(),
    )
    .await
    .unwrap();
    assert_eq!(summary.notes, 1);
    assert_eq!(titles(&target).await, ["pharmacy hours"]);
  }

  #[tokio::test]
  async fn wrong_passphrase_leaves_the_vault_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "vault");
    add(&cfg, "first").await;

    let out = backup_path(dir.path());
    write_backup(&cfg, &out, Some(passphrase("correct-horse")), engine())
      .await
      .unwrap();
    add(&cfg, "second").await;

    let wrong = || anyhow::Ok(passphrase("wrong-horse"));
    let err = restore_backup(&cfg, &out, wrong, engine()).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<lumina_crypto::Error>(),
      Some(lumina_crypto::Error::AuthenticationFailed)
    ));
    assert_eq!(titles(&cfg).await, ["first", "second"]);
  }

  #[tokio::test]
  async fn backup_is_recorded_and_reported_by_health() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "vault");
    add(&cfg, "first").await;

    let report = health_report(&cfg).await.unwrap();
    assert_eq!(report.store, "ok");
    assert!(report.migrated);
    assert_eq!(report.last_backup, None);

    let before = now_ms();
    write_backup(&cfg, &backup_path(dir.path()), None, engine())
      .await
      .unwrap();

    let report = health_report(&cfg).await.unwrap();
    assert!(report.last_backup.is_some_and(|at| at >= before));
    assert_eq!(report.schema_version, Some(CURRENT_VERSION));
    assert_eq!(report.counts["notes"], 1);
    assert_eq!(report.counts["shopping"], 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["supportedVersion"], CURRENT_VERSION);
    assert_eq!(json["cacheVersion"], "lumina-cache-v2");
    assert!(json["lastBackup"].is_i64());
    assert!(json.get("error").is_none());
  }

  #[tokio::test]
  async fn health_reports_a_broken_store_without_repairing_it() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "vault");
    std::fs::create_dir_all(cfg.store_path.parent().unwrap()).unwrap();
    std::fs::write(&cfg.store_path, vec![0x5a_u8; 4096]).unwrap();

    let report = health_report(&cfg).await.unwrap();
    assert_eq!(report.store, "broken");
    assert!(report.error.is_some());
    assert!(report.counts.is_empty());
    assert_eq!(std::fs::read(&cfg.store_path).unwrap(), vec![0x5a_u8; 4096]);
  }
}
