//! Self-Repair Watchdog (C11) — a fixed sweep of independent repair checks,
//! each appending its own outcome to the recovery log regardless of whether
//! the others ran or found anything to do. Grounded 1:1 on
//! `original_source/src/failsafe.py`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_config::WatchdogConfig;
use sentinel_exec::CommandExecutor;
use sentinel_memory::MemoryStore;

const PRIMARY_LOG_NAME: &str = "sentinel.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAction {
    pub action: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl RepairAction {
    fn new(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { action: action.into(), detail: detail.into(), timestamp: Utc::now() }
    }
}

pub struct Watchdog {
    config: WatchdogConfig,
    logs_dir: PathBuf,
    root_dir: PathBuf,
    recovery_log_path: PathBuf,
    executor: CommandExecutor,
    memory: MemoryStore,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        root_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        recovery_log_path: impl Into<PathBuf>,
        executor: CommandExecutor,
        memory: MemoryStore,
    ) -> Self {
        Self {
            config,
            root_dir: root_dir.into(),
            logs_dir: logs_dir.into(),
            recovery_log_path: recovery_log_path.into(),
            executor,
            memory,
        }
    }

    /// Runs every repair check once, appends each action taken to the
    /// recovery log, and returns the list. A check that finds nothing wrong
    /// contributes no action (silence, not a no-op entry).
    pub async fn run_once(&self) -> Result<Vec<RepairAction>> {
        let mut actions = Vec::new();

        if let Some(action) = self.check_service().await {
            actions.push(action);
        }
        actions.extend(self.check_logs().await);
        if let Some(action) = self.check_memory_integrity().await {
            actions.push(action);
        }
        if let Some(action) = self.check_storage_writability().await {
            actions.push(action);
        }

        for action in &actions {
            if let Err(err) = sentinel_state::append_jsonl(&self.recovery_log_path, action).await {
                tracing::error!(error = %err, "watchdog: failed to append recovery record");
            }
        }

        Ok(actions)
    }

    /// Runs `run_once` every `sweep_interval_secs` until the process is
    /// terminated. The `--watchdog` CLI subcommand's daemon mode.
    pub async fn run_daemon(&self) -> Result<()> {
        let interval = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        loop {
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "watchdog: sweep failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn check_service(&self) -> Option<RepairAction> {
        let probe = self
            .executor
            .execute(&format!("systemctl is-active {}", self.config.service_unit))
            .await
            .ok()?;
        let state = probe.stdout.trim();
        if state == "active" {
            return None;
        }

        tracing::warn!(unit = %self.config.service_unit, state, "watchdog: service inactive, requesting restart");
        match self
            .executor
            .execute(&format!("systemctl restart {}", self.config.service_unit))
            .await
        {
            Ok(_) => Some(RepairAction::new(
                "service_restart",
                format!("{} was '{state}', restart requested", self.config.service_unit),
            )),
            Err(err) => Some(RepairAction::new(
                "service_restart_failed",
                format!("{} was '{state}', restart failed: {err}", self.config.service_unit),
            )),
        }
    }

    async fn check_logs(&self) -> Vec<RepairAction> {
        let mut actions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(entries) => entries,
            Err(_) => return actions,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else { continue };
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "gz") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else { continue };
            let is_primary = path.file_name().map(|n| n == PRIMARY_LOG_NAME).unwrap_or(false);

            let age_days = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .map(|modified| (Utc::now() - modified).num_days())
                .unwrap_or(0);

            if !is_primary && age_days >= self.config.log_max_age_days {
                match gzip_in_place(&path).await {
                    Ok(()) => actions.push(RepairAction::new(
                        "log_gzip",
                        format!("{} ({age_days}d old) compressed", path.display()),
                    )),
                    Err(err) => actions.push(RepairAction::new(
                        "log_gzip_failed",
                        format!("{}: {err}", path.display()),
                    )),
                }
                continue;
            }

            if is_primary && metadata.len() >= self.config.log_max_bytes {
                let rotated = path.with_file_name(format!(
                    "{PRIMARY_LOG_NAME}.{}",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                match tokio::fs::rename(&path, &rotated).await {
                    Ok(()) => match gzip_in_place(&rotated).await {
                        Ok(()) => actions.push(RepairAction::new(
                            "log_rotate",
                            format!("{} rotated at {} bytes", path.display(), metadata.len()),
                        )),
                        Err(err) => actions.push(RepairAction::new(
                            "log_rotate_gzip_failed",
                            format!("{}: {err}", rotated.display()),
                        )),
                    },
                    Err(err) => actions.push(RepairAction::new(
                        "log_rotate_failed",
                        format!("{}: {err}", path.display()),
                    )),
                }
            }
        }

        actions
    }

    async fn check_memory_integrity(&self) -> Option<RepairAction> {
        if self.memory.index_is_healthy().await {
            return None;
        }

        match self.memory.rebuild_index().await {
            Ok((count, zero_byte)) => {
                let detail = if zero_byte.is_empty() {
                    format!("rebuilt index with {count} entries")
                } else {
                    format!(
                        "rebuilt index with {count} entries, {} zero-byte files: {}",
                        zero_byte.len(),
                        zero_byte.join(", ")
                    )
                };
                Some(RepairAction::new("memory_index_rebuild", detail))
            }
            Err(err) => Some(RepairAction::new("memory_index_rebuild_failed", err.to_string())),
        }
    }

    async fn check_storage_writability(&self) -> Option<RepairAction> {
        let probe_path = self.root_dir.join(".watchdog-write-probe");
        if tokio::fs::write(&probe_path, b"ok").await.is_ok() {
            let _ = tokio::fs::remove_file(&probe_path).await;
            return None;
        }

        tracing::error!(root = %self.root_dir.display(), "watchdog: root not writable, isolating to fallback");
        match tokio::fs::create_dir_all(&self.config.fallback_root).await {
            Ok(()) => Some(RepairAction::new(
                "storage_isolation",
                format!(
                    "{} is not writable, isolated to {}",
                    self.root_dir.display(),
                    self.config.fallback_root
                ),
            )),
            Err(err) => Some(RepairAction::new(
                "storage_isolation_failed",
                format!("{} unwritable and fallback creation failed: {err}", self.root_dir.display()),
            )),
        }
    }
}

async fn gzip_in_place(path: &std::path::Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let input = std::fs::read(&path)?;
        let gz_path = path.with_extension(format!(
            "{}.gz",
            path.extension().and_then(|e| e.to_str()).unwrap_or("log")
        ));
        let file = std::fs::File::create(&gz_path)?;
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&input)?;
        encoder.finish()?;
        std::fs::remove_file(&path)?;
        Ok(())
    })
    .await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_config::ExecConfig;
    use std::time::{Duration, SystemTime};

    fn watchdog(dir: &std::path::Path) -> Watchdog {
        let mut exec_config = ExecConfig::default();
        exec_config.allowed_roots = vec![dir.to_string_lossy().to_string()];
        let executor = CommandExecutor::new(exec_config, dir.join("command_audit.jsonl"));
        let memory = MemoryStore::new(dir.join("memory"));
        Watchdog::new(
            WatchdogConfig::default(),
            dir,
            dir.join("logs"),
            dir.join("recovery.jsonl"),
            executor,
            memory,
        )
    }

    #[tokio::test]
    async fn gzips_old_non_primary_log() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs_dir).await.unwrap();
        let old_log = logs_dir.join("archived.log");
        tokio::fs::write(&old_log, b"stale content").await.unwrap();

        let old_time = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(10 * 86400));
        filetime::set_file_mtime(&old_log, old_time).unwrap();

        let wd = watchdog(dir.path());
        let actions = wd.check_logs().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "log_gzip");
        assert!(!old_log.exists());
        assert!(logs_dir.join("archived.log.gz").exists());
    }

    #[tokio::test]
    async fn rotates_oversized_primary_log() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs_dir).await.unwrap();
        let primary = logs_dir.join(PRIMARY_LOG_NAME);
        tokio::fs::write(&primary, vec![b'x'; 128]).await.unwrap();

        let mut config = WatchdogConfig::default();
        config.log_max_bytes = 64;
        let mut exec_config = ExecConfig::default();
        exec_config.allowed_roots = vec![dir.path().to_string_lossy().to_string()];
        let executor = CommandExecutor::new(exec_config, dir.path().join("command_audit.jsonl"));
        let memory = MemoryStore::new(dir.path().join("memory"));
        let wd = Watchdog::new(config, dir.path(), &logs_dir, dir.path().join("recovery.jsonl"), executor, memory);

        let actions = wd.check_logs().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "log_rotate");
        assert!(!primary.exists());
    }

    #[tokio::test]
    async fn rebuilds_missing_memory_index() {
        let dir = tempfile::tempdir().unwrap();
        let wd = watchdog(dir.path());
        let action = wd.check_memory_integrity().await;
        assert!(action.is_some());
        assert_eq!(action.unwrap().action, "memory_index_rebuild");
    }

    #[tokio::test]
    async fn skips_memory_rebuild_when_index_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let wd = watchdog(dir.path());
        wd.memory.rebuild_index().await.unwrap();
        assert!(wd.check_memory_integrity().await.is_none());
    }

    #[tokio::test]
    async fn storage_writability_passes_for_writable_root() {
        let dir = tempfile::tempdir().unwrap();
        let wd = watchdog(dir.path());
        assert!(wd.check_storage_writability().await.is_none());
    }

    #[tokio::test]
    async fn run_once_appends_to_recovery_log() {
        let dir = tempfile::tempdir().unwrap();
        let wd = watchdog(dir.path());
        let actions = wd.run_once().await.unwrap();

        let recorded: Vec<RepairAction> = sentinel_state::read_jsonl(dir.path().join("recovery.jsonl")).await.unwrap();
        assert_eq!(recorded.len(), actions.len());
    }
}
