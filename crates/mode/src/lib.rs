//! Mode Manager (C2) — owns the global operating mode, records switches,
//! applies manual overrides.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use sentinel_config::{Mode, ModeConfig, ModeTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Calendar,
    User,
    System,
    Health,
    Failsafe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSnapshot {
    pub mode: Mode,
    pub since: DateTime<Utc>,
    pub override_active: bool,
    pub override_until: Option<DateTime<Utc>>,
}

impl Default for ModeSnapshot {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            since: Utc::now(),
            override_active: false,
            override_until: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeHistoryEntry {
    pub from: Mode,
    pub to: Mode,
    pub reason: String,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchResult {
    pub success: bool,
    pub old: Mode,
    pub new: Mode,
    pub message: String,
}

pub struct ModeManager {
    snapshot_path: PathBuf,
    history_path: PathBuf,
    table: ModeTable,
    snapshot: ModeSnapshot,
}

impl ModeManager {
    pub fn new(state_dir: impl Into<PathBuf>, table: ModeTable) -> Self {
        let state_dir = state_dir.into();
        Self {
            snapshot_path: state_dir.join("ship_mode.json"),
            history_path: state_dir.join("mode_history.jsonl"),
            table,
            snapshot: ModeSnapshot::default(),
        }
    }

    /// Restores persisted state, if any. Safe to call repeatedly; a
    /// missing or corrupt snapshot yields the default (autonomous, since
    /// now), per spec.md §4.1's documented-default contract.
    pub async fn load(&mut self) {
        self.snapshot = sentinel_state::read_snapshot(&self.snapshot_path).await;
    }

    pub fn current(&self) -> Mode {
        self.snapshot.mode
    }

    pub fn status(&self) -> ModeSnapshot {
        self.snapshot.clone()
    }

    pub fn get_config(&self) -> ModeConfig {
        self.table
            .get(self.snapshot.mode)
            .unwrap_or(self.table.get(Mode::default()).expect("default mode always configured"))
    }

    /// Switches to `target`. Refuses a no-op switch and, when `source` is
    /// `Calendar`, refuses while a manual override is active and
    /// unexpired. Every write — including `override_mode`'s internal call
    /// — goes through here so mode history stays complete (spec.md §4.2
    /// invariant).
    pub async fn switch(&mut self, target: Mode, reason: &str, source: Source) -> Result<SwitchResult> {
        let old = self.snapshot.mode;

        if old == target {
            return Ok(SwitchResult {
                success: true,
                old,
                new: target,
                message: "already in that mode".to_string(),
            });
        }

        if source == Source::Calendar && self.snapshot.override_active {
            let still_active = self
                .snapshot
                .override_until
                .map(|until| Utc::now() < until)
                .unwrap_or(false);
            if still_active {
                return Ok(SwitchResult {
                    success: false,
                    old,
                    new: old,
                    message: "override active".to_string(),
                });
            }
            self.snapshot.override_active = false;
            self.snapshot.override_until = None;
        }

        self.snapshot.mode = target;
        self.snapshot.since = Utc::now();

        sentinel_state::write_snapshot(&self.snapshot_path, &self.snapshot).await?;

        let entry = ModeHistoryEntry {
            from: old,
            to: target,
            reason: reason.to_string(),
            source,
            timestamp: Utc::now(),
        };
        sentinel_state::append_jsonl(&self.history_path, &entry).await?;

        tracing::info!(from = old.as_str(), to = target.as_str(), ?source, "mode switch");

        Ok(SwitchResult {
            success: true,
            old,
            new: target,
            message: format!("{} -> {}", old.as_str(), target.as_str()),
        })
    }

    /// Forces `target`, suppressing calendar-driven switches until
    /// `duration` elapses.
    pub async fn override_mode(
        &mut self,
        target: Mode,
        duration: std::time::Duration,
        source: Source,
    ) -> Result<SwitchResult> {
        self.snapshot.override_active = true;
        self.snapshot.override_until =
            Some(Utc::now() + ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero()));
        let result = self
            .switch(
                target,
                &format!("manual override ({}s)", duration.as_secs()),
                source,
            )
            .await?;
        sentinel_state::write_snapshot(&self.snapshot_path, &self.snapshot).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &std::path::Path) -> ModeManager {
        ModeManager::new(dir, ModeTable::default())
    }

    #[tokio::test]
    async fn starts_in_autonomous_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        assert_eq!(mgr.current(), Mode::Autonomous);
    }

    #[tokio::test]
    async fn switch_is_refused_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        let result = mgr.switch(Mode::Autonomous, "test", Source::System).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "already in that mode");
    }

    #[tokio::test]
    async fn switch_persists_and_appends_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        mgr.switch(Mode::UserFirst, "user arrived", Source::User).await.unwrap();

        let mut mgr2 = manager(dir.path());
        mgr2.load().await;
        assert_eq!(mgr2.current(), Mode::UserFirst);

        let history: Vec<ModeHistoryEntry> =
            sentinel_state::read_jsonl(dir.path().join("mode_history.jsonl")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, Mode::Autonomous);
        assert_eq!(history[0].to, Mode::UserFirst);
    }

    #[tokio::test]
    async fn calendar_switch_is_blocked_by_active_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        mgr.override_mode(Mode::Maintenance, std::time::Duration::from_secs(3600), Source::User)
            .await
            .unwrap();

        let result = mgr
            .switch(Mode::Autonomous, "work hours", Source::Calendar)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(mgr.current(), Mode::Maintenance);
    }

    #[tokio::test]
    async fn calendar_switch_succeeds_after_override_expires() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        mgr.override_mode(Mode::Maintenance, std::time::Duration::from_millis(1), Source::User)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let result = mgr
            .switch(Mode::Autonomous, "work hours", Source::Calendar)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(mgr.current(), Mode::Autonomous);
    }

    #[tokio::test]
    async fn get_config_reflects_current_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.load().await;
        mgr.switch(Mode::PowerSave, "night", Source::System).await.unwrap();
        let cfg = mgr.get_config();
        assert_eq!(cfg.iteration_interval_sec, 300);
    }
}
