//! Notifier (C13) — outbound chat push, filtered by the current mode's
//! `notify_level`, plus the exec-log toggle and the startup-push cooldown.
//! Two egress channels: a reliable webhook push (Discord) and an
//! interactive chat provider push (LINE) — both are thin HTTP calls to the
//! external collaborators named in spec.md §1/§6.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use sentinel_config::{NotifierConfig, NotifyLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTier {
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostTier {
    Warning,
    Alert,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Startup,
    Shutdown,
    ExecutionLog,
    Error,
    MemorySummary,
    QueryReply,
    CostAlert(CostTier),
    Health(HealthTier),
    Status,
}

/// Whether `level` passes the filter for `notify_level`, per spec.md
/// §4.13's nested tiers: each named tier adds to the set below it.
/// `responsive` adds levels that are direct responses to user action
/// (execution log, memory summaries); `status` adds the lifecycle levels;
/// `critical`/`minimal` share the same baseline (cost stop/alert, error,
/// critical health).
pub fn is_allowed(notify_level: NotifyLevel, level: Level) -> bool {
    let critical_set = matches!(
        level,
        Level::CostAlert(CostTier::Stop) | Level::CostAlert(CostTier::Alert) | Level::Error | Level::Health(HealthTier::Critical)
    );

    match notify_level {
        NotifyLevel::All => true,
        NotifyLevel::Critical | NotifyLevel::Minimal => critical_set,
        NotifyLevel::Status => critical_set || matches!(level, Level::Status | Level::Startup | Level::Shutdown),
        NotifyLevel::Responsive => {
            is_allowed(NotifyLevel::Status, level)
                || matches!(level, Level::MemorySummary | Level::ExecutionLog | Level::QueryReply)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StartupFlag {
    last_push: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExecLogWindow {
    enabled_until: Option<DateTime<Utc>>,
}

pub struct Notifier {
    config: NotifierConfig,
    state_dir: PathBuf,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            state_dir: state_dir.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    fn startup_flag_path(&self) -> PathBuf {
        self.state_dir.join("startup_flag.json")
    }

    fn exec_log_path(&self) -> PathBuf {
        self.state_dir.join("exec_log_window.json")
    }

    /// Pushes `message` at `level` through both channels, subject to the
    /// mode's `notify_level` filter. Failures on either channel are logged
    /// and non-fatal — per spec.md §7, transport errors here only warrant a
    /// warn, never a crash.
    pub async fn notify(&self, notify_level: NotifyLevel, level: Level, message: &str) {
        if !is_allowed(notify_level, level) {
            return;
        }
        self.push_discord(message).await;
        self.push_line(message).await;
    }

    /// Startup push, gated by a cooldown so a fast restart loop does not
    /// spam the chat provider (spec.md §4.13 "startup-flag file").
    pub async fn notify_startup(&self, notify_level: NotifyLevel, message: &str) {
        let flag: StartupFlag = sentinel_state::read_snapshot(self.startup_flag_path()).await;
        let cooldown = chrono::Duration::seconds(self.config.startup_cooldown_secs as i64);
        if let Some(last) = flag.last_push {
            if Utc::now() - last < cooldown {
                return;
            }
        }
        self.notify(notify_level, Level::Startup, message).await;
        let _ = sentinel_state::write_snapshot(
            self.startup_flag_path(),
            &StartupFlag { last_push: Some(Utc::now()) },
        )
        .await;
    }

    pub async fn notify_shutdown(&self, notify_level: NotifyLevel, message: &str) {
        self.notify(notify_level, Level::Shutdown, message).await;
    }

    /// Enables the exec-log window for `exec_log_window_secs` (default 30
    /// minutes), matching the `log on` chat command (spec.md §6).
    pub async fn enable_exec_log_window(&self) {
        let until = Utc::now() + chrono::Duration::seconds(self.config.exec_log_window_secs as i64);
        let _ = sentinel_state::write_snapshot(self.exec_log_path(), &ExecLogWindow { enabled_until: Some(until) }).await;
    }

    pub async fn disable_exec_log_window(&self) {
        let _ = sentinel_state::write_snapshot(self.exec_log_path(), &ExecLogWindow { enabled_until: None }).await;
    }

    /// True when `LINE_EXEC_LOG_ENABLED` is set, or the chat-toggled window
    /// is still open.
    pub async fn exec_log_enabled(&self) -> bool {
        if self.config.line_exec_log_enabled {
            return true;
        }
        let window: ExecLogWindow = sentinel_state::read_snapshot(self.exec_log_path()).await;
        window.enabled_until.map(|until| Utc::now() < until).unwrap_or(false)
    }

    async fn push_discord(&self, message: &str) {
        if self.config.discord_webhook_url.is_empty() {
            return;
        }
        let result = self
            .http
            .post(&self.config.discord_webhook_url)
            .json(&json!({ "content": message }))
            .send()
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "notifier: discord push failed");
        }
    }

    async fn push_line(&self, message: &str) {
        if self.config.line_channel_access_token.is_empty() || self.config.line_target_user_id.is_empty() {
            return;
        }
        let result = self
            .http
            .post("https://api.line.me/v2/bot/message/push")
            .bearer_auth(&self.config.line_channel_access_token)
            .json(&json!({
                "to": self.config.line_target_user_id,
                "messages": [{ "type": "text", "text": message }],
            }))
            .send()
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "notifier: line push failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_passes_everything() {
        assert!(is_allowed(NotifyLevel::All, Level::ExecutionLog));
        assert!(is_allowed(NotifyLevel::All, Level::MemorySummary));
    }

    #[test]
    fn critical_blocks_status_and_execution_log() {
        assert!(!is_allowed(NotifyLevel::Critical, Level::Status));
        assert!(!is_allowed(NotifyLevel::Critical, Level::ExecutionLog));
        assert!(is_allowed(NotifyLevel::Critical, Level::CostAlert(CostTier::Stop)));
        assert!(is_allowed(NotifyLevel::Critical, Level::Health(HealthTier::Critical)));
        assert!(!is_allowed(NotifyLevel::Critical, Level::Health(HealthTier::Warn)));
    }

    #[test]
    fn status_adds_lifecycle_levels() {
        assert!(is_allowed(NotifyLevel::Status, Level::Startup));
        assert!(is_allowed(NotifyLevel::Status, Level::Status));
        assert!(!is_allowed(NotifyLevel::Status, Level::ExecutionLog));
    }

    #[test]
    fn responsive_adds_execution_log_and_memory_summary() {
        assert!(is_allowed(NotifyLevel::Responsive, Level::ExecutionLog));
        assert!(is_allowed(NotifyLevel::Responsive, Level::MemorySummary));
        assert!(is_allowed(NotifyLevel::Responsive, Level::QueryReply));
        assert!(is_allowed(NotifyLevel::Responsive, Level::Startup));
    }

    #[test]
    fn minimal_matches_critical_baseline() {
        assert_eq!(is_allowed(NotifyLevel::Minimal, Level::Error), is_allowed(NotifyLevel::Critical, Level::Error));
        assert!(!is_allowed(NotifyLevel::Minimal, Level::Status));
    }

    #[tokio::test]
    async fn startup_cooldown_suppresses_repeat_push() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NotifierConfig::default();
        config.startup_cooldown_secs = 300;
        let notifier = Notifier::new(config, dir.path());

        // No discord/line configured, so notify() is a no-op network-wise,
        // but the cooldown bookkeeping is still exercised.
        notifier.notify_startup(NotifyLevel::All, "up").await;
        let flag: StartupFlag = sentinel_state::read_snapshot(notifier.startup_flag_path()).await;
        assert!(flag.last_push.is_some());
    }

    #[tokio::test]
    async fn exec_log_window_expires() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(NotifierConfig::default(), dir.path());
        assert!(!notifier.exec_log_enabled().await);
        notifier.enable_exec_log_window().await;
        assert!(notifier.exec_log_enabled().await);
        notifier.disable_exec_log_window().await;
        assert!(!notifier.exec_log_enabled().await);
    }
}
