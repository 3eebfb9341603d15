//! Local mirrors of the C1 snapshot shapes written by other workers. The
//! display controller has no direct coupling to any other component's
//! crate — it only knows the on-disk JSON/JSONL shape, not the Rust type
//! that produced it, so each struct here only carries the fields the
//! five-row layout actually renders.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeView {
    pub mode: String,
    #[serde(default)]
    pub override_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalView {
    pub goal: String,
    #[serde(default)]
    pub user_goal_active: bool,
}

impl Default for GoalView {
    fn default() -> Self {
        Self { goal: String::new(), user_goal_active: false }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiStateView {
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineStatusView {
    pub rx_at: Option<DateTime<Utc>>,
    pub tx_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSampleView {
    pub name: String,
    pub value: f64,
    #[allow(dead_code)]
    pub timestamp: DateTime<Utc>,
}

/// What the renderer needs per frame: the four snapshot reads plus the
/// latest CPU/disk health samples, gathered into one struct so the rest of
/// the module never has to know the individual file paths.
#[derive(Debug, Clone, Default)]
pub struct SystemView {
    pub mode: ModeView,
    pub goal: GoalView,
    pub ai_state: AiStateView,
    pub line_status: LineStatusView,
    pub cpu_temp_c: Option<f64>,
    pub disk_percent: Option<f64>,
}

pub struct SnapshotReader {
    state_dir: PathBuf,
}

impl SnapshotReader {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.state_dir.join(name)
    }

    pub async fn read(&self) -> SystemView {
        let mode: ModeView = sentinel_state::read_snapshot(self.path("ship_mode.json")).await;
        let goal: GoalView = sentinel_state::read_snapshot(self.path("goal.json")).await;
        let ai_state: AiStateView = sentinel_state::read_snapshot(self.path("shipos-ai-state.json")).await;
        let line_status: LineStatusView =
            sentinel_state::read_snapshot(self.path("shipos-line-status.json")).await;
        let (cpu_temp_c, disk_percent) = self.latest_health_values().await;

        SystemView { mode, goal, ai_state, line_status, cpu_temp_c, disk_percent }
    }

    /// Scans `health_history.jsonl` for the most recent `cpu_temp` and
    /// `root_disk` (falling back to `archive_disk`) samples. Tolerates a
    /// missing or partially-written file the same way every other C1
    /// reader does.
    async fn latest_health_values(&self) -> (Option<f64>, Option<f64>) {
        let entries: Vec<HealthSampleView> =
            sentinel_state::read_jsonl(self.path("health_history.jsonl")).await.unwrap_or_default();

        let mut cpu_temp = None;
        let mut disk = None;
        let mut archive_disk = None;
        for entry in entries {
            match entry.name.as_str() {
                "cpu_temp" => cpu_temp = Some(entry.value),
                "root_disk" => disk = Some(entry.value),
                "archive_disk" => archive_disk = Some(entry.value),
                _ => {}
            }
        }
        (cpu_temp, disk.or(archive_disk))
    }
}

/// Byte-boundary-safe `&text[..limit]`, used before any fixed-width or
/// scrolling transform touches a string that may contain multi-byte UTF-8
/// (the default goal text is Japanese).
pub fn safe_truncate(text: &str, limit: usize) -> &str {
    if limit >= text.len() {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_state_dir_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let reader = SnapshotReader::new(dir.path().join("state"));
        let view = reader.read().await;
        assert_eq!(view.mode.mode, "");
        assert!(view.cpu_temp_c.is_none());
        assert!(view.disk_percent.is_none());
    }

    #[tokio::test]
    async fn reads_latest_health_samples() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        let history = dir.path().join("health_history.jsonl");
        let lines = [
            r#"{"name":"cpu_temp","status":"ok","value":45.0,"message":"","timestamp":"2026-01-01T00:00:00Z"}"#,
            r#"{"name":"root_disk","status":"ok","value":30.0,"message":"","timestamp":"2026-01-01T00:00:01Z"}"#,
            r#"{"name":"cpu_temp","status":"ok","value":52.5,"message":"","timestamp":"2026-01-01T00:00:02Z"}"#,
        ];
        std::fs::write(&history, lines.join("\n") + "\n").unwrap();

        let reader = SnapshotReader::new(dir.path());
        let view = reader.read().await;
        assert_eq!(view.cpu_temp_c, Some(52.5));
        assert_eq!(view.disk_percent, Some(30.0));
    }

    #[test]
    fn safe_truncate_does_not_split_multibyte_char() {
        let text = "システムの状態";
        let truncated = safe_truncate(text, 4);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
        assert!(truncated.len() <= 4);
    }
}
