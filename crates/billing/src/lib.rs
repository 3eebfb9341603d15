//! Cost Guard (C5) — tracks per-day and per-special-day LLM token-cost
//! budgets and gates expensive actions behind a confirmation protocol.
//! Grounded 1:1 on `original_source/src/billing_guard.py`'s `BillingGuard`.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use sentinel_config::BillingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Alert,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub warning: f64,
    pub alert: Option<f64>,
    pub stop: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub today_cost: f64,
    pub threshold: f64,
    pub is_special_day: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DailyUsage {
    cost: f64,
    requests: u64,
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageData {
    start_date: Option<DateTime<Utc>>,
    daily_usage: std::collections::BTreeMap<String, DailyUsage>,
    total_cost: f64,
    total_requests: u64,
}

impl Default for UsageData {
    fn default() -> Self {
        Self {
            start_date: None,
            daily_usage: std::collections::BTreeMap::new(),
            total_cost: 0.0,
            total_requests: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfirmationRequest {
    confirmation_id: String,
    action: String,
    estimated_cost: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationResolution {
    pub approved: bool,
}

pub struct BillingGuard {
    data_dir: PathBuf,
    config: BillingConfig,
    usage: UsageData,
}

impl BillingGuard {
    pub fn new(data_dir: impl Into<PathBuf>, config: BillingConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            config,
            usage: UsageData::default(),
        }
    }

    fn usage_path(&self) -> PathBuf {
        self.data_dir.join("usage.json")
    }

    fn confirmation_path(&self, id: &str) -> PathBuf {
        self.data_dir.join("confirmations").join(format!("{id}.json"))
    }

    fn resolution_path(&self, id: &str) -> PathBuf {
        self.data_dir.join("confirmations").join(format!("{id}.resolution.json"))
    }

    /// Loads persisted usage, stamping `start_date` to now on first-ever run
    /// (per `original_source/src/billing_guard.py`, this stamp is written
    /// once and reused across restarts — see DESIGN.md's Open Question 3).
    pub async fn load(&mut self) -> Result<()> {
        self.usage = sentinel_state::read_snapshot(self.usage_path()).await;
        if self.usage.start_date.is_none() {
            self.usage.start_date = Some(Utc::now());
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        sentinel_state::write_snapshot(self.usage_path(), &self.usage).await
    }

    fn start_date(&self) -> DateTime<Utc> {
        self.usage.start_date.unwrap_or_else(Utc::now)
    }

    pub fn days_since_start(&self) -> i64 {
        (Utc::now().date_naive() - self.start_date().date_naive()).num_days()
    }

    /// Pure predicate: day 0 (first launch) and every `special_day_cycle`th
    /// day after are special days.
    pub fn is_special_day(&self, days: i64) -> bool {
        days == 0 || days % self.config.special_day_cycle as i64 == 0
    }

    pub fn thresholds(&self) -> ThresholdSet {
        if self.is_special_day(self.days_since_start()) {
            ThresholdSet {
                warning: self.config.special_day_warning,
                alert: Some(self.config.special_day_alert),
                stop: self.config.special_day_stop,
            }
        } else {
            ThresholdSet {
                warning: self.config.normal_day_warning,
                alert: None,
                stop: self.config.normal_day_stop,
            }
        }
    }

    /// Pure cost calculation: falls back to the first configured price if
    /// `model` is unknown, matching the Python original's dict `.get`
    /// fallback to `gpt-4.1-mini`.
    pub fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.config.prices.get(model).or_else(|| self.config.prices.values().next());
        let Some(price) = price else { return 0.0 };
        price.cost(input_tokens, output_tokens)
    }

    fn today_key(&self) -> String {
        today_date().format("%Y-%m-%d").to_string()
    }

    pub async fn record(&mut self, model: &str, input_tokens: u64, output_tokens: u64) -> Result<f64> {
        let cost = self.calculate_cost(model, input_tokens, output_tokens);
        let today = self.today_key();
        let entry = self.usage.daily_usage.entry(today).or_default();
        entry.cost += cost;
        entry.requests += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;

        self.usage.total_cost += cost;
        self.usage.total_requests += 1;

        self.save().await?;
        Ok(cost)
    }

    pub fn today_cost(&self) -> f64 {
        self.usage.daily_usage.get(&self.today_key()).map(|d| d.cost).unwrap_or(0.0)
    }

    pub fn total_cost(&self) -> f64 {
        self.usage.total_cost
    }

    /// Returns the highest-triggered alert level, or `None` if today's cost
    /// is under every threshold. `stop` signals the supervisor to halt the
    /// autonomous loop.
    pub fn check(&self) -> Option<Alert> {
        let today_cost = self.today_cost();
        let thresholds = self.thresholds();
        let is_special = self.is_special_day(self.days_since_start());

        if today_cost >= thresholds.stop {
            return Some(Alert {
                level: AlertLevel::Stop,
                today_cost,
                threshold: thresholds.stop,
                is_special_day: is_special,
            });
        }
        if let Some(alert_threshold) = thresholds.alert {
            if today_cost >= alert_threshold {
                return Some(Alert {
                    level: AlertLevel::Alert,
                    today_cost,
                    threshold: alert_threshold,
                    is_special_day: is_special,
                });
            }
        }
        if today_cost >= thresholds.warning {
            return Some(Alert {
                level: AlertLevel::Warning,
                today_cost,
                threshold: thresholds.warning,
                is_special_day: is_special,
            });
        }
        None
    }

    /// Writes a confirmation request file, then polls once a second for a
    /// sibling resolution file written by the notifier/webhook path
    /// (spec.md §4.13/§4.14) until `timeout` elapses. Returns
    /// `(false, "auto-expired")` on timeout.
    pub async fn request_confirmation(
        &self,
        description: &str,
        estimated_cost: f64,
        timeout: std::time::Duration,
    ) -> Result<(bool, String)> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = ConfirmationRequest {
            confirmation_id: id.clone(),
            action: description.to_string(),
            estimated_cost,
            created_at: Utc::now(),
        };
        sentinel_state::write_snapshot(self.confirmation_path(&id), &request).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let resolution_path = self.resolution_path(&id);
            if tokio::fs::try_exists(&resolution_path).await.unwrap_or(false) {
                let resolution: ConfirmationResolution =
                    sentinel_state::read_snapshot(&resolution_path).await;
                let message = if resolution.approved {
                    "approved".to_string()
                } else {
                    "denied".to_string()
                };
                return Ok((resolution.approved, message));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok((false, "auto-expired".to_string()));
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    /// Writes the sibling resolution file an `approve:<id>` / `deny:<id>`
    /// chat reply produces (spec.md §4.14 step 4). A separate writer from
    /// `request_confirmation` by design — see DESIGN.md's note on why the
    /// request/resolution split avoids two writers touching one file.
    pub async fn resolve_confirmation(&self, id: &str, approved: bool) -> Result<()> {
        sentinel_state::write_snapshot(self.resolution_path(id), &ConfirmationResolution { approved }).await
    }
}

fn today_date() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(dir: &std::path::Path) -> BillingGuard {
        BillingGuard::new(dir, BillingConfig::default())
    }

    #[test]
    fn day_zero_and_multiples_of_cycle_are_special() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        for day in [0, 6, 12, 18, 24, 30] {
            assert!(guard.is_special_day(day), "day {day} should be special");
        }
        for day in [1, 2, 5, 7, 13] {
            assert!(!guard.is_special_day(day), "day {day} should not be special");
        }
    }

    #[tokio::test]
    async fn load_stamps_start_date_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = guard(dir.path());
        g.load().await.unwrap();
        let first_start = g.start_date();

        let mut g2 = guard(dir.path());
        g2.load().await.unwrap();
        assert_eq!(g2.start_date(), first_start);
    }

    #[tokio::test]
    async fn record_accumulates_today_and_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = guard(dir.path());
        g.load().await.unwrap();

        g.record("openai/gpt-4o-mini", 1000, 500).await.unwrap();
        g.record("openai/gpt-4o-mini", 1000, 500).await.unwrap();

        let expected_one = BillingConfig::default()
            .prices
            .get("openai/gpt-4o-mini")
            .unwrap()
            .cost(1000, 500);
        assert!((g.today_cost() - expected_one * 2.0).abs() < 1e-9);
        assert!((g.total_cost() - expected_one * 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = guard(dir.path());
        g.load().await.unwrap();
        g.record("openai/gpt-4o-mini", 1000, 500).await.unwrap();

        let mut g2 = guard(dir.path());
        g2.load().await.unwrap();
        assert!((g2.today_cost() - g.today_cost()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn check_reports_stop_once_over_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BillingConfig::default();
        config.normal_day_warning = 1.0;
        config.normal_day_stop = 2.0;
        config.special_day_cycle = 1_000_000; // force a normal day
        let mut g = BillingGuard::new(dir.path(), config);
        g.load().await.unwrap();
        g.record("openai/gpt-4o-mini", 1_000_000, 1_000_000).await.unwrap();

        let alert = g.check().expect("should trigger an alert");
        assert_eq!(alert.level, AlertLevel::Stop);
    }

    #[tokio::test]
    async fn check_is_none_under_every_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());
        assert!(g.check().is_none());
    }

    #[tokio::test]
    async fn request_confirmation_times_out_when_unanswered() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());
        let (approved, message) = g
            .request_confirmation("do a risky thing", 50.0, std::time::Duration::from_millis(1500))
            .await
            .unwrap();
        assert!(!approved);
        assert_eq!(message, "auto-expired");
    }

    #[tokio::test(start_paused = false)]
    async fn request_confirmation_honors_resolution_file() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());

        let confirm_fut = g.request_confirmation("risky thing", 50.0, std::time::Duration::from_secs(5));
        let confirmations_dir = dir.path().join("confirmations");

        let resolver = tokio::spawn(async move {
            loop {
                if let Ok(mut entries) = tokio::fs::read_dir(&confirmations_dir).await {
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        let name = entry.file_name().to_string_lossy().to_string();
                        if name.ends_with(".json") && !name.ends_with(".resolution.json") {
                            let id = name.trim_end_matches(".json");
                            let resolution_path =
                                confirmations_dir.join(format!("{id}.resolution.json"));
                            sentinel_state::write_snapshot(
                                &resolution_path,
                                &ConfirmationResolution { approved: true },
                            )
                            .await
                            .unwrap();
                            return;
                        }
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });

        let (approved, message) = confirm_fut.await.unwrap();
        resolver.await.unwrap();
        assert!(approved);
        assert_eq!(message, "approved");
    }
}
