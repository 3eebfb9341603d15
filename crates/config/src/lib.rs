//! Central configuration for the sentinel runtime.
//!
//! Mirrors the teacher's `AppConfig` pattern: one nested `#[serde(default)]`
//! struct per subsystem, a `load_from`/`save_to` pair backed by `toml`, and
//! environment-variable overrides applied after the file is parsed.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod mode_table;
pub mod price_table;

pub use mode_table::{Mode, ModeConfig, NotifyLevel, PriorityBias};
pub use price_table::ModelPrice;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub root_dir: String,
    pub timezone: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Sentinel".to_string(),
            root_dir: "/home/pi/sentinel".to_string(),
            timezone: "Asia/Tokyo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    pub ollama_base_url: String,
    pub openrouter_base_url: String,
    pub quick_response_model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            quick_response_model: "openai/gpt-4o-mini".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 800,
            request_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub allowed_commands: Vec<String>,
    pub allowed_roots: Vec<String>,
    pub allowed_systemctl_actions: Vec<String>,
    pub path_sensitive_commands: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            allowed_commands: [
                "ls", "cat", "echo", "pwd", "mkdir", "touch", "grep", "find", "wc", "head",
                "tail", "sort", "uniq", "date", "whoami", "hostname", "uname", "df", "du", "ps",
                "top", "free", "uptime", "which", "whereis", "git", "python3", "pip3", "node",
                "npm", "systemctl", "journalctl", "cp", "mv", "rm", "chmod", "chown",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_roots: vec!["/home/pi/sentinel".to_string(), "/mnt/hdd".to_string()],
            allowed_systemctl_actions: [
                "status",
                "restart",
                "start",
                "stop",
                "is-active",
                "is-enabled",
                "daemon-reload",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            path_sensitive_commands: [
                "cp", "mv", "rm", "chmod", "chown", "touch", "mkdir", "cat", "grep", "find", "ls",
                "head", "tail",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 30,
            max_output_bytes: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub prices: BTreeMap<String, ModelPrice>,
    pub normal_day_warning: f64,
    pub normal_day_stop: f64,
    pub special_day_warning: f64,
    pub special_day_alert: f64,
    pub special_day_stop: f64,
    pub special_day_cycle: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        let mut prices = BTreeMap::new();
        prices.insert(
            "llama3.1:8b".to_string(),
            ModelPrice {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            },
        );
        prices.insert(
            "openai/gpt-4o-mini".to_string(),
            ModelPrice {
                input_per_1k: 0.15,
                output_per_1k: 0.60,
            },
        );
        Self {
            prices,
            normal_day_warning: 200.0,
            normal_day_stop: 300.0,
            special_day_warning: 500.0,
            special_day_alert: 900.0,
            special_day_stop: 1000.0,
            special_day_cycle: 6,
            confirmation_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub cpu_temp_warn: f64,
    pub cpu_temp_critical: f64,
    pub ram_percent_warn: f64,
    pub ram_percent_critical: f64,
    pub disk_percent_warn: f64,
    pub disk_percent_critical: f64,
    pub heartbeat_warn_secs: u64,
    pub heartbeat_critical_secs: u64,
    pub service_unit: String,
    pub network_probe_host: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cpu_temp_warn: 70.0,
            cpu_temp_critical: 80.0,
            ram_percent_warn: 80.0,
            ram_percent_critical: 90.0,
            disk_percent_warn: 80.0,
            disk_percent_critical: 90.0,
            heartbeat_warn_secs: 120,
            heartbeat_critical_secs: 300,
            service_unit: "sentinel.service".to_string(),
            network_probe_host: "8.8.8.8:53".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub iteration_interval_secs: u64,
    pub max_history_messages: usize,
    pub completion_markers: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            iteration_interval_secs: 30,
            max_history_messages: 20,
            completion_markers: [
                "done", "completed", "finished", "resolved", "完了", "終わりました",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub archive_interval_secs: u64,
    pub fast_tier_check_interval_secs: u64,
    pub health_probe_interval_secs: u64,
    pub repair_sweep_interval_secs: u64,
    pub calendar_check_interval_secs: u64,
    pub fast_tier_fullness_threshold_percent: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            archive_interval_secs: 24 * 3600,
            fast_tier_check_interval_secs: 3600,
            health_probe_interval_secs: 300,
            repair_sweep_interval_secs: 600,
            calendar_check_interval_secs: 300,
            fast_tier_fullness_threshold_percent: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub service_unit: String,
    pub sweep_interval_secs: u64,
    pub log_max_age_days: i64,
    pub log_max_bytes: u64,
    pub fallback_root: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            service_unit: "sentinel.service".to_string(),
            sweep_interval_secs: 600,
            log_max_age_days: 7,
            log_max_bytes: 50 * 1024 * 1024,
            fallback_root: "/tmp/sentinel-fallback".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub fast_root: String,
    pub archive_root: String,
    pub access_threshold_days: i64,
    pub exclude_patterns: Vec<String>,
    pub large_file_threshold_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fast_root: "/home/pi/sentinel".to_string(),
            archive_root: "/mnt/hdd/archive".to_string(),
            access_threshold_days: 30,
            exclude_patterns: vec![
                "*.log".to_string(),
                "*.tmp".to_string(),
                ".git/*".to_string(),
            ],
            large_file_threshold_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub discord_webhook_url: String,
    pub line_channel_access_token: String,
    pub line_channel_secret: String,
    pub line_target_user_id: String,
    pub line_exec_log_enabled: bool,
    pub startup_cooldown_secs: u64,
    pub exec_log_window_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: String::new(),
            line_channel_access_token: String::new(),
            line_channel_secret: String::new(),
            line_target_user_id: String::new(),
            line_exec_log_enabled: false,
            startup_cooldown_secs: 300,
            exec_log_window_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub input_device_path: String,
    pub quiet_hours_start_hour: u8,
    pub quiet_hours_end_hour: u8,
    pub monologue_min_interval_secs: u64,
    pub monologue_max_interval_secs: u64,
    pub max_volume_percent: u8,
    pub volume_step_percent: u8,
    pub tts_cache_dir: String,
    pub audio_command_poll_interval_secs: u64,
    pub failsafe_message: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            input_device_path: "/dev/input/event0".to_string(),
            quiet_hours_start_hour: 23,
            quiet_hours_end_hour: 7,
            monologue_min_interval_secs: 600,
            monologue_max_interval_secs: 1800,
            max_volume_percent: 80,
            volume_step_percent: 10,
            tts_cache_dir: "/home/pi/sentinel/voice_cache".to_string(),
            audio_command_poll_interval_secs: 2,
            failsafe_message: "すみません、聞き取れませんでした。".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_ms: u64,
    pub scroll_tick_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_ms: 100,
            scroll_tick_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub ics_url: String,
    pub work_start_hour: u8,
    pub work_end_hour: u8,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            ics_url: String::new(),
            work_start_hour: 9,
            work_end_hour: 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "/home/pi/sentinel/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub modes: mode_table::ModeTable,
    pub exec: ExecConfig,
    pub planner: PlannerConfig,
    pub billing: BillingConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
    pub watchdog: WatchdogConfig,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
    pub voice: VoiceConfig,
    pub webhook: WebhookConfig,
    pub display: DisplayConfig,
    pub calendar: CalendarConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Loads `config.toml` at `path` if present, falling back to defaults,
    /// then applies environment-variable overrides for secrets. A missing
    /// file is not an error — the returned config is usable out of the box.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DISCORD_WEBHOOK_URL") {
            if !url.is_empty() {
                self.notifier.discord_webhook_url = url;
            }
        }
        if let Ok(token) = env::var("LINE_CHANNEL_ACCESS_TOKEN") {
            if !token.is_empty() {
                self.notifier.line_channel_access_token = token;
            }
        }
        if let Ok(secret) = env::var("LINE_CHANNEL_SECRET") {
            if !secret.is_empty() {
                self.notifier.line_channel_secret = secret;
            }
        }
        if let Ok(user) = env::var("LINE_TARGET_USER_ID") {
            if !user.is_empty() {
                self.notifier.line_target_user_id = user;
            }
        }
        if let Ok(flag) = env::var("LINE_EXEC_LOG_ENABLED") {
            self.notifier.line_exec_log_enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(url) = env::var("CALENDAR_ICS_URL") {
            if !url.is_empty() {
                self.calendar.ics_url = url;
            }
        }
        if let Ok(model) = env::var("QUICK_RESPONSE_MODEL") {
            if !model.is_empty() {
                self.llm.quick_response_model = model;
            }
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = key;
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }

    /// Path helpers — every subsystem derives its files from `agent.root_dir`
    /// rather than hard-coding paths, matching spec.md §6's filesystem layout.
    pub fn state_dir(&self) -> std::path::PathBuf {
        Path::new(&self.agent.root_dir).join("state")
    }

    pub fn commands_dir(&self) -> std::path::PathBuf {
        Path::new(&self.agent.root_dir).join("commands")
    }

    pub fn memory_dir(&self) -> std::path::PathBuf {
        Path::new(&self.agent.root_dir).join("memory")
    }

    pub fn billing_dir(&self) -> std::path::PathBuf {
        Path::new(&self.agent.root_dir).join("billing")
    }

    pub fn logs_dir(&self) -> std::path::PathBuf {
        Path::new(&self.agent.root_dir).join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_five_primary_modes() {
        let cfg = AppConfig::default();
        for mode in [
            Mode::Autonomous,
            Mode::UserFirst,
            Mode::Maintenance,
            Mode::PowerSave,
            Mode::Safe,
        ] {
            assert!(cfg.modes.get(mode).is_some());
        }
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = AppConfig::default();
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.agent.name, cfg.agent.name);
        assert_eq!(loaded.billing.special_day_cycle, 6);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = AppConfig::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(loaded.agent.name, "Sentinel");
    }

    #[test]
    fn env_override_applies_discord_webhook() {
        unsafe {
            env::set_var("DISCORD_WEBHOOK_URL", "https://discord.example/hooks/1");
        }
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.notifier.discord_webhook_url, "https://discord.example/hooks/1");
        unsafe {
            env::remove_var("DISCORD_WEBHOOK_URL");
        }
    }
}
