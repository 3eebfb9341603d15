//! Health Monitor (C9) — seven bounded-time probes rolled up to an overall
//! OK/WARN/CRITICAL status, used by the notifier (alerts) and the
//! self-repair watchdog (restart decisions).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Warn,
    Unknown,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub name: String,
    pub status: Status,
    pub value: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Written by the planner loop on every iteration (spec.md §3 "Heartbeat").
/// Lives alongside the other C1 snapshots under `<root>/state/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    pub last_updated: Option<DateTime<Utc>>,
    pub iteration_count: u64,
}

pub struct HealthMonitor {
    config: HealthConfig,
    state_dir: PathBuf,
    archive_root: Option<PathBuf>,
    history_path: PathBuf,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, state_dir: impl Into<PathBuf>, archive_root: Option<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let history_path = state_dir.join("health_history.jsonl");
        Self {
            config,
            state_dir,
            archive_root,
            history_path,
        }
    }

    fn heartbeat_path(&self) -> PathBuf {
        self.state_dir.join("heartbeat.json")
    }

    /// Runs all seven probes, appends the batch to `health_history.jsonl`,
    /// and returns the samples.
    pub async fn run_all(&self) -> Vec<HealthSample> {
        let mut samples = vec![
            self.probe_cpu_temp(),
            self.probe_ram(),
            self.probe_disk("root_disk", "/"),
            self.probe_network().await,
            self.probe_heartbeat().await,
            self.probe_service().await,
        ];
        if let Some(archive) = &self.archive_root {
            samples.push(self.probe_archive_disk(archive));
        } else {
            samples.push(HealthSample {
                name: "archive_disk".to_string(),
                status: Status::Unknown,
                value: 0.0,
                message: "archive tier not mounted".to_string(),
                timestamp: Utc::now(),
            });
        }

        for sample in &samples {
            let _ = sentinel_state::append_jsonl(&self.history_path, sample).await;
        }
        samples
    }

    /// Worst status across `samples`, per the fixed order OK < WARN <
    /// UNKNOWN < CRITICAL (spec.md §8 "health worst-of").
    pub fn overall(samples: &[HealthSample]) -> Status {
        samples.iter().map(|s| s.status).max().unwrap_or(Status::Unknown)
    }

    /// Only the WARN/CRITICAL entries, for the notifier's alert path.
    pub fn alerts(samples: &[HealthSample]) -> Vec<&HealthSample> {
        samples
            .iter()
            .filter(|s| matches!(s.status, Status::Warn | Status::Critical))
            .collect()
    }

    fn probe_cpu_temp(&self) -> HealthSample {
        let raw = std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp").ok();
        let celsius = raw.and_then(|s| s.trim().parse::<f64>().ok()).map(|m| m / 1000.0);

        match celsius {
            Some(temp) => HealthSample {
                name: "cpu_temp".to_string(),
                status: threshold_status(temp, self.config.cpu_temp_warn, self.config.cpu_temp_critical),
                value: temp,
                message: format!("{temp:.1}C"),
                timestamp: Utc::now(),
            },
            None => unknown_sample("cpu_temp", "thermal zone unreadable"),
        }
    }

    fn probe_ram(&self) -> HealthSample {
        let meminfo = match std::fs::read_to_string("/proc/meminfo") {
            Ok(m) => m,
            Err(_) => return unknown_sample("ram", "/proc/meminfo unreadable"),
        };

        let total = meminfo_field_kb(&meminfo, "MemTotal");
        let available = meminfo_field_kb(&meminfo, "MemAvailable");
        let (Some(total), Some(available)) = (total, available) else {
            return unknown_sample("ram", "could not parse /proc/meminfo");
        };
        if total == 0 {
            return unknown_sample("ram", "MemTotal reported zero");
        }

        let used_percent = 100.0 * (1.0 - (available as f64 / total as f64));
        HealthSample {
            name: "ram".to_string(),
            status: threshold_status(used_percent, self.config.ram_percent_warn, self.config.ram_percent_critical),
            value: used_percent,
            message: format!("{used_percent:.1}% used"),
            timestamp: Utc::now(),
        }
    }

    fn probe_disk(&self, name: &str, path: &str) -> HealthSample {
        disk_sample(name, path, self.config.disk_percent_warn, self.config.disk_percent_critical)
    }

    fn probe_archive_disk(&self, archive_root: &Path) -> HealthSample {
        if !archive_root.exists() {
            return HealthSample {
                name: "archive_disk".to_string(),
                status: Status::Critical,
                value: 0.0,
                message: "archive tier not mounted".to_string(),
                timestamp: Utc::now(),
            };
        }
        disk_sample(
            "archive_disk",
            &archive_root.to_string_lossy(),
            self.config.disk_percent_warn,
            self.config.disk_percent_critical,
        )
    }

    async fn probe_network(&self) -> HealthSample {
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            tokio::net::TcpStream::connect(&self.config.network_probe_host),
        )
        .await;

        match result {
            Ok(Ok(_)) => HealthSample {
                name: "network".to_string(),
                status: Status::Ok,
                value: 1.0,
                message: "reachable".to_string(),
                timestamp: Utc::now(),
            },
            _ => HealthSample {
                name: "network".to_string(),
                status: Status::Critical,
                value: 0.0,
                message: format!("unreachable: {}", self.config.network_probe_host),
                timestamp: Utc::now(),
            },
        }
    }

    async fn probe_heartbeat(&self) -> HealthSample {
        let snapshot: HeartbeatSnapshot = sentinel_state::read_snapshot(self.heartbeat_path()).await;
        let Some(last_updated) = snapshot.last_updated else {
            return unknown_sample("planner_heartbeat", "no heartbeat recorded yet");
        };

        let age_secs = (Utc::now() - last_updated).num_seconds().max(0) as u64;
        let status = if age_secs >= self.config.heartbeat_critical_secs {
            Status::Critical
        } else if age_secs >= self.config.heartbeat_warn_secs {
            Status::Warn
        } else {
            Status::Ok
        };

        HealthSample {
            name: "planner_heartbeat".to_string(),
            status,
            value: age_secs as f64,
            message: format!("last update {age_secs}s ago"),
            timestamp: Utc::now(),
        }
    }

    async fn probe_service(&self) -> HealthSample {
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::process::Command::new("systemctl")
                .arg("is-active")
                .arg(&self.config.service_unit)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(out)) => {
                let state = String::from_utf8_lossy(&out.stdout).trim().to_string();
                let status = if state == "active" { Status::Ok } else { Status::Critical };
                HealthSample {
                    name: "service".to_string(),
                    status,
                    value: if state == "active" { 1.0 } else { 0.0 },
                    message: state,
                    timestamp: Utc::now(),
                }
            }
            _ => unknown_sample("service", "systemctl is-active probe failed to run"),
        }
    }
}

fn threshold_status(value: f64, warn: f64, critical: f64) -> Status {
    if value >= critical {
        Status::Critical
    } else if value >= warn {
        Status::Warn
    } else {
        Status::Ok
    }
}

fn unknown_sample(name: &str, message: &str) -> HealthSample {
    HealthSample {
        name: name.to_string(),
        status: Status::Unknown,
        value: 0.0,
        message: message.to_string(),
        timestamp: Utc::now(),
    }
}

fn meminfo_field_kb(meminfo: &str, field: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with(field))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
}

fn disk_sample(name: &str, path: &str, warn: f64, critical: f64) -> HealthSample {
    let total = fs2::total_space(path);
    let available = fs2::available_space(path);
    match (total, available) {
        (Ok(total), Ok(available)) if total > 0 => {
            let used_percent = 100.0 * (1.0 - (available as f64 / total as f64));
            HealthSample {
                name: name.to_string(),
                status: threshold_status(used_percent, warn, critical),
                value: used_percent,
                message: format!("{used_percent:.1}% used"),
                timestamp: Utc::now(),
            }
        }
        _ => unknown_sample(name, &format!("could not stat {path}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_is_worst_of_samples() {
        let samples = vec![
            HealthSample { name: "a".into(), status: Status::Ok, value: 0.0, message: String::new(), timestamp: Utc::now() },
            HealthSample { name: "b".into(), status: Status::Warn, value: 0.0, message: String::new(), timestamp: Utc::now() },
            HealthSample { name: "c".into(), status: Status::Critical, value: 0.0, message: String::new(), timestamp: Utc::now() },
        ];
        assert_eq!(HealthMonitor::overall(&samples), Status::Critical);
    }

    #[test]
    fn alerts_excludes_ok_and_unknown() {
        let samples = vec![
            HealthSample { name: "a".into(), status: Status::Ok, value: 0.0, message: String::new(), timestamp: Utc::now() },
            HealthSample { name: "b".into(), status: Status::Unknown, value: 0.0, message: String::new(), timestamp: Utc::now() },
            HealthSample { name: "c".into(), status: Status::Warn, value: 0.0, message: String::new(), timestamp: Utc::now() },
        ];
        let alerts = HealthMonitor::alerts(&samples);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "c");
    }

    #[test]
    fn threshold_status_cpu_example_from_spec() {
        assert_eq!(threshold_status(82.0, 70.0, 80.0), Status::Critical);
        assert_eq!(threshold_status(91.0, 80.0, 90.0), Status::Critical);
    }

    #[tokio::test]
    async fn heartbeat_probe_is_unknown_without_prior_write() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = HealthMonitor::new(HealthConfig::default(), dir.path(), None);
        let sample = monitor.probe_heartbeat().await;
        assert_eq!(sample.status, Status::Unknown);
    }

    #[tokio::test]
    async fn heartbeat_probe_is_critical_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = HealthMonitor::new(HealthConfig::default(), dir.path(), None);
        let stale = HeartbeatSnapshot {
            last_updated: Some(Utc::now() - chrono::Duration::seconds(400)),
            iteration_count: 1,
        };
        sentinel_state::write_snapshot(monitor.heartbeat_path(), &stale).await.unwrap();
        let sample = monitor.probe_heartbeat().await;
        assert_eq!(sample.status, Status::Critical);
    }
}
