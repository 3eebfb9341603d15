//! The operating-mode config table (spec.md §3, §4.2).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One of the five primary operating modes, plus the four transient forced
/// states that only the watchdog or display controller may set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Autonomous,
    UserFirst,
    Maintenance,
    PowerSave,
    Safe,
    Boot,
    Storm,
    Emergency,
    Shutdown,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Autonomous
    }
}

impl Mode {
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            Mode::Autonomous | Mode::UserFirst | Mode::Maintenance | Mode::PowerSave | Mode::Safe
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Autonomous => "autonomous",
            Mode::UserFirst => "user_first",
            Mode::Maintenance => "maintenance",
            Mode::PowerSave => "power_save",
            Mode::Safe => "safe",
            Mode::Boot => "boot",
            Mode::Storm => "storm",
            Mode::Emergency => "emergency",
            Mode::Shutdown => "shutdown",
        }
    }

    /// Parses one of the five primary mode names (case-insensitive), as
    /// accepted by the `mode <name>` chat command (spec.md §6).
    pub fn parse_primary(text: &str) -> Option<Mode> {
        match text.to_lowercase().as_str() {
            "autonomous" => Some(Mode::Autonomous),
            "user_first" => Some(Mode::UserFirst),
            "maintenance" => Some(Mode::Maintenance),
            "power_save" => Some(Mode::PowerSave),
            "safe" => Some(Mode::Safe),
            _ => None,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Mode::Autonomous => "\u{26f5}",
            Mode::UserFirst => "\u{1f3e0}",
            Mode::Maintenance => "\u{1f527}",
            Mode::PowerSave => "\u{1f319}",
            Mode::Safe => "\u{1f198}",
            Mode::Boot => "\u{1f6a9}",
            Mode::Storm => "\u{26a1}",
            Mode::Emergency => "\u{1f6a8}",
            Mode::Shutdown => "\u{23fb}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    All,
    Critical,
    Status,
    Responsive,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBias {
    System,
    User,
    Maintenance,
    None,
    Safety,
}

/// Per-mode behavior contract that every subsystem reads at its own tick
/// boundary (spec.md §9 "Cyclic config vs. workers").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeConfig {
    pub iteration_interval_sec: u64,
    pub notify_level: NotifyLevel,
    pub autonomous_tasks_enabled: bool,
    pub priority_bias: PriorityBias,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTable(BTreeMap<Mode, ModeConfig>);

impl ModeTable {
    pub fn get(&self, mode: Mode) -> Option<ModeConfig> {
        self.0.get(&mode).copied()
    }

    pub fn insert(&mut self, mode: Mode, config: ModeConfig) {
        self.0.insert(mode, config);
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            Mode::Autonomous,
            ModeConfig {
                iteration_interval_sec: 30,
                notify_level: NotifyLevel::Minimal,
                autonomous_tasks_enabled: true,
                priority_bias: PriorityBias::System,
            },
        );
        table.insert(
            Mode::UserFirst,
            ModeConfig {
                iteration_interval_sec: 10,
                notify_level: NotifyLevel::Responsive,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::User,
            },
        );
        table.insert(
            Mode::Maintenance,
            ModeConfig {
                iteration_interval_sec: 60,
                notify_level: NotifyLevel::Status,
                autonomous_tasks_enabled: true,
                priority_bias: PriorityBias::Maintenance,
            },
        );
        table.insert(
            Mode::PowerSave,
            ModeConfig {
                iteration_interval_sec: 300,
                notify_level: NotifyLevel::Critical,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::None,
            },
        );
        table.insert(
            Mode::Safe,
            ModeConfig {
                iteration_interval_sec: 60,
                notify_level: NotifyLevel::All,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::Safety,
            },
        );
        // Transient forced states: conservative, hardcoded, never offered
        // through `switch()` by ordinary sources — only the watchdog or
        // display controller sets these.
        table.insert(
            Mode::Boot,
            ModeConfig {
                iteration_interval_sec: 60,
                notify_level: NotifyLevel::Status,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::System,
            },
        );
        table.insert(
            Mode::Storm,
            ModeConfig {
                iteration_interval_sec: 120,
                notify_level: NotifyLevel::Critical,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::Safety,
            },
        );
        table.insert(
            Mode::Emergency,
            ModeConfig {
                iteration_interval_sec: 9_999,
                notify_level: NotifyLevel::All,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::Safety,
            },
        );
        table.insert(
            Mode::Shutdown,
            ModeConfig {
                iteration_interval_sec: 9_999,
                notify_level: NotifyLevel::All,
                autonomous_tasks_enabled: false,
                priority_bias: PriorityBias::None,
            },
        );
        Self(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomous_has_system_priority() {
        let table = ModeTable::default();
        let cfg = table.get(Mode::Autonomous).unwrap();
        assert_eq!(cfg.priority_bias, PriorityBias::System);
        assert!(cfg.autonomous_tasks_enabled);
    }

    #[test]
    fn every_mode_variant_has_an_entry() {
        let table = ModeTable::default();
        for mode in [
            Mode::Autonomous,
            Mode::UserFirst,
            Mode::Maintenance,
            Mode::PowerSave,
            Mode::Safe,
            Mode::Boot,
            Mode::Storm,
            Mode::Emergency,
            Mode::Shutdown,
        ] {
            assert!(table.get(mode).is_some(), "missing config for {mode:?}");
        }
    }
}
