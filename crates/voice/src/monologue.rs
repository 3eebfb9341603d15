//! Monologue engine (spec.md §4.8): an internal clock that, when idle and
//! not muted and outside quiet hours, picks a templated phrase from the
//! host's current state and avoids repeating the last one spoken.

use rand::Rng;

use sentinel_config::VoiceConfig;

#[derive(Debug, Clone, Copy)]
pub struct SystemSnapshot {
    pub cpu_temp_c: f64,
    pub disk_percent: f64,
    pub network_ok: bool,
    pub hour_local: u32,
}

const HOT_CPU_THRESHOLD_C: f64 = 75.0;
const HIGH_DISK_THRESHOLD_PERCENT: f64 = 85.0;

const HOT_CPU_PHRASES: &[&str] = &["ちょっと熱いです…", "CPUが熱くなってきました。"];
const HIGH_DISK_PHRASES: &[&str] = &["ディスクがいっぱいになってきました。"];
const NETWORK_DOWN_PHRASES: &[&str] = &["ネットワークがつながっていません。"];
const NIGHT_PHRASES: &[&str] = &["静かな夜ですね。", "そろそろ休む時間かもしれません。"];
const DEFAULT_IDLE_PHRASES: &[&str] = &["特に変わりありません。", "今日もよろしくお願いします。"];

pub struct MonologueEngine {
    config: VoiceConfig,
    last_phrase: Option<String>,
}

impl MonologueEngine {
    pub fn new(config: VoiceConfig) -> Self {
        Self { config, last_phrase: None }
    }

    pub fn is_quiet_hours(&self, hour_local: u32) -> bool {
        let start = self.config.quiet_hours_start_hour as u32;
        let end = self.config.quiet_hours_end_hour as u32;
        if start == end {
            return false;
        }
        if start < end {
            hour_local >= start && hour_local < end
        } else {
            hour_local >= start || hour_local < end
        }
    }

    /// Uniformly random interval within the configured bounds for the next
    /// monologue clock tick.
    pub fn next_interval_secs(&self) -> u64 {
        let (min, max) = (self.config.monologue_min_interval_secs, self.config.monologue_max_interval_secs);
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Picks a phrase for `snapshot`, skipping a candidate equal to the last
    /// one spoken when an alternative exists.
    pub fn pick_phrase(&mut self, snapshot: SystemSnapshot) -> String {
        let candidates: &[&str] = if snapshot.cpu_temp_c >= HOT_CPU_THRESHOLD_C {
            HOT_CPU_PHRASES
        } else if snapshot.disk_percent >= HIGH_DISK_THRESHOLD_PERCENT {
            HIGH_DISK_PHRASES
        } else if !snapshot.network_ok {
            NETWORK_DOWN_PHRASES
        } else if self.is_quiet_hours(snapshot.hour_local) {
            NIGHT_PHRASES
        } else {
            DEFAULT_IDLE_PHRASES
        };

        let choice = pick_avoiding_repeat(candidates, self.last_phrase.as_deref());
        self.last_phrase = Some(choice.clone());
        choice
    }
}

fn pick_avoiding_repeat(candidates: &[&str], last: Option<&str>) -> String {
    let pool: Vec<&&str> = match last {
        Some(last) if candidates.len() > 1 => candidates.iter().filter(|c| **c != last).collect(),
        _ => candidates.iter().collect(),
    };
    let pool = if pool.is_empty() { candidates.iter().collect() } else { pool };
    let idx = rand::thread_rng().gen_range(0..pool.len());
    pool[idx].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VoiceConfig {
        let mut c = VoiceConfig::default();
        c.quiet_hours_start_hour = 23;
        c.quiet_hours_end_hour = 7;
        c.monologue_min_interval_secs = 10;
        c.monologue_max_interval_secs = 20;
        c
    }

    #[test]
    fn quiet_hours_wraps_past_midnight() {
        let engine = MonologueEngine::new(config());
        assert!(engine.is_quiet_hours(23));
        assert!(engine.is_quiet_hours(2));
        assert!(engine.is_quiet_hours(6));
        assert!(!engine.is_quiet_hours(7));
        assert!(!engine.is_quiet_hours(12));
    }

    #[test]
    fn next_interval_within_bounds() {
        let engine = MonologueEngine::new(config());
        for _ in 0..20 {
            let secs = engine.next_interval_secs();
            assert!((10..=20).contains(&secs));
        }
    }

    #[test]
    fn hot_cpu_takes_priority_over_default_idle() {
        let mut engine = MonologueEngine::new(config());
        let snapshot = SystemSnapshot { cpu_temp_c: 80.0, disk_percent: 10.0, network_ok: true, hour_local: 12 };
        let phrase = engine.pick_phrase(snapshot);
        assert!(HOT_CPU_PHRASES.contains(&phrase.as_str()));
    }

    #[test]
    fn avoids_immediate_repetition_when_alternative_exists() {
        let mut engine = MonologueEngine::new(config());
        engine.last_phrase = Some(NIGHT_PHRASES[0].to_string());
        let snapshot = SystemSnapshot { cpu_temp_c: 10.0, disk_percent: 10.0, network_ok: true, hour_local: 2 };
        for _ in 0..20 {
            let phrase = engine.pick_phrase(snapshot);
            assert_ne!(phrase, NIGHT_PHRASES[0]);
            engine.last_phrase = Some(NIGHT_PHRASES[0].to_string());
        }
    }
}
