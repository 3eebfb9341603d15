//! The calendar collaborator behind C10's `check_calendar_mode` hook
//! (spec.md §4.10): resolves an ICS URL into a set of "work" event
//! intervals and answers `is_work_time(now)`. When `CALENDAR_ICS_URL` is
//! unset, falls back to a fixed weekday/hour window from `CalendarConfig`
//! so the hook still has a deterministic answer (spec.md: "optional;
//! enables calendar-driven mode switching" — its absence must not crash
//! the scheduler, just disable the feature gracefully).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use sentinel_config::CalendarConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CalendarCache {
    fetched_at: Option<DateTime<Utc>>,
    intervals: Vec<WorkInterval>,
}

pub struct CalendarSource {
    config: CalendarConfig,
    cache_path: PathBuf,
    cache_ttl: Duration,
    http: reqwest::Client,
}

impl CalendarSource {
    pub fn new(config: CalendarConfig, state_dir: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            config,
            cache_path: state_dir.into().join("calendar_cache.json"),
            cache_ttl,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Refreshes the cached ICS feed if it is stale or missing. Network and
    /// parse failures are logged and leave the previous cache (or an empty
    /// one) in place — calendar-driven mode switching degrading to "no
    /// opinion" is acceptable, per spec.md's non-transactional state model.
    pub async fn refresh(&self) -> Result<()> {
        if self.config.ics_url.is_empty() {
            return Ok(());
        }

        let cache: CalendarCache = sentinel_state::read_snapshot(&self.cache_path).await;
        if let Some(fetched_at) = cache.fetched_at {
            if Utc::now() - fetched_at < chrono::Duration::from_std(self.cache_ttl).unwrap_or_default() {
                return Ok(());
            }
        }

        let body = match self.http.get(&self.config.ics_url).send().await {
            Ok(response) => response.text().await.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "calendar: failed to fetch ICS feed");
                return Ok(());
            }
        };

        let intervals = parse_ics_intervals(&body);
        let next = CalendarCache {
            fetched_at: Some(Utc::now()),
            intervals,
        };
        sentinel_state::write_snapshot(&self.cache_path, &next).await?;
        Ok(())
    }

    /// `is_work_time(now)`: true if `now` falls inside a cached calendar
    /// event, or — when no feed is configured — inside the configured
    /// weekday work-hour window.
    pub async fn is_work_time(&self, now: DateTime<Utc>) -> bool {
        if self.config.ics_url.is_empty() {
            return default_work_window(&self.config, now);
        }

        let cache: CalendarCache = sentinel_state::read_snapshot(&self.cache_path).await;
        cache.intervals.iter().any(|i| now >= i.start && now < i.end)
    }
}

fn default_work_window(config: &CalendarConfig, now: DateTime<Utc>) -> bool {
    let weekday = now.weekday().number_from_monday();
    if weekday > 5 {
        return false;
    }
    let hour = now.hour();
    hour >= config.work_start_hour as u32 && hour < config.work_end_hour as u32
}

/// Minimal ICS parser: extracts `DTSTART`/`DTEND` pairs per `VEVENT` block.
/// Recurrence rules (`RRULE`) are not expanded — a known limitation, noted
/// in DESIGN.md, acceptable because `check_calendar_mode` only needs a
/// coarse "is now inside a scheduled block" signal re-evaluated every few
/// minutes against a feed that is re-fetched, not computed once.
fn parse_ics_intervals(ics: &str) -> Vec<WorkInterval> {
    let mut intervals = Vec::new();
    let mut start: Option<DateTime<Utc>> = None;
    let mut end: Option<DateTime<Utc>> = None;

    for raw_line in ics.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line == "BEGIN:VEVENT" {
            start = None;
            end = None;
            continue;
        }
        if line == "END:VEVENT" {
            if let (Some(s), Some(e)) = (start, end) {
                intervals.push(WorkInterval { start: s, end: e });
            }
            continue;
        }
        if let Some(value) = line.strip_prefix("DTSTART") {
            start = parse_ics_datetime(value);
        } else if let Some(value) = line.strip_prefix("DTEND") {
            end = parse_ics_datetime(value);
        }
    }

    intervals
}

fn parse_ics_datetime(field: &str) -> Option<DateTime<Utc>> {
    let value = field.rsplit_once(':').map(|(_, v)| v).unwrap_or(field.trim_start_matches(':'));
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_str(&format!("{value} +0000"), "%Y%m%dT%H%M%SZ %z") {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_vevent_block() {
        let ics = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nDTSTART:20260115T090000Z\r\nDTEND:20260115T170000Z\r\nSUMMARY:Work\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let intervals = parse_ics_intervals(ics);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start.hour(), 9);
        assert_eq!(intervals[0].end.hour(), 17);
    }

    #[test]
    fn ignores_event_missing_dtend() {
        let ics = "BEGIN:VEVENT\r\nDTSTART:20260115T090000Z\r\nEND:VEVENT\r\n";
        assert!(parse_ics_intervals(ics).is_empty());
    }

    #[tokio::test]
    async fn default_window_is_used_without_ics_url() {
        let source = CalendarSource::new(CalendarConfig::default(), std::env::temp_dir(), Duration::from_secs(300));
        let weekday_morning = DateTime::parse_from_rfc3339("2026-01-12T10:00:00Z").unwrap().with_timezone(&Utc);
        let weekend = DateTime::parse_from_rfc3339("2026-01-17T10:00:00Z").unwrap().with_timezone(&Utc);
        assert!(source.is_work_time(weekday_morning).await);
        assert!(!source.is_work_time(weekend).await);
    }
}
