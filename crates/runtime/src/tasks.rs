//! Closures for the five default `TaskScheduler` registrations. Kept apart
//! from `lib.rs` because this is the one file allowed to name every
//! subsystem by its concrete type — the scheduler crate itself never does.

use std::sync::Arc;
use std::time::Duration;

use sentinel_calendar::CalendarSource;
use sentinel_config::{Mode, SchedulerConfig};
use sentinel_health::HealthMonitor;
use sentinel_mode::{ModeManager, Source};
use sentinel_scheduler::TaskScheduler;
use sentinel_storage::StorageTierer;
use sentinel_watchdog::Watchdog;

/// Registers the archive sweep, fast-tier fullness check, health probes,
/// self-repair sweep, and calendar hook onto `scheduler`, using the
/// intervals from `config`.
#[allow(clippy::too_many_arguments)]
pub fn register_default_tasks(
    scheduler: &mut TaskScheduler,
    config: &SchedulerConfig,
    storage: Arc<StorageTierer>,
    health: Arc<HealthMonitor>,
    watchdog: Arc<Watchdog>,
    mode_manager: Arc<tokio::sync::Mutex<ModeManager>>,
    calendar: Arc<CalendarSource>,
) {
    scheduler.register(
        "archive_sweep",
        Duration::from_secs(config.archive_interval_secs),
        {
            let storage = storage.clone();
            Arc::new(move || {
                let storage = storage.clone();
                Box::pin(async move {
                    let moved = storage.archive_old(false).await?;
                    Ok(format!("archived {} files", moved.len()))
                })
            })
        },
        None,
        None,
    );

    let fullness_threshold = config.fast_tier_fullness_threshold_percent;
    scheduler.register(
        "fast_tier_fullness_check",
        Duration::from_secs(config.fast_tier_check_interval_secs),
        {
            let storage = storage.clone();
            Arc::new(move || {
                let storage = storage.clone();
                Box::pin(async move {
                    match storage.monitor(fullness_threshold) {
                        Some(warning) => Ok(format!(
                            "fast tier at {:.1}% (threshold {:.1}%)",
                            warning.used_percent, warning.threshold_percent
                        )),
                        None => Ok("fast tier within threshold".to_string()),
                    }
                })
            })
        },
        None,
        None,
    );

    scheduler.register(
        "health_probes",
        Duration::from_secs(config.health_probe_interval_secs),
        {
            let health = health.clone();
            Arc::new(move || {
                let health = health.clone();
                Box::pin(async move {
                    let samples = health.run_all().await;
                    let overall = HealthMonitor::overall(&samples);
                    Ok(format!("overall status {overall:?}"))
                })
            })
        },
        None,
        None,
    );

    scheduler.register(
        "self_repair_sweep",
        Duration::from_secs(config.repair_sweep_interval_secs),
        {
            let watchdog = watchdog.clone();
            Arc::new(move || {
                let watchdog = watchdog.clone();
                Box::pin(async move {
                    let actions = watchdog.run_once().await?;
                    Ok(format!("{} repair action(s) taken", actions.len()))
                })
            })
        },
        None,
        None,
    );

    scheduler.register(
        "calendar_mode_hook",
        Duration::from_secs(config.calendar_check_interval_secs),
        Arc::new(move || {
            let mode_manager = mode_manager.clone();
            let calendar = calendar.clone();
            Box::pin(async move {
                let work_time = calendar.is_work_time(chrono::Utc::now()).await;
                let target = if work_time { Mode::UserFirst } else { Mode::Autonomous };
                let mut manager = mode_manager.lock().await;
                if manager.current() != target {
                    let reason = if work_time { "calendar: work window active" } else { "calendar: work window ended" };
                    let result = manager.switch(target, reason, Source::Calendar).await?;
                    return Ok(format!("{} -> {:?} ({})", result.old.as_str(), result.new, result.message));
                }
                Ok("no calendar-driven transition needed".to_string())
            })
        }),
        None,
        None,
    );
}
