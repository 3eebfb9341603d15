//! Task Scheduler (C10) — an in-memory list of mode-aware periodic tasks.
//! Grounded on `original_source/src/task_scheduler.py`'s hand-rolled
//! interval/condition/allowed-modes gate; the default registrations
//! themselves (archive sweep, fullness check, health probes, repair sweep,
//! calendar hook) are wired by the supervisor (`sentinel-runtime`), which is
//! the only place all of C9/C11/C12/C14's concrete closures can be named
//! without this crate depending on every other subsystem.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use sentinel_config::Mode;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct ScheduledTask {
    pub name: String,
    interval: Duration,
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
    allowed_modes: Option<Vec<Mode>>,
    condition: Option<ConditionFn>,
    task_fn: TaskFn,
}

#[derive(Debug, Clone)]
pub struct TaskRunOutcome {
    pub name: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct TaskScheduler {
    tasks: Vec<ScheduledTask>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        task_fn: TaskFn,
        condition: Option<ConditionFn>,
        allowed_modes: Option<Vec<Mode>>,
    ) {
        self.tasks.push(ScheduledTask {
            name: name.into(),
            interval,
            last_run: None,
            run_count: 0,
            allowed_modes,
            condition,
            task_fn,
        });
    }

    fn should_run(task: &ScheduledTask, current_mode: Mode) -> bool {
        let due = match task.last_run {
            None => true,
            Some(last) => {
                let elapsed = Utc::now() - last;
                elapsed >= chrono::Duration::from_std(task.interval).unwrap_or_default()
            }
        };
        if !due {
            return false;
        }
        if let Some(allowed) = &task.allowed_modes {
            if !allowed.contains(&current_mode) {
                return false;
            }
        }
        if let Some(condition) = &task.condition {
            if !condition() {
                return false;
            }
        }
        true
    }

    /// Runs every due task (per `should_run`), updates bookkeeping, and
    /// returns one outcome per task that ran. Tasks that don't run this
    /// tick are simply absent from the result, not reported as failures.
    pub async fn run_due(&mut self, current_mode: Mode) -> Vec<TaskRunOutcome> {
        let mut outcomes = Vec::new();
        for task in &mut self.tasks {
            if !Self::should_run(task, current_mode) {
                continue;
            }

            let result = (task.task_fn)().await;
            task.last_run = Some(Utc::now());
            task.run_count += 1;

            let outcome = match result {
                Ok(value) => TaskRunOutcome { name: task.name.clone(), success: true, result: Some(value), error: None },
                Err(err) => {
                    tracing::warn!(task = %task.name, error = %err, "scheduler: task failed");
                    TaskRunOutcome { name: task.name.clone(), success: false, result: None, error: Some(err.to_string()) }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn run_count_of(&self, name: &str) -> Option<u64> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.run_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn runs_task_on_first_tick_regardless_of_interval() {
        let mut scheduler = TaskScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        scheduler.register(
            "noop",
            Duration::from_secs(3600),
            Arc::new(move || {
                let calls = calls2.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("ran".to_string())
                })
            }),
            None,
            None,
        );

        let outcomes = scheduler.run_due(Mode::Autonomous).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second tick immediately after: not due yet.
        let outcomes = scheduler.run_due(Mode::Autonomous).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn mode_gate_blocks_disallowed_mode() {
        let mut scheduler = TaskScheduler::new();
        scheduler.register(
            "maintenance_only",
            Duration::from_secs(0),
            Arc::new(|| Box::pin(async { Ok("ran".to_string()) })),
            None,
            Some(vec![Mode::Maintenance]),
        );

        let outcomes = scheduler.run_due(Mode::Autonomous).await;
        assert!(outcomes.is_empty());

        let outcomes = scheduler.run_due(Mode::Maintenance).await;
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn condition_gate_must_hold() {
        let mut scheduler = TaskScheduler::new();
        let allow = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let allow2 = allow.clone();
        scheduler.register(
            "conditional",
            Duration::from_secs(0),
            Arc::new(|| Box::pin(async { Ok("ran".to_string()) })),
            Some(Arc::new(move || allow2.load(Ordering::SeqCst))),
            None,
        );

        assert!(scheduler.run_due(Mode::Autonomous).await.is_empty());
        allow.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.run_due(Mode::Autonomous).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_task_reports_error_outcome() {
        let mut scheduler = TaskScheduler::new();
        scheduler.register(
            "failing",
            Duration::from_secs(0),
            Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("boom")) })),
            None,
            None,
        );

        let outcomes = scheduler.run_due(Mode::Autonomous).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].error.as_deref(), Some("boom"));
    }
}
