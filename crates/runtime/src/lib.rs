//! Supervisor (C16/C17) — brings up every worker in-process as a set of
//! tokio tasks racing a single shutdown `watch` channel, then waits for
//! SIGTERM/SIGINT. There is no client/server split here: one process, one
//! address space, every component talking to every other one only through
//! the shared filesystem state directory (`sentinel-state`'s snapshot/JSONL
//! helpers), exactly as each crate's own doc comments describe.

mod tasks;
mod voice_wiring;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sentinel_billing::BillingGuard;
use sentinel_calendar::CalendarSource;
use sentinel_config::{AppConfig, NotifyLevel};
use sentinel_display::sink::LogFrameSink;
use sentinel_display::DisplayController;
use sentinel_exec::CommandExecutor;
use sentinel_health::HealthMonitor;
use sentinel_inbox::EventInbox;
use sentinel_memory::MemoryStore;
use sentinel_mode::ModeManager;
use sentinel_notifier::Notifier;
use sentinel_planner::Planner;
use sentinel_scheduler::TaskScheduler;
use sentinel_storage::StorageTierer;
use sentinel_voice::{RemoteSttEngine, RemoteTtsEngine, SttEngine, TtsEngine, VoiceArbiter};
use sentinel_watchdog::Watchdog;
use sentinel_webhook::WebhookContext;
use tokio::sync::{watch, Mutex};

/// Resolves once SIGTERM or SIGINT (or, off-unix, Ctrl-C) is received.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Forwards `shutdown_rx` flips into `flag`, bridging `Planner::run_daemon`
/// (which still takes the older `&AtomicBool` cooperative-cancellation shape)
/// onto the `watch`-channel model everything else here uses.
async fn forward_shutdown_flag(mut shutdown_rx: watch::Receiver<bool>, flag: Arc<AtomicBool>) {
    loop {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
        if *shutdown_rx.borrow() {
            flag.store(true, Ordering::SeqCst);
            return;
        }
    }
}

/// Starts every worker and blocks until a termination signal is observed,
/// then signals shutdown to each task and gives them a short grace period
/// to finish writing state before returning.
pub async fn run_supervisor(config: AppConfig) -> Result<()> {
    for dir in [
        config.state_dir(),
        config.commands_dir(),
        config.memory_dir(),
        config.billing_dir(),
        config.logs_dir(),
    ] {
        tokio::fs::create_dir_all(&dir).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notifier = Notifier::new(config.notifier.clone(), config.state_dir());
    notifier
        .notify_startup(NotifyLevel::All, &format!("{} starting up", config.agent.name))
        .await;

    let mode_manager = Arc::new(Mutex::new(ModeManager::new(config.state_dir(), config.modes.clone())));
    {
        let mut manager = mode_manager.lock().await;
        manager.load().await;
    }

    let planner_shutdown_flag = Arc::new(AtomicBool::new(false));
    tokio::spawn(forward_shutdown_flag(shutdown_rx.clone(), planner_shutdown_flag.clone()));

    let planner = Arc::new(Planner::new(
        config.state_dir(),
        config.planner.clone(),
        config.modes.clone(),
        &config.llm,
        sentinel_llm::client_for(&config.llm),
        CommandExecutor::new(config.exec.clone(), config.logs_dir().join("exec_audit.jsonl")),
        MemoryStore::new(config.memory_dir()),
        EventInbox::new(config.commands_dir()),
        Notifier::new(config.notifier.clone(), config.state_dir()),
        config.billing_dir(),
        config.billing.clone(),
    ));
    let planner_task = {
        let planner = planner.clone();
        let flag = planner_shutdown_flag.clone();
        tokio::spawn(async move { planner.run_daemon(flag.as_ref()).await })
    };

    let health = Arc::new(HealthMonitor::new(
        config.health.clone(),
        config.state_dir(),
        Some(std::path::PathBuf::from(&config.storage.archive_root)),
    ));
    let watchdog = Arc::new(Watchdog::new(
        config.watchdog.clone(),
        config.agent.root_dir.clone(),
        config.logs_dir(),
        config.logs_dir().join("recovery.jsonl"),
        CommandExecutor::new(config.exec.clone(), config.logs_dir().join("exec_audit.jsonl")),
        MemoryStore::new(config.memory_dir()),
    ));
    let storage = Arc::new(StorageTierer::new(config.storage.clone()));
    let calendar = Arc::new(CalendarSource::new(
        config.calendar.clone(),
        config.state_dir(),
        std::time::Duration::from_secs(config.scheduler.calendar_check_interval_secs.max(60)),
    ));

    let mut scheduler = TaskScheduler::new();
    tasks::register_default_tasks(
        &mut scheduler,
        &config.scheduler,
        storage.clone(),
        health.clone(),
        watchdog.clone(),
        mode_manager.clone(),
        calendar.clone(),
    );
    let scheduler_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        let mode_manager = mode_manager.clone();
        tokio::spawn(async move {
            let mut scheduler = scheduler;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_ok() && *shutdown_rx.borrow() { return; }
                        continue;
                    }
                }
                let current_mode = mode_manager.lock().await.current();
                for outcome in scheduler.run_due(current_mode).await {
                    if !outcome.success {
                        tracing::warn!(task = %outcome.name, error = ?outcome.error, "scheduled task failed");
                    }
                }
            }
        })
    };

    let http_client = reqwest::Client::new();
    let stt: Arc<dyn SttEngine> = Arc::new(RemoteSttEngine {
        client: http_client.clone(),
        endpoint: format!("{}/stt", config.llm.openrouter_base_url),
    });
    let tts: Arc<dyn TtsEngine> = Arc::new(RemoteTtsEngine {
        client: http_client.clone(),
        endpoint: format!("{}/tts", config.llm.openrouter_base_url),
        api_key: config.llm.api_key.clone(),
    });
    let voice_arbiter = Arc::new(VoiceArbiter::new(
        config.voice.clone(),
        config.state_dir(),
        stt,
        tts,
        CommandExecutor::new(config.exec.clone(), config.logs_dir().join("exec_audit.jsonl")),
        config.health.service_unit.clone(),
    ));
    let speaker_task = tokio::spawn(voice_arbiter.clone().run_speaker_loop());
    let audio_poll_task = tokio::spawn(voice_arbiter.clone().run_audio_command_poller());
    let input_task = tokio::spawn(voice_wiring::run_input_loop(
        voice_arbiter.clone(),
        Arc::from(sentinel_llm::client_for(&config.llm)),
        config.llm.quick_response_model.clone(),
        MemoryStore::new(config.memory_dir()),
        config.voice.input_device_path.clone(),
        shutdown_rx.clone(),
    ));
    let timezone: chrono_tz::Tz = config.agent.timezone.parse().unwrap_or(chrono_tz::UTC);
    let monologue_task = tokio::spawn(voice_wiring::run_monologue_loop(
        voice_arbiter.clone(),
        config.voice.clone(),
        health.clone(),
        timezone,
        shutdown_rx.clone(),
    ));

    let display_sink: Arc<dyn sentinel_display::sink::FrameSink> = Arc::new(LogFrameSink);
    let display = DisplayController::new(config.display.clone(), config.state_dir(), display_sink);
    let display_task = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { display.run(shutdown_rx).await })
    };

    let webhook_ctx = Arc::new(WebhookContext {
        config: config.webhook.clone(),
        channel_secret: config.notifier.line_channel_secret.clone(),
        state_dir: config.state_dir(),
        mode_manager: mode_manager.clone(),
        billing: Arc::new(Mutex::new(BillingGuard::new(config.billing_dir(), config.billing.clone()))),
        inbox: EventInbox::new(config.commands_dir()),
        memory: MemoryStore::new(config.memory_dir()),
        notifier: Notifier::new(config.notifier.clone(), config.state_dir()),
    });
    let bind_addr = format!("{}:{}", config.webhook.bind_addr, config.webhook.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let webhook_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        let router = sentinel_webhook::router(webhook_ctx);
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        })
    };

    tracing::info!(addr = %bind_addr, "sentinel: all workers started");

    wait_for_termination().await;
    tracing::info!("sentinel: shutdown signal received, stopping workers");
    let _ = shutdown_tx.send(true);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    for task in [
        planner_task,
        scheduler_task,
        speaker_task,
        audio_poll_task,
        input_task,
        monologue_task,
        display_task,
    ] {
        task.abort();
    }
    webhook_task.abort();

    notifier
        .notify_shutdown(NotifyLevel::All, &format!("{} shutting down", config.agent.name))
        .await;

    Ok(())
}
