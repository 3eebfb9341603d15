//! Drives the two collaborators `sentinel-voice` deliberately doesn't know
//! about: the raw input device and the monologue clock. Both end up
//! calling back into the shared `VoiceArbiter`.

use std::sync::Arc;

use chrono::Timelike;
use sentinel_config::VoiceConfig;
use sentinel_health::HealthMonitor;
use sentinel_llm::LlmClient;
use sentinel_memory::MemoryStore;
use sentinel_voice::{InputAction, InputSource, MonologueEngine, RawInputListener, SystemSnapshot, VoiceArbiter};
use tokio::sync::watch;

const VOICE_REPLY_SYSTEM_PROMPT: &str =
    "あなたはSentinelという家庭用AIです。ユーザーからの簡単な質問に、一言から数行で簡潔に日本語で答えてください。JSON形式にする必要はありません。";

/// Reads keypress edges off the configured input device and maps each one
/// onto the matching `VoiceArbiter` handler.
pub async fn run_input_loop(
    arbiter: Arc<VoiceArbiter>,
    llm: Arc<dyn LlmClient>,
    quick_model: String,
    memory: MemoryStore,
    device_path: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut listener = RawInputListener::new(device_path);

    loop {
        let next = tokio::select! {
            action = listener.next_action() => action,
            changed = shutdown.changed() => {
                if changed.is_ok() && *shutdown.borrow() { return; }
                continue;
            }
        };

        let Some(action) = next else {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            continue;
        };

        match action {
            InputAction::TalkPress => {
                if let Err(err) = arbiter.on_talk_press().await {
                    tracing::warn!(?err, "voice: talk press rejected");
                }
            }
            InputAction::TalkRelease => {
                let llm = llm.clone();
                let quick_model = quick_model.clone();
                arbiter
                    .on_talk_release(Arc::new(move |transcript: String| {
                        let llm = llm.clone();
                        let quick_model = quick_model.clone();
                        Box::pin(async move {
                            match llm.complete(VOICE_REPLY_SYSTEM_PROMPT, &transcript, &quick_model).await {
                                Ok(response) => response.text,
                                Err(err) => {
                                    tracing::warn!(?err, "voice: reply llm call failed");
                                    "うまく答えられませんでした。".to_string()
                                }
                            }
                        })
                    }))
                    .await;
            }
            InputAction::MonologueToggle => arbiter.on_monologue_toggle().await,
            InputAction::StatusRead => {
                arbiter.on_status_read("ステータスを確認します。".to_string()).await;
            }
            InputAction::Logbook => {
                let memory = memory.clone();
                arbiter
                    .on_logbook(Arc::new(move || {
                        let memory = memory.clone();
                        Box::pin(async move { memory.read_diary_tail(20).await })
                    }))
                    .await;
            }
            InputAction::EmergencyStop => arbiter.on_emergency_stop().await,
            InputAction::VolumeUp => arbiter.on_volume_up(),
            InputAction::VolumeDown => arbiter.on_volume_down(),
        }
    }
}

/// Periodically picks a monologue phrase from current system state and
/// enqueues it (the engine itself decides whether that means a quiet-hours
/// phrase, an alert phrase, or silence via dedup against the last one said).
pub async fn run_monologue_loop(
    arbiter: Arc<VoiceArbiter>,
    config: VoiceConfig,
    health: Arc<HealthMonitor>,
    timezone: chrono_tz::Tz,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut engine = MonologueEngine::new(config);

    loop {
        let sleep_secs = engine.next_interval_secs();
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)) => {}
            changed = shutdown.changed() => {
                if changed.is_ok() && *shutdown.borrow() { return; }
                continue;
            }
        }

        let samples = health.run_all().await;
        let cpu_temp_c = samples.iter().find(|s| s.name == "cpu_temp").map(|s| s.value).unwrap_or(0.0);
        let disk_percent = samples.iter().find(|s| s.name == "root_disk").map(|s| s.value).unwrap_or(0.0);
        let network_ok = samples
            .iter()
            .find(|s| s.name == "network")
            .map(|s| s.status == sentinel_health::Status::Ok)
            .unwrap_or(true);
        let hour_local = chrono::Utc::now().with_timezone(&timezone).hour();

        let snapshot = SystemSnapshot { cpu_temp_c, disk_percent, network_ok, hour_local };
        let phrase = engine.pick_phrase(snapshot);
        arbiter.enqueue_monologue(phrase).await;
    }
}
