//! Voice Arbiter (C8) core: the audio state machine, the speaker loop that
//! drains the priority queue, and the chat-driven audio-command poller.
//! Recording, playback, and STT/TTS synthesis are delegated to the sibling
//! modules; only the speaker loop may touch the audio sink, per spec.md
//! §4.8's invariant.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use sentinel_config::VoiceConfig;
use sentinel_exec::CommandExecutor;
use sentinel_webhook::{AudioCommand, AudioCommandKind};

use crate::engines::{SttEngine, TtsEngine};
use crate::queue::{Priority, SpeakQueue, VoiceRequest};
use crate::recorder::Recorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

/// C1 snapshot the Display Controller reads for its "AI" face row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiStateSnapshot {
    pub state: AudioState,
    pub updated_at: DateTime<Utc>,
}

pub type ReplyCallback = Arc<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;
pub type LogbookCallback = Arc<dyn Fn() -> BoxFuture<'static, String> + Send + Sync>;

pub struct VoiceArbiter {
    config: VoiceConfig,
    state_dir: PathBuf,
    audio_state: Mutex<AudioState>,
    queue: Mutex<SpeakQueue>,
    muted: AtomicBool,
    volume_percent: AtomicU8,
    current_voice: Mutex<String>,
    recorder: Mutex<Recorder>,
    stt: Arc<dyn SttEngine>,
    tts: Arc<dyn TtsEngine>,
    executor: CommandExecutor,
    service_unit: String,
    last_audio_command_at: Mutex<Option<DateTime<Utc>>>,
}

impl VoiceArbiter {
    pub fn new(
        config: VoiceConfig,
        state_dir: impl Into<PathBuf>,
        stt: Arc<dyn SttEngine>,
        tts: Arc<dyn TtsEngine>,
        executor: CommandExecutor,
        service_unit: impl Into<String>,
    ) -> Self {
        let state_dir = state_dir.into();
        let recorder = Recorder::new(state_dir.join("recordings"));
        Self {
            volume_percent: AtomicU8::new(config.max_volume_percent),
            config,
            state_dir,
            audio_state: Mutex::new(AudioState::Idle),
            queue: Mutex::new(SpeakQueue::new()),
            muted: AtomicBool::new(false),
            current_voice: Mutex::new("default".to_string()),
            recorder: Mutex::new(recorder),
            stt,
            tts,
            executor,
            service_unit: service_unit.into(),
            last_audio_command_at: Mutex::new(None),
        }
    }

    fn ai_state_path(&self) -> PathBuf {
        self.state_dir.join("shipos-ai-state.json")
    }

    fn audio_cmd_path(&self) -> PathBuf {
        self.state_dir.join("shipos-audio-cmd.json")
    }

    pub async fn current_state(&self) -> AudioState {
        *self.audio_state.lock().await
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn set_state(&self, state: AudioState) {
        *self.audio_state.lock().await = state;
        let snapshot = AiStateSnapshot { state, updated_at: Utc::now() };
        let _ = sentinel_state::write_snapshot(self.ai_state_path(), &snapshot).await;
    }

    async fn enqueue(&self, text: impl Into<String>, priority: Priority, category: &str) {
        let volume = self.volume_percent.load(Ordering::SeqCst);
        let mut queue = self.queue.lock().await;
        queue.push(VoiceRequest {
            text: text.into(),
            priority,
            volume,
            category: category.to_string(),
            enqueued_at: Utc::now(),
        });
    }

    pub async fn on_talk_press(&self) -> anyhow::Result<()> {
        if self.current_state().await == AudioState::Speaking {
            anyhow::bail!("cannot start recording while speaking");
        }
        self.recorder.lock().await.start().await?;
        self.set_state(AudioState::Listening).await;
        Ok(())
    }

    pub async fn on_talk_release(&self, reply: ReplyCallback) {
        self.set_state(AudioState::Thinking).await;
        let recorded = self.recorder.lock().await.stop().await.ok().flatten();

        let Some(wav_path) = recorded else {
            self.enqueue(self.config.failsafe_message.clone(), Priority::Talk, "talk").await;
            return;
        };

        let transcript = self.stt.transcribe(&wav_path).await;
        let _ = tokio::fs::remove_file(&wav_path).await;
        if transcript.trim().is_empty() {
            self.enqueue(self.config.failsafe_message.clone(), Priority::Talk, "talk").await;
            return;
        }

        let reply_text = reply(transcript).await;
        self.enqueue(reply_text, Priority::Talk, "talk").await;
    }

    pub async fn on_monologue_toggle(&self) {
        let was_muted = self.muted.fetch_xor(true, Ordering::SeqCst);
        let ack = if was_muted { "独り言を再開します。" } else { "独り言を止めます。" };
        self.enqueue(ack, Priority::Notification, "monologue_toggle").await;
    }

    pub async fn on_status_read(&self, utterance: String) {
        self.enqueue(utterance, Priority::Notification, "status_read").await;
    }

    pub async fn on_logbook(&self, logbook: LogbookCallback) {
        let text = logbook().await;
        self.enqueue(text, Priority::Notification, "logbook").await;
    }

    /// Speaks an emergency phrase, waits briefly for it to be heard, then
    /// stops the primary service via the command executor.
    pub async fn on_emergency_stop(&self) {
        self.enqueue("緊急停止します。", Priority::Emergency, "emergency").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        if let Err(err) = self.executor.execute(&format!("systemctl stop {}", self.service_unit)).await {
            tracing::error!(error = %err, "emergency stop command failed");
        }
    }

    pub fn on_volume_up(&self) {
        self.adjust_volume(self.config.volume_step_percent as i16);
    }

    pub fn on_volume_down(&self) {
        self.adjust_volume(-(self.config.volume_step_percent as i16));
    }

    fn adjust_volume(&self, delta: i16) {
        let current = self.volume_percent.load(Ordering::SeqCst) as i16;
        let max = self.config.max_volume_percent as i16;
        let next = (current + delta).clamp(0, max) as u8;
        self.volume_percent.store(next, Ordering::SeqCst);
    }

    pub async fn enqueue_monologue(&self, text: String) {
        if self.is_muted() {
            return;
        }
        self.enqueue(text, Priority::Monologue, "monologue").await;
    }

    /// Drains the priority queue forever; the only task permitted to touch
    /// the audio sink (spec.md §4.8 invariant).
    pub async fn run_speaker_loop(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().await.pop();
            match next {
                Some(request) => self.speak(request).await,
                None => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }
    }

    async fn speak(&self, request: VoiceRequest) {
        self.set_state(AudioState::Speaking).await;

        let voice = self.current_voice.lock().await.clone();
        let cache_dir = self.state_dir.join("tts_cache");
        match self.tts.synthesize(&request.text, &voice, &cache_dir).await {
            Ok(path) => {
                let volume = request.volume.min(self.config.max_volume_percent);
                if let Err(err) = crate::playback::play_wav(&path, volume, Duration::from_secs(30)).await {
                    tracing::warn!(error = %err, "playback failed");
                }
                if !path.starts_with(&cache_dir) {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
            Err(err) => tracing::warn!(error = %err, "tts synthesis failed"),
        }

        self.set_state(AudioState::Idle).await;
    }

    /// Polls the chat-driven audio command file every
    /// `audio_command_poll_interval_secs`, dedups by `issued_at`, and
    /// deletes the file after dispatch (spec.md §4.8).
    pub async fn run_audio_command_poller(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.audio_command_poll_interval_secs.max(1));
        loop {
            self.poll_audio_command_once().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn poll_audio_command_once(&self) {
        let Ok(bytes) = tokio::fs::read(self.audio_cmd_path()).await else { return };
        let Ok(command) = serde_json::from_slice::<AudioCommand>(&bytes) else { return };

        {
            let mut last_seen = self.last_audio_command_at.lock().await;
            if *last_seen == Some(command.issued_at) {
                return;
            }
            *last_seen = Some(command.issued_at);
        }

        match command.kind {
            AudioCommandKind::Speak { text } => self.enqueue(text, Priority::Notification, "chat_speak").await,
            AudioCommandKind::MonologueMute => self.muted.store(true, Ordering::SeqCst),
            AudioCommandKind::MonologueUnmute => self.muted.store(false, Ordering::SeqCst),
            AudioCommandKind::StatusRead => self.enqueue("ステータスを確認します。", Priority::Notification, "chat_status").await,
            AudioCommandKind::ChangeVoice { name } => *self.current_voice.lock().await = name,
        }

        let _ = tokio::fs::remove_file(self.audio_cmd_path()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{RemoteSttEngine, RemoteTtsEngine};
    use sentinel_config::ExecConfig;

    fn arbiter(dir: &std::path::Path) -> VoiceArbiter {
        let stt: Arc<dyn SttEngine> =
            Arc::new(RemoteSttEngine { client: reqwest::Client::new(), endpoint: "http://127.0.0.1:1".to_string() });
        let tts: Arc<dyn TtsEngine> = Arc::new(RemoteTtsEngine {
            client: reqwest::Client::new(),
            endpoint: "http://127.0.0.1:1".to_string(),
            api_key: String::new(),
        });
        let mut exec_config = ExecConfig::default();
        exec_config.allowed_roots = vec![dir.to_string_lossy().to_string()];
        let executor = CommandExecutor::new(exec_config, dir.join("command_audit.jsonl"));
        VoiceArbiter::new(VoiceConfig::default(), dir, stt, tts, executor, "sentinel.service")
    }

    #[tokio::test]
    async fn monologue_toggle_flips_mute_and_enqueues_ack() {
        let dir = tempfile::tempdir().unwrap();
        let a = arbiter(dir.path());
        assert!(!a.is_muted());
        a.on_monologue_toggle().await;
        assert!(a.is_muted());
        assert_eq!(a.queue.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_monologue_is_suppressed_while_muted() {
        let dir = tempfile::tempdir().unwrap();
        let a = arbiter(dir.path());
        a.muted.store(true, Ordering::SeqCst);
        a.enqueue_monologue("test".to_string()).await;
        assert!(a.queue.lock().await.is_empty());
    }

    #[test]
    fn volume_clamps_to_configured_max() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let a = rt.block_on(async { arbiter(dir.path()) });
        for _ in 0..20 {
            a.on_volume_up();
        }
        assert!(a.volume_percent.load(Ordering::SeqCst) <= a.config.max_volume_percent);
        for _ in 0..20 {
            a.on_volume_down();
        }
        assert_eq!(a.volume_percent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn audio_command_dedups_by_issued_at() {
        let dir = tempfile::tempdir().unwrap();
        let a = arbiter(dir.path());
        let command = AudioCommand {
            kind: AudioCommandKind::MonologueMute,
            issued_at: Utc::now(),
        };
        sentinel_state::write_snapshot(dir.path().join("shipos-audio-cmd.json"), &command).await.unwrap();

        a.poll_audio_command_once().await;
        assert!(a.is_muted());
        assert!(!tokio::fs::try_exists(dir.path().join("shipos-audio-cmd.json")).await.unwrap());

        a.muted.store(false, Ordering::SeqCst);
        // File was deleted, so a second poll with nothing written is a no-op.
        a.poll_audio_command_once().await;
        assert!(!a.is_muted());
    }

    #[tokio::test]
    async fn talk_release_speaks_failsafe_on_empty_recording() {
        let dir = tempfile::tempdir().unwrap();
        let a = arbiter(dir.path());
        a.on_talk_release(Arc::new(|_: String| Box::pin(async { "unused".to_string() }))).await;
        let queued = a.queue.lock().await.pop().unwrap();
        assert_eq!(queued.text, a.config.failsafe_message);
        assert_eq!(queued.priority, Priority::Talk);
    }
}
