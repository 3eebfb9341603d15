//! Webhook Server (C14) — inbound HTTP receiver for chat messages. Verifies
//! the provider signature, matches a small static command vocabulary for
//! synchronous replies, and otherwise drops the text into the event inbox
//! (C6) rather than blocking the HTTP response on heavy work.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Bytes, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use sentinel_billing::BillingGuard;
use sentinel_config::WebhookConfig;
use sentinel_inbox::EventInbox;
use sentinel_memory::MemoryStore;
use sentinel_mode::{ModeManager, Source};
use sentinel_notifier::Notifier;

/// The line-status pulse (C1), read by the Display Controller (C15) to
/// flash "LINE RX"/"LINE TX" when fresh within 5 seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineStatus {
    pub rx_at: Option<DateTime<Utc>>,
    pub tx_at: Option<DateTime<Utc>>,
}

/// An audio-command request the Voice Arbiter (C8) polls for (spec.md
/// §4.8). Deduplicated by `issued_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCommand {
    pub kind: AudioCommandKind,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioCommandKind {
    Speak { text: String },
    MonologueMute,
    MonologueUnmute,
    StatusRead,
    ChangeVoice { name: String },
}

#[derive(Debug, Deserialize)]
struct LineEnvelope {
    #[serde(default)]
    events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
struct LineEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    source: Option<LineSource>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct LineSource {
    #[serde(rename = "userId", default)]
    user_id: String,
}

pub struct WebhookContext {
    pub config: WebhookConfig,
    pub channel_secret: String,
    pub state_dir: PathBuf,
    pub mode_manager: Arc<Mutex<ModeManager>>,
    pub billing: Arc<Mutex<BillingGuard>>,
    pub inbox: EventInbox,
    pub memory: MemoryStore,
    pub notifier: Notifier,
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<WebhookContext>,
}

impl WebhookContext {
    fn line_status_path(&self) -> PathBuf {
        self.state_dir.join("shipos-line-status.json")
    }

    fn audio_cmd_path(&self) -> PathBuf {
        self.state_dir.join("shipos-audio-cmd.json")
    }
}

pub fn router(ctx: Arc<WebhookContext>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .with_state(AppState { ctx })
}

async fn handle_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let ctx = &state.ctx;

    if !ctx.channel_secret.is_empty() {
        let signature = headers
            .get("x-line-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(&ctx.channel_secret, &body, signature) {
            tracing::warn!("webhook: rejected request with invalid signature");
            return StatusCode::BAD_REQUEST;
        }
    }

    let _ = sentinel_state::write_snapshot(
        ctx.line_status_path(),
        &LineStatus { rx_at: Some(Utc::now()), tx_at: None },
    )
    .await;

    let envelope: LineEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(error = %err, "webhook: unparseable body");
            return StatusCode::BAD_REQUEST;
        }
    };

    for event in envelope.events {
        if event.event_type != "message" {
            continue;
        }
        let Some(message) = event.message else { continue };
        if message.message_type != "text" {
            continue;
        }
        let user_id = event.source.map(|s| s.user_id).unwrap_or_default();
        dispatch_text(ctx, &message.text, &user_id).await;
    }

    StatusCode::OK
}

fn verify_signature(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    expected.as_slice() == provided.as_slice()
}

/// Step 3-5 of spec.md §4.14: match the static command vocabulary first;
/// otherwise classify as query/goal and append to the inbox.
async fn dispatch_text(ctx: &WebhookContext, text: &str, user_id: &str) {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    if let Some(id) = lower.strip_prefix("approve:") {
        let mut billing = ctx.billing.lock().await;
        let _ = billing.resolve_confirmation(id.trim(), true).await;
        return;
    }
    if let Some(id) = lower.strip_prefix("deny:") {
        let mut billing = ctx.billing.lock().await;
        let _ = billing.resolve_confirmation(id.trim(), false).await;
        return;
    }
    if let Some(target) = lower.strip_prefix("mode ") {
        if let Some(mode) = sentinel_config::Mode::parse_primary(target.trim()) {
            let mut mode_manager = ctx.mode_manager.lock().await;
            let _ = mode_manager.switch(mode, "chat command", Source::User).await;
        }
        return;
    }

    match lower.as_str() {
        "stop" => {
            let mut mode_manager = ctx.mode_manager.lock().await;
            let _ = mode_manager.switch(sentinel_config::Mode::Safe, "chat stop command", Source::User).await;
        }
        "start" => {
            let mut mode_manager = ctx.mode_manager.lock().await;
            let _ = mode_manager.switch(sentinel_config::Mode::Autonomous, "chat start command", Source::User).await;
        }
        "log on" => ctx.notifier.enable_exec_log_window().await,
        "log off" => ctx.notifier.disable_exec_log_window().await,
        "mute" => write_audio_command(ctx, AudioCommandKind::MonologueMute).await,
        "unmute" => write_audio_command(ctx, AudioCommandKind::MonologueUnmute).await,
        "read status" => {
            write_audio_command(ctx, AudioCommandKind::StatusRead).await;
        }
        _ if lower.starts_with("speak ") => {
            let speech_text = trimmed[6..].trim().to_string();
            write_audio_command(ctx, AudioCommandKind::Speak { text: speech_text }).await;
        }
        _ if lower.starts_with("voice ") => {
            let name = trimmed[6..].trim().to_string();
            write_audio_command(ctx, AudioCommandKind::ChangeVoice { name }).await;
        }
        "health" | "logbook" | "today" | "status" => {
            // Synchronous summary replies: none of these mutate state, and
            // spec.md §4.14 bounds the HTTP response time, so the body is
            // computed here rather than queued. The reply channel itself is
            // the notifier push (no in-band HTTP reply body is sent back to
            // LINE — the provider's push API is the reply path).
            let summary = build_summary_reply(ctx, &lower).await;
            ctx.notifier.notify(
                sentinel_config::NotifyLevel::All,
                sentinel_notifier::Level::Status,
                &summary,
            )
            .await;
        }
        _ => {
            let _ = ctx.inbox.push(trimmed, user_id).await;
        }
    }
}

async fn build_summary_reply(ctx: &WebhookContext, command: &str) -> String {
    match command {
        "health" => "health check requested".to_string(),
        "logbook" => "logbook requested".to_string(),
        "today" => ctx.memory.summary().await,
        "status" => {
            let mode_manager = ctx.mode_manager.lock().await;
            let billing = ctx.billing.lock().await;
            format!("mode={} today_cost={:.2}", mode_manager.current().as_str(), billing.today_cost())
        }
        _ => String::new(),
    }
}

async fn write_audio_command(ctx: &WebhookContext, kind: AudioCommandKind) {
    let command = AudioCommand { kind, issued_at: Utc::now() };
    let _ = sentinel_state::write_snapshot(ctx.audio_cmd_path(), &command).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = "s3cr3t";
        let body = b"{\"events\":[]}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        let signature = base64::engine::general_purpose::STANDARD.encode(digest);
        assert!(verify_signature(secret, body, &signature));
    }

    #[test]
    fn bad_signature_is_rejected() {
        assert!(!verify_signature("s3cr3t", b"body", "not-a-real-signature"));
    }
}
