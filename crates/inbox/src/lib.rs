//! Event Inbox (C6) — receives raw chat text from the webhook server or a
//! GUI, classifies it as a `query` or a `goal`, and hands drained events to
//! the planner loop. Grounded on `original_source/src/line_bot.py`'s
//! `_classify_input`/`_save_event` pair.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Query,
    Goal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxEvent {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub text: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Question patterns — question marks, interrogatives, common Japanese
/// verb forms for "tell me"/"look up"/"do you know", possibility checks,
/// and definition markers. Order matches
/// `original_source/src/line_bot.py::_classify_input`.
static QUERY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[?？]",
        r"(教えて|おしえて)",
        r"(天気|気温|温度)",
        r"^(何|なに|なん)",
        r"^(いつ|どこ|誰|だれ)",
        r"(調べて|しらべて)",
        r"(どう|どんな|どれ)",
        r"(ある|ない|できる)\s*[?？]",
        r"(とは|って何|ってなに)",
        r"(意味|違い)",
        r"(わかる|知って|しって)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static query pattern must compile"))
    .collect()
});

static IMPERATIVE_ENDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(して|しろ|せよ|する)$").expect("static imperative pattern must compile"));

/// Deterministic pure classifier: `query` on any question-like pattern
/// match, or on short (≤10 char) non-imperative text; `goal` otherwise.
pub fn classify_input(text: &str) -> EventType {
    let trimmed = text.trim();

    if QUERY_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
        return EventType::Query;
    }

    if trimmed.chars().count() <= 10 && !IMPERATIVE_ENDING.is_match(trimmed) {
        return EventType::Query;
    }

    EventType::Goal
}

pub struct EventInbox {
    root: PathBuf,
}

impl EventInbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn inbox_path(&self) -> PathBuf {
        self.root.join("inbox.jsonl")
    }

    fn legacy_command_path(&self) -> PathBuf {
        self.root.join("command.txt")
    }

    /// One `<event_id>.json` file per event under a `YYYYMMDD/` directory,
    /// per spec.md §6/§8 ("`commands/history/<today>/<uuid>.json`") and
    /// `original_source/src/line_bot.py:546-552`.
    fn history_path(&self, event_id: Uuid, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("history")
            .join(at.format("%Y%m%d").to_string())
            .join(format!("{event_id}.json"))
    }

    /// Classifies `text`, appends it to the inbox and writes a per-event
    /// history file, per spec.md §4.6.
    pub async fn push(&self, text: &str, user_id: &str) -> Result<InboxEvent> {
        let event = InboxEvent {
            event_id: Uuid::new_v4(),
            event_type: classify_input(text),
            text: text.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        sentinel_state::append_jsonl(self.inbox_path(), &event).await?;
        sentinel_state::write_snapshot(self.history_path(event.event_id, event.timestamp), &event).await?;
        Ok(event)
    }

    /// Reads every pending event and truncates the inbox file. Events
    /// already live in the daily history archive from `push`, so
    /// truncating here drops no data.
    pub async fn drain(&self) -> Result<Vec<InboxEvent>> {
        let events: Vec<InboxEvent> = sentinel_state::read_jsonl(self.inbox_path()).await?;
        if !events.is_empty() {
            sentinel_state::truncate_file(self.inbox_path()).await?;
        }
        Ok(events)
    }

    /// Reads and deletes the legacy single-command file, if present.
    pub async fn drain_legacy_command(&self) -> Result<Option<String>> {
        let path = self.legacy_command_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                tokio::fs::remove_file(&path).await.ok();
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_is_query() {
        assert_eq!(classify_input("明日の天気は?"), EventType::Query);
    }

    #[test]
    fn oshiete_verb_form_is_query() {
        assert_eq!(classify_input("東京の天気を教えて"), EventType::Query);
    }

    #[test]
    fn short_non_imperative_text_is_query() {
        assert_eq!(classify_input("こんにちは"), EventType::Query);
    }

    #[test]
    fn short_imperative_text_is_goal() {
        assert_eq!(classify_input("掃除をして"), EventType::Goal);
    }

    #[test]
    fn long_imperative_instruction_is_goal() {
        assert_eq!(
            classify_input("庭の植物に毎朝水をあげるようにして"),
            EventType::Goal
        );
    }

    #[tokio::test]
    async fn push_then_drain_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = EventInbox::new(dir.path());
        inbox.push("今日のニュースを教えて", "user-1").await.unwrap();
        inbox.push("庭の掃除をして", "user-1").await.unwrap();

        let events = inbox.drain().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Query);
        assert_eq!(events[1].event_type, EventType::Goal);

        let drained_again = inbox.drain().await.unwrap();
        assert!(drained_again.is_empty());
    }

    #[tokio::test]
    async fn drained_events_remain_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = EventInbox::new(dir.path());
        let event = inbox.push("掃除をして", "user-1").await.unwrap();
        inbox.drain().await.unwrap();

        let history: InboxEvent = sentinel_state::read_snapshot(
            inbox.history_path(event.event_id, event.timestamp),
        )
        .await;
        assert_eq!(history.event_id, event.event_id);
    }

    #[tokio::test]
    async fn each_event_gets_its_own_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = EventInbox::new(dir.path());
        let first = inbox.push("今日のニュースを教えて", "user-1").await.unwrap();
        let second = inbox.push("今日のニュースを教えて", "user-1").await.unwrap();

        assert_ne!(first.event_id, second.event_id);
        assert!(inbox.history_path(first.event_id, first.timestamp).exists());
        assert!(inbox.history_path(second.event_id, second.timestamp).exists());
    }

    #[tokio::test]
    async fn legacy_command_file_is_drained_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = EventInbox::new(dir.path());
        tokio::fs::write(inbox.legacy_command_path(), "water the plants\n").await.unwrap();

        let command = inbox.drain_legacy_command().await.unwrap();
        assert_eq!(command.as_deref(), Some("water the plants"));
        assert!(!inbox.legacy_command_path().exists());

        let second = inbox.drain_legacy_command().await.unwrap();
        assert!(second.is_none());
    }
}
