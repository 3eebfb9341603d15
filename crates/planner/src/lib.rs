//! Planner Loop (C7) — the autonomous think/act/sleep cycle. Drains the
//! event inbox, checks the cost guard, calls the LLM with a fixed system
//! prompt, executes whatever action comes back, and sleeps for the current
//! mode's iteration interval. Grounded on
//! `original_source/src/agent_core.py`'s `AutonomousAgent`, generalized from
//! a single hardcoded OpenAI client to the polymorphic `sentinel_llm`
//! client and from an in-memory-only goal to a C1 snapshot the display
//! controller can read.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentinel_billing::{AlertLevel, BillingGuard};
use sentinel_config::mode_table::{Mode, ModeTable};
use sentinel_config::{BillingConfig, LlmConfig, NotifyLevel, PlannerConfig};
use sentinel_exec::CommandExecutor;
use sentinel_health::HeartbeatSnapshot;
use sentinel_inbox::{EventInbox, EventType};
use sentinel_llm::LlmClient;
use sentinel_memory::MemoryStore;
use sentinel_notifier::{CostTier, Level, Notifier};

/// Goal state as the planner and the display controller both see it. The
/// only field external actors ever ask for; everything else about an
/// iteration (commands run, LLM's `say`) is ephemeral and only reaches the
/// operator through the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalSnapshot {
    pub goal: String,
    pub updated_at: DateTime<Utc>,
    pub user_goal_active: bool,
    pub iteration_count: u64,
}

const DEFAULT_GOAL: &str = "システムの状態を確認し、有益なタスクを見つける";

impl Default for GoalSnapshot {
    fn default() -> Self {
        Self {
            goal: DEFAULT_GOAL.to_string(),
            updated_at: Utc::now(),
            user_goal_active: false,
            iteration_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GoalHistoryEntry {
    old_goal: String,
    new_goal: String,
    reason: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct MemoryWriteRequest {
    filename: String,
    content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SelfImproveRequest {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    target_file: String,
    #[serde(default)]
    request: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PlannerAction {
    say: String,
    cmd: Vec<String>,
    memory_write: Vec<MemoryWriteRequest>,
    diary_append: String,
    next_goal: String,
    #[serde(default)]
    self_improve: SelfImproveRequest,
}

const REQUIRED_KEYS: [&str; 5] = ["say", "cmd", "memory_write", "diary_append", "next_goal"];

/// Parses the LLM's reply into a `PlannerAction`, tolerating a fenced code
/// block and rejecting a response missing any required key (spec.md §4.7
/// step 5).
fn parse_action(raw: &str) -> Option<PlannerAction> {
    let stripped = sentinel_llm::strip_code_fence(raw);
    let value: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!(error = %err, "planner: llm response is not valid json");
            return None;
        }
    };

    for key in REQUIRED_KEYS {
        if value.get(key).is_none() {
            tracing::error!(key, "planner: llm response missing required key");
            return None;
        }
    }

    match serde_json::from_value(value) {
        Ok(action) => Some(action),
        Err(err) => {
            tracing::error!(error = %err, "planner: llm response does not match the action schema");
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub say: String,
    pub cmd_results: Vec<CommandOutcome>,
    pub memory_saved: usize,
    pub diary_saved: bool,
    pub self_improve_note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ShipsLogEntry {
    timestamp: DateTime<Utc>,
    say: String,
    goal: String,
    commands_run: usize,
    commands_failed: usize,
    memory_saved: usize,
    diary_saved: bool,
    self_improve_requested: bool,
}

pub enum IterationOutcome {
    Continue,
    Halted(sentinel_billing::Alert),
}

const SYSTEM_PROMPT: &str = r#"あなたはLinux上で自律的に動作するハウスキーピングAI、Sentinelです。

# ルール
1. 出力は常に単一のJSONオブジェクトのみ。それ以外のテキストを含めない。
2. 下記のJSONスキーマに厳密に従うこと。
3. コマンドは目的達成に必要な最小限のみ実行する。
4. 破壊的な操作やシステムを不安定化させる操作は絶対に行わない。
5. 長期的に有益な成果を優先し、無駄な繰り返しを避ける。

# 出力JSONスキーマ
{
  "say": "オペレーターへの短い報告（日本語）",
  "cmd": ["実行するコマンドの配列"],
  "memory_write": [{"filename": "topic_yyyymmdd_hhmmss.txt", "content": "保存する内容"}],
  "diary_append": "日誌に追記する内容",
  "next_goal": "次のイテレーションでの目標",
  "self_improve": {"enabled": false, "target_file": "", "request": ""}
}

# self_improve について
- enabled を true にしても、コードの書き換えは実行されません。分析依頼として記録されるだけです。
- target_file と request には、何をどう改善してほしいかを具体的に書いてください。

必ずJSON形式のみで応答してください。"#;

const QUICK_RESPONSE_SYSTEM_PROMPT: &str =
    "あなたはSentinelという家庭用AIです。ユーザーからの簡単な質問に、一言から数行で簡潔に日本語で答えてください。JSON形式にする必要はありません。";

pub struct Planner {
    state_dir: PathBuf,
    mode_snapshot_path: PathBuf,
    planner_config: PlannerConfig,
    mode_table: ModeTable,
    model: String,
    quick_response_model: String,
    llm: Box<dyn LlmClient>,
    executor: CommandExecutor,
    memory: MemoryStore,
    inbox: EventInbox,
    notifier: Notifier,
    billing: tokio::sync::Mutex<BillingGuard>,
    goal: tokio::sync::Mutex<GoalSnapshot>,
}

impl Planner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_dir: impl Into<PathBuf>,
        planner_config: PlannerConfig,
        mode_table: ModeTable,
        llm_config: &LlmConfig,
        llm: Box<dyn LlmClient>,
        executor: CommandExecutor,
        memory: MemoryStore,
        inbox: EventInbox,
        notifier: Notifier,
        billing_dir: impl Into<PathBuf>,
        billing_config: BillingConfig,
    ) -> Self {
        let state_dir = state_dir.into();
        let model = if llm_config.provider.eq_ignore_ascii_case("openrouter") {
            llm_config.openrouter_model.clone()
        } else {
            llm_config.ollama_model.clone()
        };

        Self {
            mode_snapshot_path: state_dir.join("ship_mode.json"),
            planner_config,
            mode_table,
            model,
            quick_response_model: llm_config.quick_response_model.clone(),
            llm,
            executor,
            memory,
            inbox,
            notifier,
            billing: tokio::sync::Mutex::new(BillingGuard::new(billing_dir, billing_config)),
            goal: tokio::sync::Mutex::new(GoalSnapshot::default()),
            state_dir,
        }
    }

    fn goal_path(&self) -> PathBuf {
        self.state_dir.join("goal.json")
    }

    fn goal_history_path(&self) -> PathBuf {
        self.state_dir.join("goal_history.jsonl")
    }

    fn heartbeat_path(&self) -> PathBuf {
        self.state_dir.join("heartbeat.json")
    }

    fn ships_log_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.state_dir.join("ships_log").join(format!("{}.jsonl", at.format("%Y%m%d")))
    }

    /// Restores the persisted goal snapshot and cost-guard usage, if any.
    /// Call once before `run_daemon`.
    pub async fn load(&self) -> Result<()> {
        *self.goal.lock().await = sentinel_state::read_snapshot(self.goal_path()).await;
        self.billing.lock().await.load().await?;
        Ok(())
    }

    pub async fn current_goal(&self) -> GoalSnapshot {
        self.goal.lock().await.clone()
    }

    /// The single external mutator for `current_goal` (spec.md §4.7's
    /// concurrency note): the inbox's `goal` events, the GUI, and the
    /// voice arbiter's `logbook`/chat-driven goal changes all submit
    /// through here rather than writing the snapshot directly. Archives
    /// the previous goal and sets the protection latch so the planner's
    /// own `next_goal` proposals don't silently revert it.
    pub async fn update_goal(&self, new_goal: &str) -> Result<()> {
        let mut goal = self.goal.lock().await;
        let old_goal = goal.goal.clone();

        let entry = GoalHistoryEntry {
            old_goal: old_goal.clone(),
            new_goal: new_goal.to_string(),
            reason: "replaced_by_user".to_string(),
            timestamp: Utc::now(),
        };
        sentinel_state::append_jsonl(self.goal_history_path(), &entry).await?;

        goal.goal = new_goal.to_string();
        goal.updated_at = Utc::now();
        goal.user_goal_active = true;
        sentinel_state::write_snapshot(self.goal_path(), &*goal).await?;

        tracing::info!(from = old_goal.as_str(), to = new_goal, "planner: goal updated by external actor");
        Ok(())
    }

    /// The LLM's own `next_goal` proposal (spec.md §4.7 step 6), applied
    /// directly rather than through `update_goal` since it is an internal
    /// actor, not an external one. Suppressed while `user_goal_active` is
    /// set unless `say` contains a configured completion marker.
    async fn apply_next_goal(&self, next_goal: &str, say: &str) -> Result<()> {
        if next_goal.is_empty() {
            return Ok(());
        }

        let mut goal = self.goal.lock().await;
        if goal.user_goal_active {
            let completed = self
                .planner_config
                .completion_markers
                .iter()
                .any(|marker| say.contains(marker.as_str()));
            if !completed {
                tracing::debug!(proposed = next_goal, "planner: suppressing llm goal change, user goal active");
                return Ok(());
            }
            tracing::info!("planner: user goal considered complete, adopting llm's next goal");
            goal.user_goal_active = false;
        }

        goal.goal = next_goal.to_string();
        goal.updated_at = Utc::now();
        sentinel_state::write_snapshot(self.goal_path(), &*goal).await?;
        Ok(())
    }

    async fn mode_config(&self) -> sentinel_config::mode_table::ModeConfig {
        let snapshot: sentinel_mode::ModeSnapshot = sentinel_state::read_snapshot(&self.mode_snapshot_path).await;
        self.mode_table
            .get(snapshot.mode)
            .unwrap_or_else(|| self.mode_table.get(Mode::default()).expect("default mode always configured"))
    }

    async fn notify_level(&self) -> NotifyLevel {
        self.mode_config().await.notify_level
    }

    async fn iteration_interval(&self) -> u64 {
        self.mode_config().await.iteration_interval_sec
    }

    /// Step 1 of the loop: drains the inbox and dispatches each event per
    /// spec.md §4.6 — `goal` events become `update_goal` calls, `query`
    /// events get a synchronous quick-response pushed through the
    /// notifier.
    async fn drain_inbox(&self) {
        let events = match self.inbox.drain().await {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(error = %err, "planner: failed to drain event inbox");
                return;
            }
        };

        for event in events {
            match event.event_type {
                EventType::Goal => {
                    if let Err(err) = self.update_goal(&event.text).await {
                        tracing::warn!(error = %err, "planner: failed to persist goal from inbox event");
                    }
                }
                EventType::Query => self.answer_query(&event.text).await,
            }
        }
    }

    async fn answer_query(&self, text: &str) {
        match self.llm.complete(QUICK_RESPONSE_SYSTEM_PROMPT, text, &self.quick_response_model).await {
            Ok(response) => {
                let _ = self
                    .billing
                    .lock()
                    .await
                    .record(&self.quick_response_model, response.input_tokens, response.output_tokens)
                    .await;
                self.notifier.notify(self.notify_level().await, Level::QueryReply, &response.text).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "planner: quick-response llm call failed");
            }
        }
    }

    /// Step 3: wall time, current goal, iteration count, last N diary
    /// lines, memory summary, and three recent-memory previews, as one
    /// plain-text block.
    async fn build_context(&self) -> String {
        let goal = self.current_goal().await;
        let diary_tail = self.memory.read_diary_tail(self.planner_config.max_history_messages).await;
        let memory_summary = self.memory.summary().await;

        let mut recent_block = String::new();
        for entry in self.memory.recent(3).await {
            if let Some(content) = self.memory.read_topic(&entry.filename).await {
                let preview: String = content.chars().take(300).collect();
                recent_block.push_str(&format!("\n### {}\n{}...\n", entry.filename, preview));
            }
        }
        if recent_block.is_empty() {
            recent_block.push_str("(none yet)");
        }

        format!(
            "# Current state\n\n\
             ## Time\n{}\n\n\
             ## Current goal\n{}\n\n\
             ## Iteration\n{}\n\n\
             ## Recent diary\n{}\n\n\
             {}\n\
             ## Recent memories\n{}\n\n\
             # Instruction\nBased on the above, output the next action as a single JSON object.",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            goal.goal,
            goal.iteration_count,
            if diary_tail.is_empty() { "(none yet)" } else { diary_tail.as_str() },
            memory_summary,
            recent_block,
        )
    }

    /// Step 6: runs every command, writes every memory entry, appends the
    /// diary, applies the goal-protection latch, and logs (without
    /// executing) any `self_improve` request.
    async fn execute_action(&self, action: &PlannerAction) -> ActionResult {
        let mut cmd_results = Vec::with_capacity(action.cmd.len());
        for cmd in &action.cmd {
            match self.executor.execute(cmd).await {
                Ok(out) => cmd_results.push(CommandOutcome {
                    command: cmd.clone(),
                    success: out.success,
                    output: out.stdout,
                    error: out.stderr,
                }),
                Err(err) => cmd_results.push(CommandOutcome {
                    command: cmd.clone(),
                    success: false,
                    output: String::new(),
                    error: err.to_string(),
                }),
            }
        }

        let mut memory_saved = 0;
        for write in &action.memory_write {
            if write.filename.is_empty() || write.content.is_empty() {
                continue;
            }
            match self.memory.write(&write.filename, &write.content).await {
                Ok(()) => memory_saved += 1,
                Err(err) => tracing::warn!(filename = %write.filename, error = %err, "planner: memory write failed"),
            }
        }

        let diary_saved = if action.diary_append.is_empty() {
            false
        } else {
            self.memory.append_diary(&action.diary_append).await.is_ok()
        };

        if let Err(err) = self.apply_next_goal(&action.next_goal, &action.say).await {
            tracing::warn!(error = %err, "planner: failed to apply next_goal");
        }

        let self_improve_note = if action.self_improve.enabled {
            tracing::warn!(
                target_file = %action.self_improve.target_file,
                request = %action.self_improve.request,
                "planner: self_improve requested; analyze-only, no write scope is configured"
            );
            Some(format!(
                "self-improve request logged (analyze-only): {}",
                action.self_improve.request
            ))
        } else {
            None
        };

        ActionResult {
            say: action.say.clone(),
            cmd_results,
            memory_saved,
            diary_saved,
            self_improve_note,
        }
    }

    async fn append_ships_log(&self, action: &PlannerAction, result: &ActionResult) -> Result<()> {
        let timestamp = Utc::now();
        let entry = ShipsLogEntry {
            timestamp,
            say: action.say.clone(),
            goal: self.current_goal().await.goal,
            commands_run: result.cmd_results.len(),
            commands_failed: result.cmd_results.iter().filter(|c| !c.success).count(),
            memory_saved: result.memory_saved,
            diary_saved: result.diary_saved,
            self_improve_requested: action.self_improve.enabled,
        };
        sentinel_state::append_jsonl(self.ships_log_path(timestamp), &entry).await
    }

    async fn heartbeat(&self) -> Result<()> {
        let iteration_count = self.current_goal().await.iteration_count;
        let snapshot = HeartbeatSnapshot {
            last_updated: Some(Utc::now()),
            iteration_count,
        };
        sentinel_state::write_snapshot(self.heartbeat_path(), &snapshot).await
    }

    /// Runs one full iteration of the loop (spec.md §4.7 steps 1-7).
    /// Malformed LLM output and per-command failures are logged and the
    /// iteration continues; an LLM transport error is logged, warned on
    /// the notifier, and the iteration skipped. A cost-guard stop alert
    /// is surfaced as `IterationOutcome::Halted` for the caller to act on.
    pub async fn run_iteration(&self) -> Result<IterationOutcome> {
        self.drain_inbox().await;

        if let Some(alert) = self.billing.lock().await.check() {
            let notify_level = self.notify_level().await;
            let tier = match alert.level {
                AlertLevel::Warning => CostTier::Warning,
                AlertLevel::Alert => CostTier::Alert,
                AlertLevel::Stop => CostTier::Stop,
            };
            self.notifier
                .notify(
                    notify_level,
                    Level::CostAlert(tier),
                    &format!("cost guard {:?}: today {:.2} >= threshold {:.2}", alert.level, alert.today_cost, alert.threshold),
                )
                .await;
            if alert.level == AlertLevel::Stop {
                return Ok(IterationOutcome::Halted(alert));
            }
        }

        {
            let mut goal = self.goal.lock().await;
            goal.iteration_count += 1;
            let _ = sentinel_state::write_snapshot(self.goal_path(), &*goal).await;
        }

        let context = self.build_context().await;
        let response = match self.llm.complete(SYSTEM_PROMPT, &context, &self.model).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "planner: llm transport error");
                self.notifier
                    .notify(self.notify_level().await, Level::Error, &format!("LLM call failed: {err}"))
                    .await;
                return Ok(IterationOutcome::Continue);
            }
        };

        let _ = self
            .billing
            .lock()
            .await
            .record(&self.model, response.input_tokens, response.output_tokens)
            .await;

        let Some(action) = parse_action(&response.text) else {
            tracing::warn!("planner: malformed llm output, skipping iteration");
            return Ok(IterationOutcome::Continue);
        };

        let result = self.execute_action(&action).await;
        if let Err(err) = self.append_ships_log(&action, &result).await {
            tracing::warn!(error = %err, "planner: failed to append ships log entry");
        }
        if let Err(err) = self.heartbeat().await {
            tracing::warn!(error = %err, "planner: failed to write heartbeat");
        }

        Ok(IterationOutcome::Continue)
    }

    /// The long-lived loop `sentinel-runtime` spawns as one worker. Stops
    /// promptly when `shutdown` is set, and on its own when the cost guard
    /// reports `stop`.
    pub async fn run_daemon(&self, shutdown: &AtomicBool) {
        let _ = self.memory.append_diary("planner started").await;

        while !shutdown.load(Ordering::Relaxed) {
            match self.run_iteration().await {
                Ok(IterationOutcome::Halted(alert)) => {
                    tracing::error!(today_cost = alert.today_cost, threshold = alert.threshold, "planner: cost guard stop, halting loop");
                    let _ = self.memory.append_diary("planner stopped: cost guard stop threshold reached").await;
                    break;
                }
                Ok(IterationOutcome::Continue) => {}
                Err(err) => {
                    tracing::error!(error = %err, "planner: iteration failed");
                    let _ = self.memory.append_diary(&format!("error: {err}")).await;
                }
            }

            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_secs(self.iteration_interval().await)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_config::AppConfig;
    use sentinel_llm::{LlmError, LlmResponse};
    use std::sync::Mutex as StdMutex;

    struct StubLlm {
        responses: StdMutex<Vec<String>>,
    }

    impl StubLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().map(|s| s.to_string()).rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _system: &str, _user: &str, _model: &str) -> Result<LlmResponse, LlmError> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::Transport("no more stubbed responses".to_string()))?;
            Ok(LlmResponse {
                text,
                input_tokens: 10,
                output_tokens: 10,
            })
        }
    }

    fn planner(dir: &std::path::Path, llm: Box<dyn LlmClient>) -> Planner {
        let config = AppConfig::default();
        let state_dir = dir.join("state");
        let audit_log_path = state_dir.join("exec_audit.jsonl");
        let notifier = Notifier::new(config.notifier.clone(), state_dir.clone());
        Planner::new(
            state_dir,
            config.planner.clone(),
            config.modes.clone(),
            &config.llm,
            llm,
            CommandExecutor::new(config.exec.clone(), audit_log_path),
            MemoryStore::new(dir.join("memory")),
            EventInbox::new(dir.join("inbox")),
            notifier,
            dir.join("billing"),
            config.billing.clone(),
        )
    }

    #[test]
    fn parse_action_rejects_fenced_json_missing_a_required_key() {
        let raw = "```json\n{\"say\": \"hi\", \"cmd\": []}\n```";
        assert!(parse_action(raw).is_none());
    }

    #[test]
    fn parse_action_accepts_fenced_complete_json() {
        let raw = "```json\n{\"say\": \"hi\", \"cmd\": [], \"memory_write\": [], \"diary_append\": \"\", \"next_goal\": \"\"}\n```";
        let action = parse_action(raw).expect("should parse");
        assert_eq!(action.say, "hi");
        assert!(!action.self_improve.enabled);
    }

    #[tokio::test]
    async fn first_iteration_defaults_to_autonomous_goal() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Box::new(StubLlm::new(vec![
            "{\"say\": \"ok\", \"cmd\": [], \"memory_write\": [], \"diary_append\": \"\", \"next_goal\": \"\"}",
        ]));
        let p = planner(dir.path(), llm);
        p.load().await.unwrap();
        assert_eq!(p.current_goal().await.goal, DEFAULT_GOAL);

        let outcome = p.run_iteration().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Continue));
        assert_eq!(p.current_goal().await.iteration_count, 1);
    }

    #[tokio::test]
    async fn next_goal_is_adopted_when_no_user_goal_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Box::new(StubLlm::new(vec![
            "{\"say\": \"switching\", \"cmd\": [], \"memory_write\": [], \"diary_append\": \"\", \"next_goal\": \"water the garden\"}",
        ]));
        let p = planner(dir.path(), llm);
        p.load().await.unwrap();
        p.run_iteration().await.unwrap();
        assert_eq!(p.current_goal().await.goal, "water the garden");
    }

    #[tokio::test]
    async fn user_goal_latch_suppresses_llm_next_goal_until_completion_marker() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Box::new(StubLlm::new(vec![
            "{\"say\": \"still working\", \"cmd\": [], \"memory_write\": [], \"diary_append\": \"\", \"next_goal\": \"something else\"}",
            "{\"say\": \"done\", \"cmd\": [], \"memory_write\": [], \"diary_append\": \"\", \"next_goal\": \"something else\"}",
        ]));
        let p = planner(dir.path(), llm);
        p.load().await.unwrap();
        p.update_goal("water the garden").await.unwrap();
        assert!(p.current_goal().await.user_goal_active);

        p.run_iteration().await.unwrap();
        assert_eq!(p.current_goal().await.goal, "water the garden");
        assert!(p.current_goal().await.user_goal_active);

        p.run_iteration().await.unwrap();
        assert_eq!(p.current_goal().await.goal, "something else");
        assert!(!p.current_goal().await.user_goal_active);
    }

    #[tokio::test]
    async fn malformed_llm_output_skips_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Box::new(StubLlm::new(vec!["not json at all"]));
        let p = planner(dir.path(), llm);
        p.load().await.unwrap();
        let outcome = p.run_iteration().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Continue));
        // iteration_count still advances even though the plan was unusable.
        assert_eq!(p.current_goal().await.iteration_count, 1);
    }

    #[tokio::test]
    async fn goal_update_is_visible_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Box::new(StubLlm::new(vec![]));
        let p = planner(dir.path(), llm);
        p.load().await.unwrap();
        p.update_goal("new goal from chat").await.unwrap();

        let llm2 = Box::new(StubLlm::new(vec![]));
        let p2 = planner(dir.path(), llm2);
        p2.load().await.unwrap();
        assert_eq!(p2.current_goal().await.goal, "new goal from chat");
        assert!(p2.current_goal().await.user_goal_active);
    }
}
