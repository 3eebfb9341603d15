//! Memory Store (C4) — append-only diary, topic files, and an index for
//! keyword search and recency. No embeddings, no vector DB: every search is
//! a keyword substring scan over plain files on disk, per spec.md §4.4.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub filename: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub filename: String,
    pub topic: String,
    pub match_count: usize,
    pub preview: String,
}

const PREVIEW_LEN: usize = 200;

/// Extracts the topic from a topic filename: the prefix before the first
/// `_`, or the whole filename if there is no `_`.
pub fn topic_of(filename: &str) -> String {
    filename
        .split_once('_')
        .map(|(topic, _)| topic.to_string())
        .unwrap_or_else(|| filename.to_string())
}

pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn topics_dir(&self) -> PathBuf {
        self.root.join("topics")
    }

    fn topic_path(&self, filename: &str) -> PathBuf {
        self.topics_dir().join(filename)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn diary_path(&self) -> PathBuf {
        self.root.join("diary.log")
    }

    async fn load_index(&self) -> Index {
        sentinel_state::read_snapshot(self.index_path()).await
    }

    async fn save_index(&self, index: &Index) -> Result<()> {
        sentinel_state::write_snapshot(self.index_path(), index).await
    }

    /// Writes a topic file, creating or overwriting it, and updates the
    /// index atomically. `filename`'s topic is everything before the first
    /// `_` (spec.md §4.4).
    pub async fn write(&self, filename: &str, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.topics_dir()).await?;
        let path = self.topic_path(filename);
        tokio::fs::write(&path, content).await?;

        let now = Utc::now();
        let size_bytes = content.len() as u64;
        let topic = topic_of(filename);

        let mut index = self.load_index().await;
        if let Some(existing) = index.entries.iter_mut().find(|e| e.filename == filename) {
            existing.updated_at = now;
            existing.size_bytes = size_bytes;
            existing.topic = topic;
        } else {
            index.entries.push(IndexEntry {
                filename: filename.to_string(),
                topic,
                created_at: now,
                updated_at: now,
                size_bytes,
            });
        }
        self.save_index(&index).await?;
        tracing::debug!(filename, "memory: wrote topic file");
        Ok(())
    }

    /// Appends a timestamped diary entry: `[YYYY-MM-DD HH:MM:SS]\n<entry>\n`.
    pub async fn append_diary(&self, entry: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.diary_path())
            .await?;
        let stamped = format!("[{}]\n{}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), entry);
        file.write_all(stamped.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Case-insensitive substring scan over all topic files, ranked by
    /// match count descending, truncated to `limit` hits.
    pub async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = keyword.to_lowercase();
        let index = self.load_index().await;
        let mut hits = Vec::new();

        for entry in &index.entries {
            let path = self.topic_path(&entry.filename);
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            let lower = content.to_lowercase();
            let match_count = lower.matches(&needle).count();
            if match_count == 0 {
                continue;
            }
            let preview = preview_of(&content);
            hits.push(SearchHit {
                filename: entry.filename.clone(),
                topic: entry.topic.clone(),
                match_count,
                preview,
            });
        }

        hits.sort_by(|a, b| b.match_count.cmp(&a.match_count));
        hits.truncate(limit);
        Ok(hits)
    }

    /// The `n` newest topic-file entries, ordered by `created_at` descending.
    pub async fn recent(&self, n: usize) -> Vec<IndexEntry> {
        let mut index = self.load_index().await;
        index.entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        index.entries.truncate(n);
        index.entries
    }

    /// Short Markdown summary of memory-store counts and recent entries, fed
    /// into the planner's prompt builder.
    pub async fn summary(&self) -> String {
        let index = self.load_index().await;
        let diary_lines = match tokio::fs::read_to_string(self.diary_path()).await {
            Ok(contents) => contents.lines().filter(|l| l.starts_with('[')).count(),
            Err(_) => 0,
        };

        let mut recent = index.entries.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(5);

        let mut out = format!(
            "## Memory\n- {} topic file(s), {} diary entr{}\n",
            index.entries.len(),
            diary_lines,
            if diary_lines == 1 { "y" } else { "ies" }
        );
        if !recent.is_empty() {
            out.push_str("Recent:\n");
            for entry in recent {
                out.push_str(&format!(
                    "- {} ({}, {})\n",
                    entry.filename,
                    entry.topic,
                    entry.created_at.format("%Y-%m-%d %H:%M")
                ));
            }
        }
        out
    }

    /// Raw content of one topic file, or `None` if it doesn't exist or
    /// isn't valid UTF-8. Used by the planner to build recent-memory
    /// previews for its context block.
    pub async fn read_topic(&self, filename: &str) -> Option<String> {
        tokio::fs::read_to_string(self.topic_path(filename)).await.ok()
    }

    /// The last `lines` timestamped diary entries, newest last, joined by
    /// blank lines. Returns an empty string if there is no diary yet.
    pub async fn read_diary_tail(&self, lines: usize) -> String {
        let contents = match tokio::fs::read_to_string(self.diary_path()).await {
            Ok(c) => c,
            Err(_) => return String::new(),
        };

        let entries: Vec<&str> = contents.split("\n[").collect();
        let mut reconstructed: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| if i == 0 { e.to_string() } else { format!("[{e}") })
            .filter(|e| !e.trim().is_empty())
            .collect();

        let start = reconstructed.len().saturating_sub(lines);
        reconstructed.drain(..start);
        reconstructed.join("\n")
    }

    /// True if `index.json` exists and parses. Used by the self-repair
    /// watchdog (spec.md §4.11) to decide whether to call `rebuild_index`.
    pub async fn index_is_healthy(&self) -> bool {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => serde_json::from_slice::<Index>(&bytes).is_ok(),
            Err(err) => err.kind() == std::io::ErrorKind::NotFound,
        }
    }

    /// Rebuilds `index.json` from whatever is actually on disk under
    /// `topics/`, discarding any previous index content. Idempotent: running
    /// it twice in a row with nothing changed on disk yields the same
    /// logical entries (spec.md §8 "rebuilding index.json is idempotent").
    /// Zero-byte files are kept in the index but reported separately so the
    /// watchdog can log them.
    pub async fn rebuild_index(&self) -> Result<(usize, Vec<String>)> {
        tokio::fs::create_dir_all(self.topics_dir()).await?;
        let mut entries = Vec::new();
        let mut zero_byte = Vec::new();

        let mut dir = tokio::fs::read_dir(self.topics_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;
            let created_at = metadata
                .created()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            let updated_at = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or(created_at);

            if metadata.len() == 0 {
                zero_byte.push(filename.clone());
            }

            entries.push(IndexEntry {
                topic: topic_of(&filename),
                filename,
                created_at,
                updated_at,
                size_bytes: metadata.len(),
            });
        }

        let count = entries.len();
        self.save_index(&Index { entries }).await?;
        Ok((count, zero_byte))
    }

    /// Drops topic files whose `created_at` is older than `days` and
    /// rebuilds the index from what remains.
    pub async fn cleanup(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut index = self.load_index().await;
        let mut removed = 0usize;

        let mut kept = Vec::with_capacity(index.entries.len());
        for entry in index.entries.drain(..) {
            if entry.created_at < cutoff {
                let path = self.topic_path(&entry.filename);
                let _ = tokio::fs::remove_file(&path).await;
                removed += 1;
            } else {
                kept.push(entry);
            }
        }
        index.entries = kept;
        self.save_index(&index).await?;
        if removed > 0 {
            tracing::info!(removed, days, "memory: cleaned up aged topic files");
        }
        Ok(removed)
    }
}

fn preview_of(content: &str) -> String {
    if content.len() <= PREVIEW_LEN {
        return content.to_string();
    }
    let mut end = PREVIEW_LEN;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> MemoryStore {
        MemoryStore::new(dir)
    }

    #[test]
    fn topic_of_splits_on_first_underscore() {
        assert_eq!(topic_of("project_notes.md"), "project");
        assert_eq!(topic_of("standalone.md"), "standalone.md");
    }

    #[tokio::test]
    async fn write_creates_file_and_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("garden_watering.md", "water the tomatoes daily").await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("topics/garden_watering.md"))
            .await
            .unwrap();
        assert_eq!(content, "water the tomatoes daily");

        let recent = mem.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].topic, "garden");
    }

    #[tokio::test]
    async fn write_twice_updates_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("garden_watering.md", "v1").await.unwrap();
        mem.write("garden_watering.md", "v2").await.unwrap();

        let recent = mem.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].size_bytes, 2);
    }

    #[tokio::test]
    async fn append_diary_formats_timestamp_header() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.append_diary("had a productive afternoon").await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("diary.log")).await.unwrap();
        assert!(content.starts_with('['));
        assert!(content.contains("had a productive afternoon"));
    }

    #[tokio::test]
    async fn search_ranks_by_match_count() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("a_one.md", "tomato tomato tomato").await.unwrap();
        mem.write("b_two.md", "tomato soup").await.unwrap();
        mem.write("c_three.md", "nothing relevant").await.unwrap();

        let hits = mem.search("tomato", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "a_one.md");
        assert_eq!(hits[0].match_count, 3);
        assert_eq!(hits[1].match_count, 1);
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("a_one.md", "Tomato Soup").await.unwrap();
        let hits = mem.search("tomato", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_drops_files_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("fresh_note.md", "new").await.unwrap();

        let mut index = mem.load_index().await;
        index.entries[0].created_at = Utc::now() - chrono::Duration::days(100);
        mem.save_index(&index).await.unwrap();

        let removed = mem.cleanup(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("topics/fresh_note.md").exists());
        assert!(mem.recent(10).await.is_empty());
    }

    #[tokio::test]
    async fn summary_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("a_one.md", "x").await.unwrap();
        mem.append_diary("entry one").await.unwrap();

        let summary = mem.summary().await;
        assert!(summary.contains("1 topic file"));
        assert!(summary.contains("1 diary entry"));
    }

    #[tokio::test]
    async fn read_topic_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        assert!(mem.read_topic("missing.md").await.is_none());
    }

    #[tokio::test]
    async fn read_topic_returns_written_content() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        mem.write("garden_notes.md", "water daily").await.unwrap();
        assert_eq!(mem.read_topic("garden_notes.md").await.as_deref(), Some("water daily"));
    }

    #[tokio::test]
    async fn read_diary_tail_keeps_only_last_n_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        for i in 0..5 {
            mem.append_diary(&format!("entry {i}")).await.unwrap();
        }

        let tail = mem.read_diary_tail(2).await;
        assert!(!tail.contains("entry 0"));
        assert!(!tail.contains("entry 2"));
        assert!(tail.contains("entry 3"));
        assert!(tail.contains("entry 4"));
    }

    #[tokio::test]
    async fn read_diary_tail_is_empty_with_no_diary() {
        let dir = tempfile::tempdir().unwrap();
        let mem = store(dir.path());
        assert_eq!(mem.read_diary_tail(20).await, String::new());
    }
}
