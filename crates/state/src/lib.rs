//! State Files (C1) — the only shared medium between sentinel subsystems.
//!
//! Two shapes, per spec.md §4.1:
//!
//! - **Snapshot files**: last-writer-wins JSON objects, replaced atomically
//!   (write-temp-then-rename-then-fsync). Readers tolerate missing/corrupt
//!   files by returning a documented default and never block on writers.
//! - **Append-only JSONL streams**: one JSON object per line, tolerant of a
//!   corrupt or partial trailing line.
//!
//! Grounded on the teacher's `crates/memory/src/event_log.rs` atomic-write
//! and corrupt-line-tolerant-read idiom, generalized here over any
//! `Serialize + DeserializeOwned` payload instead of a single memory-event
//! type.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

/// Write `value` to `path` as a JSON snapshot, atomically.
///
/// Writes to a `.tmp` sibling in the same directory, flushes and fsyncs,
/// then renames over the target. On any failure the `.tmp` file is removed
/// and the error is logged — per spec.md §4.1, write failures are never
/// fatal to the calling subsystem, which should keep operating on its
/// in-memory view.
pub async fn write_snapshot<T: Serialize + Sync>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = sibling_tmp_path(path);
    let result: Result<()> = async {
        let rendered = serde_json::to_vec_pretty(value)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(&rendered).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        tracing::error!(path = %path.display(), error = %err, "failed to write snapshot");
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        tracing::error!(path = %path.display(), error = %err, "failed to rename snapshot into place");
        return Err(err.into());
    }

    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot.json".to_string());
    path.with_file_name(format!("{filename}.tmp"))
}

/// Read a JSON snapshot at `path`, returning `T::default()` on a missing or
/// corrupt file. Readers must never block on writers — this call only ever
/// observes a fully-written file or none at all, since writers rename into
/// place atomically.
pub async fn read_snapshot<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "corrupt snapshot — using default");
                T::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read snapshot — using default");
            T::default()
        }
    }
}

/// Append one JSON object as a line to the JSONL stream at `path`, creating
/// the file (and parent directories) if needed. Flushed and fsynced before
/// returning.
pub async fn append_jsonl<T: Serialize + Sync>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let line = serde_json::to_string(value)?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Read every object from the JSONL stream at `path`, skipping a corrupt or
/// partial line (written to `<path>.corrupt` for forensics) rather than
/// failing the whole read. A missing file yields an empty vector.
pub async fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut values = Vec::new();
    let mut corrupt_count = 0usize;
    for (line_idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => values.push(value),
            Err(err) => {
                corrupt_count += 1;
                tracing::warn!(
                    line = line_idx + 1,
                    error = %err,
                    path = %path.display(),
                    "corrupt JSONL line — skipping (preserved in .corrupt sidecar)"
                );
                let corrupt_path = path.with_extension("corrupt");
                if let Ok(mut bad) = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&corrupt_path)
                {
                    use std::io::Write as _;
                    let _ = writeln!(bad, "{line}");
                }
            }
        }
    }

    if corrupt_count > 0 {
        tracing::warn!(
            corrupt_lines = corrupt_count,
            path = %path.display(),
            "JSONL stream loaded with skipped corrupt lines"
        );
    }

    Ok(values)
}

/// Truncate a JSONL stream to empty (used by the event inbox after
/// draining, per spec.md §4.6). Not atomic-replace semantics — this is a
/// genuinely destructive truncate, appropriate only for transient queue
/// files whose processed contents are archived elsewhere first.
pub async fn truncate_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct Sample {
        n: u32,
        label: String,
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            n: 7,
            label: "hello".into(),
        };
        write_snapshot(&path, &value).await.unwrap();
        let loaded: Sample = read_snapshot(&path).await;
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn missing_snapshot_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Sample = read_snapshot(&path).await;
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn corrupt_snapshot_yields_default_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let loaded: Sample = read_snapshot(&path).await;
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn snapshot_write_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_snapshot(&path, &Sample::default()).await.unwrap();
        assert!(!sibling_tmp_path(&path).exists());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn jsonl_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append_jsonl(&path, &Sample { n: 1, label: "a".into() })
            .await
            .unwrap();
        append_jsonl(&path, &Sample { n: 2, label: "b".into() })
            .await
            .unwrap();

        let values: Vec<Sample> = read_jsonl(&path).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].n, 1);
        assert_eq!(values[1].n, 2);
    }

    #[tokio::test]
    async fn jsonl_tolerates_corrupt_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let mut content = serde_json::to_string(&Sample { n: 1, label: "a".into() }).unwrap();
        content.push('\n');
        content.push_str("{not valid json\n");
        tokio::fs::write(&path, content).await.unwrap();

        let values: Vec<Sample> = read_jsonl(&path).await.unwrap();
        assert_eq!(values.len(), 1);
        assert!(path.with_extension("corrupt").exists());
    }

    #[tokio::test]
    async fn missing_jsonl_yields_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        let values: Vec<Sample> = read_jsonl(&path).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn truncate_empties_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append_jsonl(&path, &Sample::default()).await.unwrap();
        truncate_file(&path).await.unwrap();
        let values: Vec<Sample> = read_jsonl(&path).await.unwrap();
        assert!(values.is_empty());
    }
}
