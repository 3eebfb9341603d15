//! Storage Tierer (C12) — promotes cold files from the fast tier to the
//! archive tier, and reports a fullness warning for the fast tier.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use sentinel_config::StorageConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdFile {
    pub path: PathBuf,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullnessWarning {
    pub used_percent: f64,
    pub threshold_percent: f64,
}

pub struct StorageTierer {
    config: StorageConfig,
    excludes: GlobSet,
}

impl StorageTierer {
    pub fn new(config: StorageConfig) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            } else {
                tracing::warn!(pattern, "storage: invalid exclude glob, ignoring");
            }
        }
        let excludes = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());
        Self { config, excludes }
    }

    /// Walks the fast tier, returning regular files whose last-access time
    /// is at least `days` old and that match no exclude pattern.
    pub fn find_old_files(&self, days: i64) -> Vec<ColdFile> {
        let cutoff = SystemTime::now() - std::time::Duration::from_secs((days.max(0) as u64) * 86_400);
        let fast_root = Path::new(&self.config.fast_root);
        let mut cold = Vec::new();

        for entry in walkdir::WalkDir::new(fast_root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(fast_root).unwrap_or(entry.path());
            if self.excludes.is_match(relative) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(accessed) = metadata.accessed() else { continue };
            if accessed <= cutoff {
                cold.push(ColdFile {
                    path: entry.path().to_path_buf(),
                    last_accessed: DateTime::<Utc>::from(accessed),
                });
            }
        }

        cold
    }

    /// Moves every file from `find_old_files` into the archive tier under
    /// the same relative path, creating directories as needed. On a name
    /// collision, renames with a timestamp suffix rather than overwriting.
    /// With `dry_run`, computes the moves without touching the filesystem.
    pub async fn archive_old(&self, dry_run: bool) -> anyhow::Result<Vec<MoveRecord>> {
        let fast_root = Path::new(&self.config.fast_root);
        let archive_root = Path::new(&self.config.archive_root);
        let mut moves = Vec::new();

        for cold in self.find_old_files(self.config.access_threshold_days) {
            let relative = match cold.path.strip_prefix(fast_root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let mut destination = archive_root.join(relative);

            if destination.exists() {
                let stamp = Utc::now().format("%Y%m%d%H%M%S");
                let stem = destination.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                let ext = destination.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
                destination.set_file_name(format!("{stem}.{stamp}{ext}"));
            }

            if !dry_run {
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::rename(&cold.path, &destination).await?;
            }

            moves.push(MoveRecord {
                from: cold.path,
                to: destination,
            });
        }

        Ok(moves)
    }

    /// Reports a fullness warning when the fast tier's used space crosses
    /// `threshold_percent`.
    pub fn monitor(&self, threshold_percent: f64) -> Option<FullnessWarning> {
        let total = fs2::total_space(&self.config.fast_root).ok()?;
        let available = fs2::available_space(&self.config.fast_root).ok()?;
        if total == 0 {
            return None;
        }
        let used_percent = 100.0 * (1.0 - (available as f64 / total as f64));
        if used_percent >= threshold_percent {
            Some(FullnessWarning {
                used_percent,
                threshold_percent,
            })
        } else {
            None
        }
    }
}
