//! STT/TTS abstraction (spec.md §4.8): each has a local and a remote
//! implementation behind a trait, so the arbiter never branches on which
//! backend is active.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Transcribes `wav_path` to text. Returns an empty string on any
    /// failure rather than propagating an error, per spec.md §4.8 ("returns
    /// text or empty on failure") — the caller treats empty as "nothing
    /// heard", not as a crash.
    async fn transcribe(&self, wav_path: &Path) -> String;
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesizes `text` in `voice` to a WAV file under `out_dir` and
    /// returns its path.
    async fn synthesize(&self, text: &str, voice: &str, out_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// Invokes a locally installed offline STT binary (e.g. a whisper.cpp
/// build) and reads its stdout as the transcript.
pub struct LocalSttEngine {
    pub binary_path: String,
}

#[async_trait]
impl SttEngine for LocalSttEngine {
    async fn transcribe(&self, wav_path: &Path) -> String {
        let output = tokio::process::Command::new(&self.binary_path)
            .arg(wav_path)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Ok(out) => {
                tracing::warn!(code = ?out.status.code(), "local STT exited non-zero");
                String::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn local STT binary");
                String::new()
            }
        }
    }
}

/// Posts the WAV body to a remote STT API and reads back a `{"text": ...}`
/// JSON body.
pub struct RemoteSttEngine {
    pub client: reqwest::Client,
    pub endpoint: String,
}

#[derive(serde::Deserialize)]
struct RemoteSttResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SttEngine for RemoteSttEngine {
    async fn transcribe(&self, wav_path: &Path) -> String {
        let Ok(bytes) = tokio::fs::read(wav_path).await else {
            return String::new();
        };
        let result = self
            .client
            .post(&self.endpoint)
            .header("content-type", "audio/wav")
            .body(bytes)
            .send()
            .await;
        match result {
            Ok(resp) => resp
                .json::<RemoteSttResponse>()
                .await
                .map(|r| r.text)
                .unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "remote STT request failed");
                String::new()
            }
        }
    }
}

/// Invokes a local TTS binary that writes a WAV file at the path given as
/// its last argument.
pub struct LocalTtsEngine {
    pub binary_path: String,
}

#[async_trait]
impl TtsEngine for LocalTtsEngine {
    async fn synthesize(&self, text: &str, voice: &str, out_dir: &Path) -> anyhow::Result<PathBuf> {
        let out_path = out_dir.join(format!("tts-{}.wav", uuid_like()));
        let status = tokio::process::Command::new(&self.binary_path)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(text)
            .arg("--out")
            .arg(&out_path)
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("local TTS exited with {status}");
        }
        Ok(out_path)
    }
}

/// Posts to a remote TTS API and writes the returned audio bytes to disk.
pub struct RemoteTtsEngine {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub api_key: String,
}

#[async_trait]
impl TtsEngine for RemoteTtsEngine {
    async fn synthesize(&self, text: &str, voice: &str, out_dir: &Path) -> anyhow::Result<PathBuf> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text, "voice": voice }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        let out_path = out_dir.join(format!("tts-{}.wav", uuid_like()));
        tokio::fs::write(&out_path, &bytes).await?;
        Ok(out_path)
    }
}

/// Checks a filesystem cache keyed by a hash of `(voice, text)` before
/// falling back to the remote engine, per spec.md §4.8's "hybrid" TTS.
pub struct HybridTtsEngine {
    pub remote: RemoteTtsEngine,
    pub cache_dir: PathBuf,
}

#[async_trait]
impl TtsEngine for HybridTtsEngine {
    async fn synthesize(&self, text: &str, voice: &str, out_dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await.ok();
        let cache_path = self.cache_dir.join(format!("{}.wav", cache_key(voice, text)));
        if tokio::fs::try_exists(&cache_path).await.unwrap_or(false) {
            return Ok(cache_path);
        }

        let synthesized = self.remote.synthesize(text, voice, out_dir).await?;
        if tokio::fs::copy(&synthesized, &cache_path).await.is_ok() {
            return Ok(cache_path);
        }
        Ok(synthesized)
    }
}

fn cache_key(voice: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(voice.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn uuid_like() -> String {
    format!("{:x}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_distinguishes_text() {
        let a = cache_key("alice", "hello");
        let b = cache_key("alice", "hello");
        let c = cache_key("alice", "goodbye");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn hybrid_engine_reuses_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        tokio::fs::create_dir_all(&cache_dir).await.unwrap();
        let key = cache_key("alice", "hi");
        tokio::fs::write(cache_dir.join(format!("{key}.wav")), b"cached").await.unwrap();

        let hybrid = HybridTtsEngine {
            remote: RemoteTtsEngine {
                client: reqwest::Client::new(),
                endpoint: "http://127.0.0.1:1/unreachable".to_string(),
                api_key: String::new(),
            },
            cache_dir,
        };
        let path = hybrid.synthesize("hi", "alice", dir.path()).await.unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"cached");
    }
}
