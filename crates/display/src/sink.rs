//! The physical panel (GPIO/I2C OLED) is an out-of-scope external
//! collaborator, the same way the voice crate treats the audio codec
//! binary: an async trait the controller drives, with a real hardware
//! implementation living outside this repo.

use async_trait::async_trait;

/// Five rendered rows, already truncated/scrolled to panel width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub rows: [String; 5],
}

#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn render(&self, frame: &Frame) -> anyhow::Result<()>;
}

/// Logs each frame at `debug` instead of pushing pixels — used in
/// development and whenever no panel driver binary is configured.
#[derive(Debug, Default)]
pub struct LogFrameSink;

#[async_trait]
impl FrameSink for LogFrameSink {
    async fn render(&self, frame: &Frame) -> anyhow::Result<()> {
        tracing::debug!(rows = ?frame.rows, "display frame");
        Ok(())
    }
}

/// Pipes the five rows (newline-joined) to stdin of an external panel
/// driver binary, one process per frame. Matches the subprocess pattern
/// `sentinel-voice` uses for its local STT/TTS binaries.
pub struct SubprocessFrameSink {
    pub binary_path: String,
}

#[async_trait]
impl FrameSink for SubprocessFrameSink {
    async fn render(&self, frame: &Frame) -> anyhow::Result<()> {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        let mut child = tokio::process::Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = frame.rows.join("\n");
            stdin.write_all(payload.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            anyhow::bail!("panel driver exited with {status}");
        }
        Ok(())
    }
}
