//! Plays a synthesized WAV file to the default output device, capped at a
//! volume percentage and bounded by a timeout. Runs on `spawn_blocking`
//! since `rodio::OutputStream` is not `Send`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

pub async fn play_wav(path: &Path, volume_percent: u8, timeout: Duration) -> Result<()> {
    let path = path.to_path_buf();
    let blocking = tokio::task::spawn_blocking(move || play_blocking(&path, volume_percent));
    match tokio::time::timeout(timeout, blocking).await {
        Ok(join_result) => join_result?,
        Err(_) => {
            tracing::warn!("playback exceeded timeout, abandoning");
            Ok(())
        }
    }
}

fn play_blocking(path: &PathBuf, volume_percent: u8) -> Result<()> {
    let (_stream, handle) = rodio::OutputStream::try_default()?;
    let sink = rodio::Sink::try_new(&handle)?;
    sink.set_volume(volume_percent as f32 / 100.0);

    let file = std::fs::File::open(path)?;
    let source = rodio::Decoder::new(std::io::BufReader::new(file))?;
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}
