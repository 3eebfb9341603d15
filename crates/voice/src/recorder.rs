//! Recorder (spec.md §4.8): captures the default input device to a WAV file
//! between `start` and `stop`. Capture runs on a dedicated OS thread because
//! `cpal::Stream` is not `Send` and cannot be held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

pub struct Recorder {
    out_dir: PathBuf,
    stop_flag: Option<Arc<AtomicBool>>,
    join: Option<tokio::task::JoinHandle<Result<PathBuf>>>,
}

impl Recorder {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into(), stop_flag: None, join: None }
    }

    pub fn is_recording(&self) -> bool {
        self.stop_flag.is_some()
    }

    /// Starts capture on a background thread. Spec.md forbids starting
    /// while the arbiter is speaking; that check lives in the arbiter's
    /// state machine, not here.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Err(anyhow!("recorder already running"));
        }

        tokio::fs::create_dir_all(&self.out_dir).await?;
        let out_path = self.out_dir.join(format!("talk-{}.wav", chrono::Utc::now().format("%Y%m%d%H%M%S%3f")));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();

        let join = tokio::task::spawn_blocking(move || capture_to_wav(&out_path, thread_stop));
        self.stop_flag = Some(stop_flag);
        self.join = Some(join);
        Ok(())
    }

    /// Signals the capture thread to stop and returns the recorded path, or
    /// `None` if the resulting file is empty (refused per spec.md §4.8:
    /// "on empty file, speak a fixed failure message").
    pub async fn stop(&mut self) -> Result<Option<PathBuf>> {
        let Some(stop_flag) = self.stop_flag.take() else {
            return Ok(None);
        };
        stop_flag.store(true, Ordering::SeqCst);

        let join = self.join.take().expect("stop_flag and join are set together");
        let path = join.await??;

        let metadata = tokio::fs::metadata(&path).await.ok();
        if metadata.map(|m| m.len()).unwrap_or(0) <= 44 {
            // WAV header alone is 44 bytes; no audio data was captured.
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(path))
    }
}

fn capture_to_wav(out_path: &Path, stop_flag: Arc<AtomicBool>) -> Result<PathBuf> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| anyhow!("no default input device"))?;
    let config = device.default_input_config()?;

    let spec = hound::WavSpec {
        channels: config.channels(),
        sample_rate: config.sample_rate().0,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer = Arc::new(std::sync::Mutex::new(hound::WavWriter::create(out_path, spec)?));
    let writer_for_stream = writer.clone();

    let err_fn = |err| tracing::error!(error = %err, "recorder stream error");
    let stream = device.build_input_stream(
        &config.into(),
        move |data: &[f32], _| {
            if let Ok(mut writer) = writer_for_stream.lock() {
                for &sample in data {
                    let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    let _ = writer.write_sample(scaled);
                }
            }
        },
        err_fn,
        None,
    )?;
    stream.play()?;

    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    drop(stream);

    Arc::try_unwrap(writer)
        .map_err(|_| anyhow!("writer still referenced by stream callback"))?
        .into_inner()
        .map_err(|_| anyhow!("writer mutex poisoned"))?
        .finalize()?;

    Ok(out_path.to_path_buf())
}
