//! Display Controller (C15) — five-line scrolling status panel. Renders
//! purely from C1 snapshot files; no direct coupling to any other
//! component's crate (see `snapshots::SnapshotReader`).

pub mod scroll;
pub mod sink;
pub mod snapshots;

use std::time::Duration;

use chrono::Utc;
use sentinel_config::{DisplayConfig, Mode};
use tokio::sync::watch;

use sink::{Frame, FrameSink};
use snapshots::{safe_truncate, SnapshotReader, SystemView};

const WIDTH: usize = 16;
/// A line-status pulse younger than this still flashes "LINE RX"/"LINE TX"
/// on row 4 instead of the AI face.
const LINE_STATUS_FRESH: chrono::Duration = chrono::Duration::seconds(5);

fn face_for(state: &str) -> &'static str {
    match state {
        "listening" => "\u{1f442}",
        "thinking" => "\u{1f914}",
        "speaking" => "\u{1f5e3}",
        _ => "\u{1f634}",
    }
}

fn row1(mode: &str, tick: u64, phase: u64) -> String {
    let glyph = Mode::parse_primary(mode)
        .or_else(|| all_modes().into_iter().find(|m| m.as_str() == mode))
        .map(|m| m.glyph())
        .unwrap_or("?");
    let text = format!("shipOS: {mode} {glyph}");
    scroll::window(safe_truncate(&text, 128), WIDTH, tick, phase)
}

fn all_modes() -> [Mode; 9] {
    [
        Mode::Autonomous,
        Mode::UserFirst,
        Mode::Maintenance,
        Mode::PowerSave,
        Mode::Safe,
        Mode::Boot,
        Mode::Storm,
        Mode::Emergency,
        Mode::Shutdown,
    ]
}

fn row2(goal: &str, tick: u64, phase: u64) -> String {
    let text = format!("DEST: {goal}");
    scroll::window(safe_truncate(&text, 256), WIDTH, tick, phase)
}

fn row3(cpu_temp_c: Option<f64>, disk_percent: Option<f64>, tick: u64, phase: u64) -> String {
    let temp = cpu_temp_c.map(|t| format!("{t:.0}")).unwrap_or_else(|| "--".to_string());
    let disk = disk_percent.map(|d| format!("{d:.0}")).unwrap_or_else(|| "--".to_string());
    let text = format!("TEMP: {temp}C DISK: {disk}%");
    scroll::window(&text, WIDTH, tick, phase)
}

fn row4(view: &SystemView, now: chrono::DateTime<Utc>) -> String {
    let rx_fresh = view.line_status.rx_at.map(|t| now - t < LINE_STATUS_FRESH).unwrap_or(false);
    let tx_fresh = view.line_status.tx_at.map(|t| now - t < LINE_STATUS_FRESH).unwrap_or(false);
    if rx_fresh {
        "AI: LINE RX".to_string()
    } else if tx_fresh {
        "AI: LINE TX".to_string()
    } else {
        format!("AI: {}", face_for(&view.ai_state.state))
    }
}

fn row5(net: &NetInfo, tick: u64, phase: u64) -> String {
    let lan = net.lan_ipv4.as_deref().unwrap_or("none");
    let ts = net.tailscale_ipv4.as_deref().unwrap_or("OFFLINE");
    let text = format!("LAN: {lan} TS: {ts}");
    scroll::window(&text, WIDTH, tick, phase)
}

#[derive(Debug, Clone, Default)]
struct NetInfo {
    lan_ipv4: Option<String>,
    tailscale_ipv4: Option<String>,
}

fn probe_network() -> NetInfo {
    let mut info = NetInfo::default();
    let Ok(ifaces) = local_ip_address::list_afinet_netifas() else {
        return info;
    };
    for (name, addr) in ifaces {
        if !addr.is_ipv4() || addr.is_loopback() {
            continue;
        }
        if name.contains("tailscale") || name.starts_with("ts") {
            info.tailscale_ipv4 = Some(addr.to_string());
        } else if info.lan_ipv4.is_none() {
            info.lan_ipv4 = Some(addr.to_string());
        }
    }
    info
}

fn boot_frame() -> Frame {
    Frame {
        rows: [
            "shipOS booting".to_string(),
            "please stand by".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ],
    }
}

fn shutdown_frame() -> Frame {
    Frame {
        rows: [
            "shipOS".to_string(),
            "shutting down...".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ],
    }
}

fn build_frame(view: &SystemView, net: &NetInfo, tick: u64) -> Frame {
    let now = Utc::now();
    Frame {
        rows: [
            row1(&view.mode.mode, tick, 0),
            row2(&view.goal.goal, tick, 3),
            row3(view.cpu_temp_c, view.disk_percent, tick, 7),
            row4(view, now),
            row5(net, tick, 11),
        ],
    }
}

/// Owns the render loop. Holds no reference to any other worker — every
/// value it needs comes from `SnapshotReader` or the local network probe.
pub struct DisplayController {
    config: DisplayConfig,
    reader: SnapshotReader,
    sink: std::sync::Arc<dyn FrameSink>,
}

impl DisplayController {
    pub fn new(
        config: DisplayConfig,
        state_dir: impl Into<std::path::PathBuf>,
        sink: std::sync::Arc<dyn FrameSink>,
    ) -> Self {
        Self { config, reader: SnapshotReader::new(state_dir), sink }
    }

    /// Renders until `shutdown` flips true, then guarantees the shutdown
    /// frame is drawn at least once before returning — the display must
    /// never be left showing a stale mid-operation frame when the process
    /// exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let _ = self.sink.render(&boot_frame()).await;

        let refresh = Duration::from_millis(self.config.refresh_ms.max(1));
        let scroll_tick = Duration::from_millis(self.config.scroll_tick_ms.max(1));
        let mut last_scroll_tick = tokio::time::Instant::now();
        let mut tick: u64 = 0;
        let mut net = probe_network();
        let mut last_net_refresh = tokio::time::Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_net_refresh.elapsed() > Duration::from_secs(30) {
                net = probe_network();
                last_net_refresh = tokio::time::Instant::now();
            }
            if last_scroll_tick.elapsed() >= scroll_tick {
                tick = tick.wrapping_add(1);
                last_scroll_tick = tokio::time::Instant::now();
            }

            let view = self.reader.read().await;
            let frame = build_frame(&view, &net, tick);
            if let Err(err) = self.sink.render(&frame).await {
                tracing::warn!(?err, "display render failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(refresh) => {}
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = self.sink.render(&shutdown_frame()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sink::LogFrameSink;
    use std::sync::Arc;

    fn default_view() -> SystemView {
        SystemView {
            mode: snapshots::ModeView { mode: "autonomous".to_string(), override_active: false },
            goal: snapshots::GoalView { goal: "idle".to_string(), user_goal_active: false },
            ai_state: snapshots::AiStateView { state: "idle".to_string() },
            line_status: Default::default(),
            cpu_temp_c: Some(42.0),
            disk_percent: Some(17.0),
        }
    }

    #[test]
    fn row1_embeds_mode_and_glyph() {
        let r = row1("autonomous", 0, 0);
        assert!(r.contains("autonomous") || r.len() == WIDTH);
    }

    #[test]
    fn row3_formats_temp_and_disk() {
        let r = row3(Some(55.4), Some(61.0), 0, 0);
        assert_eq!(r, "TEMP: 55C DISK: 61%");
    }

    #[test]
    fn row3_handles_missing_probes() {
        let r = row3(None, None, 0, 0);
        assert_eq!(r, "TEMP: --C DISK: --%");
    }

    #[test]
    fn row4_prefers_line_rx_when_fresh() {
        let mut view = default_view();
        view.line_status.rx_at = Some(Utc::now());
        assert_eq!(row4(&view, Utc::now()), "AI: LINE RX");
    }

    #[test]
    fn row4_falls_back_to_face_when_stale() {
        let mut view = default_view();
        view.line_status.rx_at = Some(Utc::now() - chrono::Duration::seconds(30));
        assert_eq!(row4(&view, Utc::now()), format!("AI: {}", face_for("idle")));
    }

    #[test]
    fn build_frame_produces_five_rows() {
        let view = default_view();
        let net = NetInfo { lan_ipv4: Some("10.0.0.5".to_string()), tailscale_ipv4: None };
        let frame = build_frame(&view, &net, 0);
        assert_eq!(frame.rows.len(), 5);
        assert!(frame.rows[4].contains("OFFLINE"));
    }

    #[tokio::test]
    async fn run_exits_promptly_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = DisplayConfig { refresh_ms: 20, scroll_tick_ms: 20 };
        let controller =
            DisplayController::new(config, dir.path(), Arc::new(LogFrameSink) as Arc<dyn FrameSink>);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { controller.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
