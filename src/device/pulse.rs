//! PulseAudio / PipeWire backend.
//!
//! Volume goes through `pactl` on `@DEFAULT_SINK@`. The peak level comes
//! from the sink's monitor source, read either by a `parec` child process
//! or, with the `cpal` feature, by a cpal input stream.

use super::peak::PeakMeter;
use super::{AcquireError, AudioDevice, DeviceError};
use log::{debug, info};
use std::process::Command;
use std::sync::Arc;

#[cfg(feature = "cpal")]
use super::capture::InputCapture;
#[cfg(not(feature = "cpal"))]
use monitor::ParecMonitor;
#[cfg(not(feature = "cpal"))]
use std::time::{Duration, Instant};

const DEFAULT_SINK: &str = "@DEFAULT_SINK@";

/// `PA_VOLUME_NORM`, the raw value pactl reports for 100%
const VOLUME_NORM: f32 = 65536.0;

/// Minimum spacing between attempts to restart a dead `parec`
#[cfg(not(feature = "cpal"))]
const MONITOR_RESTART_INTERVAL: Duration = Duration::from_secs(1);

pub struct PulseDevice {
    meter: Arc<PeakMeter>,
    /// Each channel relative to the loudest one, from the last volume read
    balance: Vec<f32>,
    #[cfg(not(feature = "cpal"))]
    _monitor: ParecMonitor,
    #[cfg(not(feature = "cpal"))]
    last_restart: Option<Instant>,
    #[cfg(feature = "cpal")]
    _stream: InputCapture,
}

impl PulseDevice {
    pub fn open() -> Result<Self, AcquireError> {
        let channels =
            read_sink_channels().map_err(|e| AcquireError::VolumeControl(e.to_string()))?;
        info!("Default sink volume: {:.0}%", loudest(&channels) * 100.0);

        let meter = Arc::new(PeakMeter::new());

        #[cfg(not(feature = "cpal"))]
        let device = Self {
            _monitor: ParecMonitor::spawn(meter.clone())?,
            last_restart: None,
            meter,
            balance: balance(&channels),
        };
        #[cfg(feature = "cpal")]
        let device = Self {
            _stream: InputCapture::open(meter.clone())?,
            meter,
            balance: balance(&channels),
        };

        Ok(device)
    }

    /// Start a fresh `parec` after the previous one went away.
    #[cfg(not(feature = "cpal"))]
    fn restart_monitor(&mut self) -> Result<(), DeviceError> {
        let now = Instant::now();
        if !restart_due(self.last_restart, now) {
            return Err(DeviceError::PeakRead("monitor stream ended".into()));
        }
        self.last_restart = Some(now);

        let meter = Arc::new(PeakMeter::new());
        let monitor = ParecMonitor::spawn(meter.clone()).map_err(|e| {
            DeviceError::PeakRead(format!("monitor stream ended, restart failed: {e}"))
        })?;

        // Dropping the old monitor reaps its child
        self._monitor = monitor;
        self.meter = meter;
        info!("Monitor stream restarted");
        Ok(())
    }
}

impl AudioDevice for PulseDevice {
    fn peak_level(&mut self) -> Result<f32, DeviceError> {
        #[cfg(not(feature = "cpal"))]
        if !self.meter.is_active() {
            self.restart_monitor()?;
        }
        Ok(self.meter.take())
    }

    fn volume(&mut self) -> Result<f32, DeviceError> {
        let channels = read_sink_channels()?;
        let volume = loudest(&channels);
        if volume > 0.0 {
            self.balance = balance(&channels);
        }
        Ok(volume)
    }

    fn set_volume(&mut self, level: f32) -> Result<(), DeviceError> {
        let raw: Vec<String> = channel_volumes(level, &self.balance)
            .iter()
            .map(u32::to_string)
            .collect();
        debug!("pactl set-sink-volume {DEFAULT_SINK} {}", raw.join(" "));

        let output = Command::new("pactl")
            .args(["set-sink-volume", DEFAULT_SINK])
            .args(&raw)
            .output()
            .map_err(|e| DeviceError::VolumeWrite(e.to_string()))?;

        if !output.status.success() {
            return Err(DeviceError::VolumeWrite(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(not(feature = "cpal"))]
fn restart_due(last_restart: Option<Instant>, now: Instant) -> bool {
    last_restart.is_none_or(|last| now.saturating_duration_since(last) >= MONITOR_RESTART_INTERVAL)
}

fn read_sink_channels() -> Result<Vec<f32>, DeviceError> {
    let output = Command::new("pactl")
        .args(["get-sink-volume", DEFAULT_SINK])
        .output()
        .map_err(|e| DeviceError::VolumeRead(e.to_string()))?;

    if !output.status.success() {
        return Err(DeviceError::VolumeRead(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_sink_channels(&stdout)
        .ok_or_else(|| DeviceError::VolumeRead(format!("unrecognized pactl output: {}", stdout.trim())))
}

/// Per-channel volumes from `pactl get-sink-volume`, as fractions of 100%.
/// Boosted sinks report values above 1.0.
///
/// Expected shape: `Volume: front-left: 32768 /  50% / -18.06 dB,   front-right: ...`
fn parse_sink_channels(text: &str) -> Option<Vec<f32>> {
    let line = text.lines().find(|l| l.trim_start().starts_with("Volume:"))?;
    line.split(',')
        .map(|channel| {
            let raw: u32 = channel.split('/').next()?.split_whitespace().last()?.parse().ok()?;
            Some(raw as f32 / VOLUME_NORM)
        })
        .collect()
}

/// The sink's overall volume is its loudest channel
fn loudest(channels: &[f32]) -> f32 {
    channels.iter().copied().fold(0.0, f32::max)
}

fn balance(channels: &[f32]) -> Vec<f32> {
    let max = loudest(channels);
    if max <= 0.0 {
        return vec![1.0; channels.len()];
    }
    channels.iter().map(|&c| c / max).collect()
}

/// Raw per-channel values for `level`, keeping the channel balance.
/// Only the lower bound is clamped: pactl accepts boosts above 100%.
fn channel_volumes(level: f32, balance: &[f32]) -> Vec<u32> {
    let level = level.max(0.0);
    if balance.is_empty() {
        return vec![(level * VOLUME_NORM).round() as u32];
    }
    balance
        .iter()
        .map(|ratio| (level * ratio * VOLUME_NORM).round() as u32)
        .collect()
}

#[cfg(not(feature = "cpal"))]
mod monitor {
    use super::{AcquireError, PeakMeter};
    use log::{debug, warn};
    use std::io::{ErrorKind, Read};
    use std::process::{Child, Command, Stdio};
    use std::sync::Arc;
    use std::thread;

    const READ_CHUNK: usize = 4096;

    /// `parec` recording the default sink's monitor as raw f32 samples
    pub struct ParecMonitor {
        child: Child,
    }

    impl ParecMonitor {
        pub fn spawn(meter: Arc<PeakMeter>) -> Result<Self, AcquireError> {
            let mut child = Command::new("parec")
                .args([
                    "--device=@DEFAULT_MONITOR@",
                    "--format=float32le",
                    "--rate=44100",
                    "--channels=2",
                    "--latency-msec=20",
                    "--raw",
                ])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| AcquireError::Capture(format!("failed to spawn parec: {e}")))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| AcquireError::Capture("parec stdout was not captured".into()))?;

            thread::Builder::new()
                .name("parec-reader".into())
                .spawn(move || {
                    read_samples(stdout, &meter);
                    meter.close();
                })
                .map_err(|e| AcquireError::Capture(format!("failed to spawn reader thread: {e}")))?;

            debug!("parec monitor started (pid {})", child.id());
            Ok(Self { child })
        }
    }

    impl Drop for ParecMonitor {
        fn drop(&mut self) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    /// Feed little-endian f32 samples into the meter until the stream ends
    pub fn read_samples(mut reader: impl Read, meter: &PeakMeter) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK * 2);
        let mut samples: Vec<f32> = Vec::with_capacity(READ_CHUNK / 4);

        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    let whole = pending.len() - pending.len() % 4;

                    samples.clear();
                    samples.extend(
                        pending[..whole]
                            .chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    );
                    meter.record(&samples);
                    pending.drain(..whole);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Monitor stream read failed: {e}");
                    break;
                }
            }
        }
        debug!("Monitor stream ended");
    }
}
