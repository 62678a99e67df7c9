use super::{AudioDevice, DeviceError};
use crossbeam::channel::Sender;
use std::collections::VecDeque;

/// In-memory device replaying a fixed list of peak readings.
///
/// Records every volume write and can send a stop message once the
/// script has been fully consumed.
pub struct ScriptedDevice {
    pub volume: f32,
    pub writes: Vec<f32>,
    pub peak_reads: usize,
    pub fail_peak_reads: usize,
    pub fail_volume_reads: usize,
    pub fail_writes: usize,
    peaks: VecDeque<f32>,
    fail_when_drained: bool,
    stop: Option<Sender<()>>,
    stop_after: Option<usize>,
}

impl ScriptedDevice {
    pub fn new(volume: f32) -> Self {
        Self {
            volume,
            writes: Vec::new(),
            peak_reads: 0,
            fail_peak_reads: 0,
            fail_volume_reads: 0,
            fail_writes: 0,
            peaks: VecDeque::new(),
            fail_when_drained: false,
            stop: None,
            stop_after: None,
        }
    }

    pub fn with_peaks(mut self, peaks: &[f32]) -> Self {
        self.peaks.extend(peaks);
        self
    }

    pub fn stop_when_drained(mut self, stop: Sender<()>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Every peak read after the script runs out fails, like a dead monitor
    pub fn fail_peaks_when_drained(mut self) -> Self {
        self.fail_when_drained = true;
        self
    }

    /// Send the stop message on the `reads`-th peak read instead
    pub fn stop_after_peak_reads(mut self, reads: usize, stop: Sender<()>) -> Self {
        self.stop = Some(stop);
        self.stop_after = Some(reads);
        self
    }

    fn send_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl AudioDevice for ScriptedDevice {
    fn peak_level(&mut self) -> Result<f32, DeviceError> {
        self.peak_reads += 1;
        if self.stop_after.is_some_and(|reads| self.peak_reads >= reads) {
            self.send_stop();
        }

        if self.fail_peak_reads > 0 {
            self.fail_peak_reads -= 1;
            return Err(DeviceError::PeakRead("scripted failure".into()));
        }
        if self.fail_when_drained && self.peaks.is_empty() {
            return Err(DeviceError::PeakRead("stream ended".into()));
        }

        let peak = self.peaks.pop_front().unwrap_or(0.0);
        if self.peaks.is_empty() && self.stop_after.is_none() {
            self.send_stop();
        }
        Ok(peak)
    }

    fn volume(&mut self) -> Result<f32, DeviceError> {
        if self.fail_volume_reads > 0 {
            self.fail_volume_reads -= 1;
            return Err(DeviceError::VolumeRead("scripted failure".into()));
        }
        Ok(self.volume)
    }

    fn set_volume(&mut self, level: f32) -> Result<(), DeviceError> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(DeviceError::VolumeWrite("scripted failure".into()));
        }
        self.writes.push(level);
        self.volume = level;
        Ok(())
    }
}
