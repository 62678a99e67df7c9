use crate::config::Config;
use crate::device::AudioDevice;
use crate::sample_buffer::SampleBuffer;
use log::{debug, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Minimum spacing between verbose diagnostic lines
const DIAGNOSTIC_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DuckingState {
    Normal,
    Reduced {
        /// Volume captured when the reduction was applied
        original_volume: f32,
        /// Last tick whose average was above the threshold
        last_loud: Instant,
    },
}

/// What a single tick decided
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Loud audio detected, volume reduced
    Reduced,
    /// Still loud while reduced, restore timer refreshed
    Refreshed,
    /// Quiet long enough, original volume restored
    Restored,
    /// Reduced and quiet, but the restore delay has not elapsed
    Held,
    /// Normal and quiet
    Idle,
    /// A transition was due but the volume write failed; retried next tick
    Deferred,
}

/// Readings as they stood when a tick started, before any rule ran
#[derive(Clone, Copy, Debug, PartialEq)]
struct Diagnostic {
    at: Instant,
    peak: f32,
    average: f32,
    volume: f32,
    reduced: bool,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current peak: {:.2}, Avg peak: {:.2}, Volume: {:.0}%, Reduced: {}",
            self.peak,
            self.average,
            self.volume * 100.0,
            self.reduced
        )
    }
}

/// Hysteresis state machine turning peak readings into volume changes.
pub struct DuckingController {
    config: Config,
    samples: SampleBuffer,
    state: DuckingState,
    restore_delay: Duration,
    last_diagnostic: Option<Diagnostic>,
}

impl DuckingController {
    pub fn new(config: Config) -> Self {
        let samples = SampleBuffer::new(config.sample_window);
        debug!("Averaging over {} peak samples", samples.window());

        Self {
            restore_delay: Duration::from_secs(config.restore_delay),
            samples,
            config,
            state: DuckingState::Normal,
            last_diagnostic: None,
        }
    }

    pub fn state(&self) -> DuckingState {
        self.state
    }

    pub fn is_reduced(&self) -> bool {
        matches!(self.state, DuckingState::Reduced { .. })
    }

    pub fn restore_delay(&self) -> Duration {
        self.restore_delay
    }

    /// Feed one peak reading along with the freshly queried device volume.
    ///
    /// Rules are checked in priority order: trigger, re-trigger, restore.
    /// A loud average always refreshes the timer before any restore check,
    /// so a single quiet dip inside a loud burst never restores early.
    pub fn tick(
        &mut self,
        peak: f32,
        volume: f32,
        now: Instant,
        device: &mut dyn AudioDevice,
    ) -> TickOutcome {
        self.samples.push(peak);
        let average = self.samples.average();
        let loud = average > self.config.threshold;

        if self.config.verbose {
            self.report(peak, average, volume, now);
        }

        let state = self.state;
        let outcome = match state {
            DuckingState::Normal if loud => self.reduce(average, volume, now, device),
            DuckingState::Reduced {
                original_volume, ..
            } if loud => {
                self.state = DuckingState::Reduced {
                    original_volume,
                    last_loud: now,
                };
                TickOutcome::Refreshed
            }
            DuckingState::Reduced {
                original_volume,
                last_loud,
            } if now.saturating_duration_since(last_loud) > self.restore_delay => {
                self.restore(original_volume, device)
            }
            DuckingState::Reduced { .. } => TickOutcome::Held,
            DuckingState::Normal => TickOutcome::Idle,
        };

        outcome
    }

    /// Restore the original volume without waiting for quiet readings,
    /// used when the peak level cannot be read at all. A failed write
    /// keeps the reduction so the next call retries.
    pub fn release(&mut self, device: &mut dyn AudioDevice) -> TickOutcome {
        let DuckingState::Reduced {
            original_volume, ..
        } = self.state
        else {
            return TickOutcome::Idle;
        };

        if let Err(e) = device.set_volume(original_volume) {
            warn!("Error restoring volume: {e}");
            return TickOutcome::Deferred;
        }

        self.state = DuckingState::Normal;
        info!(
            "Peak level unavailable. Restoring volume to {:.0}%",
            original_volume * 100.0
        );
        TickOutcome::Restored
    }

    /// Put the volume back if it is currently reduced. Issues at most one
    /// write, whose failure is only logged.
    pub fn shutdown(&mut self, device: &mut dyn AudioDevice) -> bool {
        let DuckingState::Reduced {
            original_volume, ..
        } = self.state
        else {
            return false;
        };

        info!("Restoring volume to {:.0}%...", original_volume * 100.0);
        if let Err(e) = device.set_volume(original_volume) {
            warn!("Could not restore volume on shutdown: {e}");
        }
        self.state = DuckingState::Normal;
        true
    }

    fn reduce(
        &mut self,
        average: f32,
        volume: f32,
        now: Instant,
        device: &mut dyn AudioDevice,
    ) -> TickOutcome {
        let reduced = volume / self.config.division_factor;

        if let Err(e) = device.set_volume(reduced) {
            warn!("Error setting volume: {e}");
            return TickOutcome::Deferred;
        }

        self.state = DuckingState::Reduced {
            original_volume: volume,
            last_loud: now,
        };
        info!(
            "LOUD AUDIO DETECTED (avg: {average:.2})! Reducing volume from {:.0}% to {:.0}%",
            volume * 100.0,
            reduced * 100.0
        );
        TickOutcome::Reduced
    }

    fn restore(&mut self, original_volume: f32, device: &mut dyn AudioDevice) -> TickOutcome {
        if let Err(e) = device.set_volume(original_volume) {
            warn!("Error restoring volume: {e}");
            return TickOutcome::Deferred;
        }

        self.state = DuckingState::Normal;
        info!(
            "Audio normal for {}s. Restoring volume to {:.0}%",
            self.config.restore_delay,
            original_volume * 100.0
        );
        TickOutcome::Restored
    }

    fn report(&mut self, peak: f32, average: f32, volume: f32, now: Instant) {
        if !self.diagnostic_due(now) {
            return;
        }
        let diagnostic = Diagnostic {
            at: now,
            peak,
            average,
            volume,
            reduced: self.is_reduced(),
        };
        info!("{diagnostic}");
        self.last_diagnostic = Some(diagnostic);
    }

    fn diagnostic_due(&self, now: Instant) -> bool {
        self.last_diagnostic
            .is_none_or(|last| now.saturating_duration_since(last.at) >= DIAGNOSTIC_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::ScriptedDevice;

    fn config(
        threshold: f32,
        division_factor: f32,
        restore_delay: u64,
        sample_window: usize,
    ) -> Config {
        Config {
            threshold,
            division_factor,
            restore_delay,
            sample_window,
            verbose: false,
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    fn secs(start: Instant, s: f32) -> Instant {
        start + Duration::from_secs_f32(s)
    }

    /// Run one tick, reading the volume from the fake like the polling loop does
    fn step(
        controller: &mut DuckingController,
        device: &mut ScriptedDevice,
        peak: f32,
        now: Instant,
    ) -> TickOutcome {
        let volume = device.volume;
        controller.tick(peak, volume, now, device)
    }

    #[test]
    fn test_example_sequence() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);
        let t0 = Instant::now();

        let peaks = [0.1, 0.1, 0.6, 0.1, 0.1, 0.1, 0.1];
        let expected = [
            TickOutcome::Idle,
            TickOutcome::Idle,
            TickOutcome::Reduced,
            TickOutcome::Held,
            TickOutcome::Held,
            TickOutcome::Held, // exactly 3s after the trigger: not yet "more than" the delay
            TickOutcome::Restored,
        ];

        for (i, (&peak, &want)) in peaks.iter().zip(expected.iter()).enumerate() {
            let outcome = step(&mut controller, &mut device, peak, secs(t0, i as f32));
            assert_eq!(outcome, want, "tick {}", i + 1);

            if i == 2 {
                assert!(approx(device.volume, 0.2), "reduced to {}", device.volume);
            }
        }

        assert_eq!(device.writes.len(), 2);
        assert!(approx(device.writes[0], 0.2));
        assert!(approx(device.writes[1], 0.8));
        assert_eq!(controller.state(), DuckingState::Normal);
    }

    #[test]
    fn test_no_double_ducking_while_reduced() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);
        let t0 = Instant::now();

        assert_eq!(step(&mut controller, &mut device, 0.9, t0), TickOutcome::Reduced);
        for i in 1..10 {
            let outcome = step(&mut controller, &mut device, 0.9, secs(t0, i as f32 * 0.05));
            assert_eq!(outcome, TickOutcome::Refreshed);
        }

        assert_eq!(device.writes.len(), 1, "only the first trigger writes");
        match controller.state() {
            DuckingState::Reduced { original_volume, .. } => assert!(approx(original_volume, 0.8)),
            other => panic!("expected reduced state, got {other:?}"),
        }
    }

    #[test]
    fn test_loud_burst_refreshes_restore_timer() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);
        let t0 = Instant::now();

        step(&mut controller, &mut device, 0.9, t0);
        assert_eq!(step(&mut controller, &mut device, 0.1, secs(t0, 2.0)), TickOutcome::Held);
        // Loud again at 2.5s: timer restarts from here
        assert_eq!(step(&mut controller, &mut device, 0.9, secs(t0, 2.5)), TickOutcome::Refreshed);
        // 3.5s after the first trigger but only 1s after the refresh
        assert_eq!(step(&mut controller, &mut device, 0.1, secs(t0, 3.5)), TickOutcome::Held);
        assert_eq!(step(&mut controller, &mut device, 0.1, secs(t0, 5.4)), TickOutcome::Held);
        assert_eq!(step(&mut controller, &mut device, 0.1, secs(t0, 5.6)), TickOutcome::Restored);
    }

    #[test]
    fn test_restore_ignores_external_volume_drift() {
        let mut controller = DuckingController::new(config(0.4, 2.0, 0, 1));
        let mut device = ScriptedDevice::new(0.6);
        let t0 = Instant::now();

        step(&mut controller, &mut device, 0.9, t0);
        assert!(approx(device.volume, 0.3));

        // Someone moves the slider while we are reduced
        device.volume = 0.45;
        assert_eq!(step(&mut controller, &mut device, 0.0, secs(t0, 0.1)), TickOutcome::Restored);
        assert!(approx(device.volume, 0.6));
    }

    #[test]
    fn test_windowed_average_smooths_spikes() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 5));
        let mut device = ScriptedDevice::new(1.0);
        let t0 = Instant::now();

        // 0.9 / 5 = 0.18, then 0.36: still under the threshold
        assert_eq!(step(&mut controller, &mut device, 0.9, t0), TickOutcome::Idle);
        assert_eq!(step(&mut controller, &mut device, 0.9, secs(t0, 0.05)), TickOutcome::Idle);
        // 0.54 crosses it
        assert_eq!(step(&mut controller, &mut device, 0.9, secs(t0, 0.1)), TickOutcome::Reduced);
        assert!(approx(device.volume, 0.25));
    }

    #[test]
    fn test_failed_trigger_write_is_retried() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);
        device.fail_writes = 1;
        let t0 = Instant::now();

        assert_eq!(step(&mut controller, &mut device, 0.9, t0), TickOutcome::Deferred);
        assert_eq!(controller.state(), DuckingState::Normal);
        assert!(device.writes.is_empty());

        assert_eq!(step(&mut controller, &mut device, 0.9, secs(t0, 0.05)), TickOutcome::Reduced);
        assert!(approx(device.volume, 0.2));
    }

    #[test]
    fn test_failed_restore_write_stays_reduced() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 0, 1));
        let mut device = ScriptedDevice::new(0.8);
        let t0 = Instant::now();

        step(&mut controller, &mut device, 0.9, t0);
        device.fail_writes = 1;

        assert_eq!(step(&mut controller, &mut device, 0.0, secs(t0, 1.0)), TickOutcome::Deferred);
        assert!(controller.is_reduced());
        assert_eq!(step(&mut controller, &mut device, 0.0, secs(t0, 1.05)), TickOutcome::Restored);
        assert!(approx(device.volume, 0.8));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut controller = DuckingController::new(config(0.5, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);

        assert_eq!(step(&mut controller, &mut device, 0.5, Instant::now()), TickOutcome::Idle);
        assert!(device.writes.is_empty());
    }

    #[test]
    fn test_shutdown_restores_once() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);

        step(&mut controller, &mut device, 0.9, Instant::now());
        assert!(controller.shutdown(&mut device));
        assert!(!controller.shutdown(&mut device));

        assert_eq!(device.writes.len(), 2);
        assert!(approx(device.writes[1], 0.8));
        assert_eq!(controller.state(), DuckingState::Normal);
    }

    #[test]
    fn test_shutdown_ignores_restore_failure() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);

        step(&mut controller, &mut device, 0.9, Instant::now());
        device.fail_writes = 1;

        assert!(controller.shutdown(&mut device));
        assert!(!controller.is_reduced());
        assert_eq!(device.writes.len(), 1);
    }

    #[test]
    fn test_shutdown_in_normal_state_writes_nothing() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);

        assert!(!controller.shutdown(&mut device));
        assert!(device.writes.is_empty());
    }

    #[test]
    fn test_diagnostics_are_throttled() {
        let mut controller = DuckingController::new(Config {
            verbose: true,
            ..Config::default()
        });
        let mut device = ScriptedDevice::new(0.5);
        let t0 = Instant::now();
        let last_at = |c: &DuckingController| c.last_diagnostic.map(|d| d.at);

        step(&mut controller, &mut device, 0.0, t0);
        assert_eq!(last_at(&controller), Some(t0));

        step(&mut controller, &mut device, 0.0, secs(t0, 1.0));
        assert_eq!(last_at(&controller), Some(t0));

        let later = secs(t0, 2.0);
        step(&mut controller, &mut device, 0.0, later);
        assert_eq!(last_at(&controller), Some(later));
    }

    #[test]
    fn test_diagnostic_reports_readings_before_the_transition() {
        let mut controller = DuckingController::new(Config {
            verbose: true,
            ..config(0.4, 4.0, 3, 1)
        });
        let mut device = ScriptedDevice::new(0.8);
        let t0 = Instant::now();

        assert_eq!(step(&mut controller, &mut device, 0.9, t0), TickOutcome::Reduced);

        let diagnostic = controller.last_diagnostic.unwrap();
        assert!(!diagnostic.reduced, "state should be the one the tick started in");
        assert!(approx(diagnostic.volume, 0.8), "volume was {}", diagnostic.volume);
        assert_eq!(
            diagnostic.to_string(),
            "Current peak: 0.90, Avg peak: 0.90, Volume: 80%, Reduced: false"
        );
    }

    #[test]
    fn test_release_restores_without_quiet_readings() {
        let mut controller = DuckingController::new(config(0.4, 4.0, 3, 1));
        let mut device = ScriptedDevice::new(0.8);

        step(&mut controller, &mut device, 0.9, Instant::now());
        device.fail_writes = 1;
        assert_eq!(controller.release(&mut device), TickOutcome::Deferred);
        assert!(controller.is_reduced());

        assert_eq!(controller.release(&mut device), TickOutcome::Restored);
        assert!(approx(device.volume, 0.8));
        assert_eq!(controller.release(&mut device), TickOutcome::Idle);
        assert_eq!(device.writes.len(), 2);
    }
}
