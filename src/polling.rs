use crate::controller::{DuckingController, TickOutcome};
use crate::device::{AudioDevice, DeviceError};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{Level, debug, info, log, warn};
use std::time::{Duration, Instant};

/// Cadence of peak/volume sampling
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Pause after a failed device call before trying again
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Drives the controller at a fixed interval until a stop message arrives.
///
/// Waiting is done on the stop channel, so a stop ends the current wait
/// immediately. The loop is the only owner of the controller; the
/// shutdown restore therefore never races a tick.
pub struct PollingLoop<D: AudioDevice> {
    controller: DuckingController,
    device: D,
    stop: Receiver<()>,
    interval: Duration,
    backoff: Duration,
    verbose: bool,
    /// First failed peak read of the current run of failures
    peak_outage_since: Option<Instant>,
}

impl<D: AudioDevice> PollingLoop<D> {
    pub fn new(controller: DuckingController, device: D, stop: Receiver<()>) -> Self {
        Self {
            controller,
            device,
            stop,
            interval: TICK_INTERVAL,
            backoff: RETRY_BACKOFF,
            verbose: false,
            peak_outage_since: None,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[cfg(test)]
    pub fn with_timing(mut self, interval: Duration, backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    /// Run until stopped, then put the volume back if it is reduced.
    pub fn run(&mut self) {
        info!("Audio monitoring active - press Ctrl+C to exit");

        loop {
            let wait = match self.step() {
                Ok(TickOutcome::Deferred) => self.backoff,
                Ok(_) => self.interval,
                Err(e) => {
                    let level = if self.verbose { Level::Warn } else { Level::Debug };
                    log!(level, "Skipping tick: {e}");
                    if matches!(e, DeviceError::PeakRead(_)) {
                        self.peak_outage(Instant::now());
                    }
                    self.backoff
                }
            };

            match self.stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Stop channel closed");
                    break;
                }
            }
        }

        info!("Shutting down...");
        debug!("Controller state at stop: {:?}", self.controller.state());
        self.controller.shutdown(&mut self.device);
    }

    /// One sampling pass. A failed read pushes no sample.
    fn step(&mut self) -> Result<TickOutcome, DeviceError> {
        let peak = self.device.peak_level()?;
        self.peak_outage_since = None;
        let volume = self.device.volume()?;
        Ok(self
            .controller
            .tick(peak, volume, Instant::now(), &mut self.device))
    }

    /// Without a peak level no quiet reading can ever arrive, so a reduced
    /// volume is put back once the outage outlasts the restore delay.
    fn peak_outage(&mut self, now: Instant) {
        let since = *self.peak_outage_since.get_or_insert(now);
        if !self.controller.is_reduced()
            || now.saturating_duration_since(since) <= self.controller.restore_delay()
        {
            return;
        }

        warn!(
            "No peak level for {:.1}s, releasing the volume reduction",
            now.saturating_duration_since(since).as_secs_f32()
        );
        self.controller.release(&mut self.device);
    }

    #[cfg(test)]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub fn controller(&self) -> &DuckingController {
        &self.controller
    }
}
