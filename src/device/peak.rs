use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Peak-hold meter fed by a capture thread and drained by the polling loop.
///
/// The held value is the largest absolute sample seen since the last
/// [`PeakMeter::take`], stored as `f32` bits so no lock is needed on the
/// audio side.
#[derive(Debug)]
pub struct PeakMeter {
    held: AtomicU32,
    active: AtomicBool,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self {
            held: AtomicU32::new(0.0f32.to_bits()),
            active: AtomicBool::new(true),
        }
    }

    /// Record a block of samples
    #[cfg_attr(feature = "cpal", allow(dead_code))]
    pub fn record(&self, samples: &[f32]) {
        let peak = samples.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
        self.record_peak(peak);
    }

    /// Record an already computed block peak, clamped to full scale
    pub fn record_peak(&self, peak: f32) {
        let peak = peak.min(1.0);
        let _ = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (peak > f32::from_bits(bits)).then_some(peak.to_bits())
            });
    }

    /// Return the held peak and reset it to silence
    pub fn take(&self) -> f32 {
        f32::from_bits(self.held.swap(0.0f32.to_bits(), Ordering::AcqRel))
    }

    /// Mark the feeding stream as gone; readers should stop trusting `take`
    #[cfg_attr(feature = "cpal", allow(dead_code))]
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
    }

    #[cfg_attr(feature = "cpal", allow(dead_code))]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}
