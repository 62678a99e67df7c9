use crate::config::MAX_SAMPLE_WINDOW;

/// Fixed-size ring of the most recent peak readings.
///
/// Starts zero-filled, so the average is biased toward "quiet" until the
/// window has been filled once.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    cursor: usize,
}

impl SampleBuffer {
    /// A window of 0 is treated as 1 (plain pass-through of the last peak).
    /// Larger windows are capped at [`MAX_SAMPLE_WINDOW`].
    pub fn new(window: usize) -> Self {
        Self {
            samples: vec![0.0; window.clamp(1, MAX_SAMPLE_WINDOW)],
            cursor: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    pub fn average(&self) -> f32 {
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn window(&self) -> usize {
        self.samples.len()
    }
}
