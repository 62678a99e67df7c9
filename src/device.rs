//! Default output device access.
//!
//! The controller only sees the [`AudioDevice`] trait; each platform
//! provides one backend:
//! - Linux: PulseAudio/PipeWire through `pactl` (volume) and `parec` or cpal (peak)
//! - Windows: WASAPI endpoint meter and endpoint volume

#[cfg(all(target_os = "linux", feature = "cpal"))]
mod capture;
#[cfg(target_os = "linux")]
mod peak;

#[cfg(test)]
pub mod fake;

#[cfg(target_os = "linux")]
mod pulse;

#[cfg(target_os = "windows")]
mod wasapi;

use thiserror::Error;

/// Per-call failure talking to an already acquired device. Always transient.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to read peak level: {0}")]
    PeakRead(String),
    #[error("failed to read volume: {0}")]
    VolumeRead(String),
    #[error("failed to set volume: {0}")]
    VolumeWrite(String),
}

/// Failure while acquiring the device at startup. Fatal.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[cfg(target_os = "windows")]
    #[error("failed to initialize COM: {0}")]
    ComInit(String),
    #[cfg(target_os = "windows")]
    #[error("failed to create device enumerator: {0}")]
    Enumerator(String),
    #[cfg(target_os = "windows")]
    #[error("failed to get default audio endpoint: {0}")]
    DefaultEndpoint(String),
    #[cfg(target_os = "windows")]
    #[error("failed to activate audio meter: {0}")]
    MeterActivation(String),
    #[cfg(target_os = "windows")]
    #[error("failed to activate audio endpoint volume: {0}")]
    VolumeActivation(String),
    #[cfg(target_os = "linux")]
    #[error("volume control unavailable: {0}")]
    VolumeControl(String),
    #[cfg(target_os = "linux")]
    #[error("peak capture unavailable: {0}")]
    Capture(String),
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    #[error("no audio backend available for this platform")]
    Unsupported,
}

/// Master volume and peak meter of the default output device.
///
/// Levels are normalized scalars where 1.0 is 100%. Backends that allow
/// boosting (PulseAudio) report and accept values above 1.0; each backend
/// clamps to the range it supports.
pub trait AudioDevice {
    /// Instantaneous peak amplitude of the output signal
    fn peak_level(&mut self) -> Result<f32, DeviceError>;

    /// Current master volume
    fn volume(&mut self) -> Result<f32, DeviceError>;

    /// Set the master volume
    fn set_volume(&mut self, level: f32) -> Result<(), DeviceError>;
}

impl<T: AudioDevice + ?Sized> AudioDevice for Box<T> {
    fn peak_level(&mut self) -> Result<f32, DeviceError> {
        (**self).peak_level()
    }

    fn volume(&mut self) -> Result<f32, DeviceError> {
        (**self).volume()
    }

    fn set_volume(&mut self, level: f32) -> Result<(), DeviceError> {
        (**self).set_volume(level)
    }
}

/// Acquire the platform's default output device.
pub fn open_default() -> Result<Box<dyn AudioDevice>, AcquireError> {
    #[cfg(target_os = "linux")]
    return Ok(Box::new(pulse::PulseDevice::open()?));

    #[cfg(target_os = "windows")]
    return Ok(Box::new(wasapi::WasapiDevice::open()?));

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    return Err(AcquireError::Unsupported);
}
