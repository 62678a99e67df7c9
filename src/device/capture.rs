use super::AcquireError;
use super::peak::PeakMeter;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use log::{info, warn};
use std::sync::Arc;

/// cpal input stream on the default input device, feeding a peak meter.
///
/// Point the default input at the output's monitor/loopback source for
/// this to track what the listener hears.
pub struct InputCapture {
    _stream: cpal::Stream,
}

impl InputCapture {
    pub fn open(meter: Arc<PeakMeter>) -> Result<Self, AcquireError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AcquireError::Capture("no default input device".into()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported_config = device
            .default_input_config()
            .map_err(|e| AcquireError::Capture(e.to_string()))?;
        let sample_format = supported_config.sample_format();
        let config: cpal::StreamConfig = supported_config.into();

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, meter),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, meter),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, meter),
            other => {
                return Err(AcquireError::Capture(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| AcquireError::Capture(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AcquireError::Capture(e.to_string()))?;
        info!("Capturing peak level from input device: {name}");

        Ok(Self { _stream: stream })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    meter: Arc<PeakMeter>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let peak = data
                .iter()
                .fold(0.0f32, |max, &s| max.max(s.to_sample::<f32>().abs()));
            meter.record_peak(peak);
        },
        |err| warn!("Capture stream error: {err}"),
        None,
    )
}
