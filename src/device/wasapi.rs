//! WASAPI backend on the default console render endpoint.

use super::{AcquireError, AudioDevice, DeviceError};
use log::debug;
use windows::Win32::Media::Audio::Endpoints::{IAudioEndpointVolume, IAudioMeterInformation};
use windows::Win32::Media::Audio::{IMMDeviceEnumerator, MMDeviceEnumerator, eConsole, eRender};
use windows::Win32::System::Com::{
    CLSCTX_ALL, COINIT_APARTMENTTHREADED, CoCreateInstance, CoInitializeEx, CoUninitialize,
};

/// Balances the `CoInitializeEx` of the thread that opened the device
struct ComApartment;

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

// Field order matters: the interfaces must be released before COM is torn down.
pub struct WasapiDevice {
    meter: IAudioMeterInformation,
    endpoint_volume: IAudioEndpointVolume,
    _com: ComApartment,
}

impl WasapiDevice {
    pub fn open() -> Result<Self, AcquireError> {
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
            .ok()
            .map_err(|e| AcquireError::ComInit(e.to_string()))?;
        let com = ComApartment;

        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
                .map_err(|e| AcquireError::Enumerator(e.to_string()))?;

        let device = unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(|e| AcquireError::DefaultEndpoint(e.to_string()))?;

        let meter: IAudioMeterInformation = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| AcquireError::MeterActivation(e.to_string()))?;

        let endpoint_volume: IAudioEndpointVolume = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| AcquireError::VolumeActivation(e.to_string()))?;

        debug!("WASAPI endpoint meter and volume activated");

        Ok(Self {
            meter,
            endpoint_volume,
            _com: com,
        })
    }
}

impl AudioDevice for WasapiDevice {
    fn peak_level(&mut self) -> Result<f32, DeviceError> {
        unsafe { self.meter.GetPeakValue() }.map_err(|e| DeviceError::PeakRead(e.to_string()))
    }

    fn volume(&mut self) -> Result<f32, DeviceError> {
        unsafe { self.endpoint_volume.GetMasterVolumeLevelScalar() }
            .map_err(|e| DeviceError::VolumeRead(e.to_string()))
    }

    fn set_volume(&mut self, level: f32) -> Result<(), DeviceError> {
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level.clamp(0.0, 1.0), std::ptr::null())
        }
        .map_err(|e| DeviceError::VolumeWrite(e.to_string()))
    }
}
