//! Endpoint volume access using IAudioEndpointVolume.

use super::device::AudioError;
use super::provider::scalar_to_level;
use windows::Win32::Media::Audio::{Endpoints::IAudioEndpointVolume, IMMDevice};
use windows::Win32::System::Com::CLSCTX_ALL;

/// Volume controller for one endpoint.
pub struct VolumeController {
    endpoint_volume: IAudioEndpointVolume,
}

impl VolumeController {
    /// Activate the volume interface of the given endpoint.
    pub fn new(device: &IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|_| AudioError::VolumeNotAvailable)?;

            Ok(Self { endpoint_volume })
        }
    }

    pub fn get_mute(&self) -> Result<bool, AudioError> {
        unsafe {
            let muted = self
                .endpoint_volume
                .GetMute()
                .map_err(AudioError::WindowsError)?;
            Ok(muted.as_bool())
        }
    }

    /// Master volume scalar (0.0 to 1.0).
    pub fn get_volume(&self) -> Result<f32, AudioError> {
        unsafe {
            self.endpoint_volume
                .GetMasterVolumeLevelScalar()
                .map_err(AudioError::WindowsError)
        }
    }

    /// Volume on the 0..=1000 scale, zero when muted.
    pub fn level(&self) -> Result<u16, AudioError> {
        if self.get_mute()? {
            return Ok(0);
        }
        Ok(scalar_to_level(self.get_volume()?))
    }

    pub fn into_raw(self) -> IAudioEndpointVolume {
        self.endpoint_volume
    }
}
