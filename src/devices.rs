//! Audio device enumeration and the output test tone.
//!
//! Devices are addressed by their index in the host's enumeration order,
//! which is what the config stores. Capture goes through cpal directly;
//! playback goes through the cpal build rodio re-exports.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::cpal::traits::{DeviceTrait as _, HostTrait as _};
use rodio::source::{SineWave, Source};
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Microphones and other capture devices.
pub fn input_devices() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "unknown".into());
                AudioDevice {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                }
            })
            .collect(),
        Err(e) => {
            warn!("Failed to list input devices: {e}");
            Vec::new()
        }
    }
}

/// Speakers, headphones and other playback devices.
pub fn output_devices() -> Vec<AudioDevice> {
    let host = rodio::cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "unknown".into());
                AudioDevice {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                }
            })
            .collect(),
        Err(e) => {
            warn!("Failed to list output devices: {e}");
            Vec::new()
        }
    }
}

/// Capture device by index, or the host default.
pub(crate) fn input_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match index {
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("No input audio device available".into())),
        Some(i) => host
            .input_devices()
            .map_err(|e| Error::Audio(format!("Failed to list input devices: {e}")))?
            .nth(i)
            .ok_or_else(|| Error::Audio(format!("No input device with index {i}"))),
    }
}

/// Open a playback stream on a device by index, or on the host default.
pub fn open_output(index: Option<usize>) -> Result<OutputStream> {
    let mut stream = match index {
        None => OutputStreamBuilder::open_default_stream()
            .map_err(|e| Error::Audio(format!("Failed to open audio output: {e}")))?,
        Some(i) => {
            let device = rodio::cpal::default_host()
                .output_devices()
                .map_err(|e| Error::Audio(format!("Failed to list output devices: {e}")))?
                .nth(i)
                .ok_or_else(|| Error::Audio(format!("No output device with index {i}")))?;
            OutputStreamBuilder::from_device(device)
                .and_then(|builder| builder.open_stream())
                .map_err(|e| Error::Audio(format!("Failed to open output device {i}: {e}")))?
        }
    };
    stream.log_on_drop(false);
    Ok(stream)
}

/// Play a one-second 440 Hz beep. Blocking.
pub fn play_test_tone(index: Option<usize>) -> Result<()> {
    let stream = open_output(index)?;
    let sink = Sink::connect_new(stream.mixer());
    sink.append(
        SineWave::new(440.0)
            .take_duration(Duration::from_secs(1))
            .amplify(0.2),
    );
    sink.sleep_until_end();
    info!("Test tone finished");
    Ok(())
}

pub fn format_device_list(title: &str, devices: &[AudioDevice]) -> String {
    let mut out = format!("{title}:\n");
    if devices.is_empty() {
        out.push_str("  (none found)\n");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        out.push_str(&format!("  [{}] {}{marker}\n", device.index, device.name));
    }
    out
}
