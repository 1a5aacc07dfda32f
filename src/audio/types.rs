//! Audio input types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Audio chunk ready to be streamed over the transcription channel
///
/// Contains mono PCM 16-bit samples at the engine sample rate (16 kHz).
/// One chunk covers 100 ms of audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM 16-bit signed samples (mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Duration of this chunk in milliseconds
    pub fn duration_ms(&self) -> f64 {
        (self.samples.len() as f64 / self.sample_rate as f64) * 1000.0
    }

    /// Serialize samples as little-endian PCM16 bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
    }
}

/// Handle for controlling the microphone stream from outside the capture thread
///
/// Stops the stream when dropped or when `stop()` is called explicitly.
pub struct MicrophoneHandle {
    pub(crate) is_capturing: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
}

impl MicrophoneHandle {
    /// Stop capturing and release the input device
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("Microphone released");
    }

    /// Check if the stream is still live
    pub fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        if self.is_capturing.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

/// Errors that can occur while acquiring or running the microphone
#[derive(Debug, thiserror::Error)]
pub enum MicrophoneError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),

    #[error("Audio stream error: {0}")]
    StreamError(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    PlayError(#[from] cpal::PlayStreamError),

    #[error("Default config error: {0}")]
    DefaultConfigError(#[from] cpal::DefaultStreamConfigError),
}

impl MicrophoneError {
    /// Whether this error indicates the OS refused access to the device,
    /// as opposed to the environment lacking capture support entirely.
    ///
    /// cpal does not report a distinct permission code, so a build/play
    /// failure on a present device is treated as denial while a missing
    /// device or format is treated as unsupported.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            MicrophoneError::StreamError(_)
                | MicrophoneError::PlayError(_)
                | MicrophoneError::DeviceError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk {
            samples: vec![0; 1600],
            sample_rate: 16000,
        };
        assert!((chunk.duration_ms() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_chunk_le_bytes() {
        let chunk = AudioChunk {
            samples: vec![1, -1],
            sample_rate: 16000,
        };
        assert_eq!(chunk.to_le_bytes(), vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_missing_device_is_not_permission_denied() {
        assert!(!MicrophoneError::NoInputDevice.is_permission_denied());
        assert!(!MicrophoneError::NoSupportedConfig.is_permission_denied());
    }
}
