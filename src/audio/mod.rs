//! Microphone capture using cpal for cross-platform audio input
//!
//! Captures audio from the default input device, downmixes to mono and
//! resamples to the engine rate, then emits fixed 100 ms PCM16 chunks
//! for streaming to the transcription channel.

mod resampler;
mod types;

pub use types::{AudioChunk, MicrophoneError, MicrophoneHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::{process_samples, CHUNK_SIZE};
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Engine sample rate for speech-to-text streaming (16 kHz)
pub const ENGINE_SAMPLE_RATE: u32 = 16000;

/// Emission cadence for audio chunks in milliseconds
pub const CHUNK_INTERVAL_MS: u64 = 100;

/// Open the default input device and start capture on a dedicated thread
///
/// # Returns
/// - `MicrophoneHandle` - used to stop capture and check status
/// - `mpsc::Receiver<AudioChunk>` - receives 100 ms chunks for streaming
///
/// # Errors
/// Returns `MicrophoneError` if no input device is available, the device
/// configuration is not supported, or the stream cannot be started.
pub(crate) fn open_microphone(
) -> Result<(MicrophoneHandle, mpsc::Receiver<AudioChunk>), MicrophoneError> {
    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_clone = is_capturing.clone();

    // 60 seconds of buffered chunks before backpressure drops
    let (chunk_tx, chunk_rx) = mpsc::channel(600);

    // Probe the device on the caller's thread so acquisition failures are
    // reported synchronously rather than lost inside the capture thread.
    probe_input_device()?;

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(is_capturing_clone, chunk_tx) {
            error!("Microphone capture error: {}", e);
        }
    });

    let handle = MicrophoneHandle {
        is_capturing,
        thread_handle: Some(thread_handle),
    };

    Ok((handle, chunk_rx))
}

/// Verify an input device exists and exposes a usable configuration
fn probe_input_device() -> Result<(), MicrophoneError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MicrophoneError::NoInputDevice)?;
    device
        .supported_input_configs()
        .map_err(|e| MicrophoneError::ConfigError(e.to_string()))?;
    Ok(())
}

/// Run capture on the current thread (blocking until stopped)
fn run_capture(
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<(), MicrophoneError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(MicrophoneError::NoInputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| MicrophoneError::ConfigError(e.to_string()))?;

    // Prefer a config that supports the engine rate natively, otherwise
    // take anything and resample.
    let mut best_config = None;
    let mut found_target_rate = false;

    for config in supported_configs {
        if config.channels() > 0 {
            if config.min_sample_rate().0 <= ENGINE_SAMPLE_RATE
                && config.max_sample_rate().0 >= ENGINE_SAMPLE_RATE
            {
                best_config = Some(config.with_sample_rate(cpal::SampleRate(ENGINE_SAMPLE_RATE)));
                found_target_rate = true;
                break;
            } else if best_config.is_none() {
                best_config = Some(config.with_max_sample_rate());
            }
        }
    }

    let supported_config = best_config.ok_or(MicrophoneError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported, using {}Hz instead",
            ENGINE_SAMPLE_RATE,
            supported_config.sample_rate().0
        );
    }

    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    info!("Audio config: {} channels, {} Hz", channels, sample_rate);

    // Resample only when the device cannot run at the engine rate
    let (resampler, input_chunk_size): (Option<Arc<Mutex<SincFixedIn<f32>>>>, usize) =
        if sample_rate != ENGINE_SAMPLE_RATE {
            info!(
                "Creating resampler: {} Hz -> {} Hz",
                sample_rate, ENGINE_SAMPLE_RATE
            );
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames = (CHUNK_SIZE as f64 * sample_rate as f64 / ENGINE_SAMPLE_RATE as f64)
                .ceil() as usize;
            match SincFixedIn::<f32>::new(
                ENGINE_SAMPLE_RATE as f64 / sample_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            ) {
                Ok(resampler) => {
                    info!(
                        "Resampler configured: input {} samples -> output {} samples",
                        input_frames, CHUNK_SIZE
                    );
                    (Some(Arc::new(Mutex::new(resampler))), input_frames)
                }
                Err(e) => {
                    error!("Failed to create resampler: {}", e);
                    (None, CHUNK_SIZE)
                }
            }
        } else {
            (None, CHUNK_SIZE)
        };

    let output_buffer: Arc<Mutex<Vec<i16>>> =
        Arc::new(Mutex::new(Vec::with_capacity(CHUNK_SIZE * 2)));
    let input_buffer: Arc<Mutex<Vec<i16>>> =
        Arc::new(Mutex::new(Vec::with_capacity(input_chunk_size * 2)));

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match device.default_input_config()?.sample_format() {
        SampleFormat::I16 => {
            let is_capturing_i16 = is_capturing.clone();
            let input_buffer_i16 = input_buffer.clone();
            let output_buffer_i16 = output_buffer.clone();
            let chunk_tx_i16 = chunk_tx.clone();
            let resampler_i16 = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !is_capturing_i16.load(Ordering::SeqCst) {
                        return;
                    }
                    process_samples(
                        data,
                        channels,
                        &input_buffer_i16,
                        input_chunk_size,
                        &output_buffer_i16,
                        &chunk_tx_i16,
                        &resampler_i16,
                    );
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let is_capturing_f32 = is_capturing.clone();
            let input_buffer_f32 = input_buffer.clone();
            let output_buffer_f32 = output_buffer.clone();
            let chunk_tx_f32 = chunk_tx.clone();
            let resampler_f32 = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !is_capturing_f32.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    process_samples(
                        &samples,
                        channels,
                        &input_buffer_f32,
                        input_chunk_size,
                        &output_buffer_f32,
                        &chunk_tx_f32,
                        &resampler_f32,
                    );
                },
                err_callback,
                None,
            )?
        }
        sample_format => {
            return Err(MicrophoneError::UnsupportedFormat(format!(
                "{:?}",
                sample_format
            )));
        }
    };

    stream.play()?;
    info!("Microphone capture started");

    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(CHUNK_INTERVAL_MS));
    }

    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_microphone() {
        // Only meaningful on machines with an input device
        match open_microphone() {
            Ok((handle, _rx)) => {
                assert!(handle.is_capturing());
                drop(handle);
            }
            Err(MicrophoneError::NoInputDevice) => {
                println!("No audio input device available (expected in CI)");
            }
            Err(e) => {
                println!("Microphone unavailable: {}", e);
            }
        }
    }
}
