//! Audio resampling and sample processing

use super::types::AudioChunk;
use super::ENGINE_SAMPLE_RATE;
use rubato::{Resampler, SincFixedIn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Chunk size in samples (100 ms of audio at 16 kHz)
pub(crate) const CHUNK_SIZE: usize = 1600;

/// Process incoming samples: downmix to mono, resample if needed, buffer, emit chunks
pub(crate) fn process_samples(
    data: &[i16],
    channels: usize,
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<AudioChunk>,
    resampler: &Option<Arc<Mutex<SincFixedIn<f32>>>>,
) {
    let mono_samples: Vec<i16> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        data.to_vec()
    };

    if let Some(resampler_arc) = resampler {
        process_with_resampler(
            &mono_samples,
            input_buffer,
            input_chunk_size,
            output_buffer,
            sender,
            resampler_arc,
        );
    } else {
        process_direct(&mono_samples, output_buffer, sender);
    }
}

/// Push samples through the resampler in fixed-size input blocks
fn process_with_resampler(
    mono_samples: &[i16],
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<AudioChunk>,
    resampler_arc: &Arc<Mutex<SincFixedIn<f32>>>,
) {
    if let Ok(mut input_buf) = input_buffer.lock() {
        input_buf.extend(mono_samples);

        while input_buf.len() >= input_chunk_size {
            let input_chunk: Vec<i16> = input_buf.drain(..input_chunk_size).collect();
            let input_f32: Vec<f32> = input_chunk.iter().map(|&s| s as f32 / 32768.0).collect();

            if let Ok(mut resampler) = resampler_arc.lock() {
                match resampler.process(&[input_f32], None) {
                    Ok(resampled) => {
                        let output_i16: Vec<i16> = resampled[0]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                            .collect();
                        if let Ok(mut output_buf) = output_buffer.lock() {
                            output_buf.extend(&output_i16);
                        }
                    }
                    Err(e) => {
                        error!("Resampling error: {}", e);
                    }
                }
            }
        }
    }

    send_chunks(output_buffer, sender);
}

/// Buffer samples already at the engine sample rate
fn process_direct(
    mono_samples: &[i16],
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<AudioChunk>,
) {
    if let Ok(mut output_buf) = output_buffer.lock() {
        output_buf.extend(mono_samples);
    }
    send_chunks(output_buffer, sender);
}

/// Drain complete 100 ms chunks from the output buffer into the channel
fn send_chunks(output_buffer: &Arc<Mutex<Vec<i16>>>, sender: &mpsc::Sender<AudioChunk>) {
    if let Ok(mut output_buf) = output_buffer.lock() {
        while output_buf.len() >= CHUNK_SIZE {
            let chunk: Vec<i16> = output_buf.drain(..CHUNK_SIZE).collect();
            let audio_chunk = AudioChunk {
                samples: chunk,
                sample_rate: ENGINE_SAMPLE_RATE,
            };
            // try_send keeps the audio callback from ever blocking
            match sender.try_send(audio_chunk) {
                Ok(_) => {}
                Err(e) => {
                    warn!("Audio buffer overflow - chunk dropped: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_emits_full_chunks_only() {
        let (tx, mut rx) = mpsc::channel(8);
        let output = Arc::new(Mutex::new(Vec::new()));

        // 1.5 chunks of mono audio
        process_direct(&vec![100i16; CHUNK_SIZE + CHUNK_SIZE / 2], &output, &tx);

        let chunk = rx.try_recv().expect("one full chunk");
        assert_eq!(chunk.samples.len(), CHUNK_SIZE);
        assert_eq!(chunk.sample_rate, ENGINE_SAMPLE_RATE);
        assert!(rx.try_recv().is_err());
        assert_eq!(output.lock().unwrap().len(), CHUNK_SIZE / 2);
    }

    #[tokio::test]
    async fn test_stereo_downmix() {
        let (tx, mut rx) = mpsc::channel(8);
        let input = Arc::new(Mutex::new(Vec::new()));
        let output = Arc::new(Mutex::new(Vec::new()));

        // Stereo frames [200, 400] average to 300
        let stereo: Vec<i16> = [200i16, 400i16].repeat(CHUNK_SIZE);
        process_samples(&stereo, 2, &input, CHUNK_SIZE, &output, &tx, &None);

        let chunk = rx.try_recv().expect("one full chunk");
        assert!(chunk.samples.iter().all(|&s| s == 300));
    }
}
