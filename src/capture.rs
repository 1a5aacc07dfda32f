//! Push-to-talk capture session
//!
//! Governs the microphone lifecycle for one briefing session:
//! `idle -> requesting_permission -> ready -> recording -> processing -> (ready | error)`.
//! While recording, 100 ms chunks are forwarded to the transcription
//! channel; outside of recording, chunks from the device are discarded so
//! a new cycle always starts from an empty buffer.

use crate::audio::{self, AudioChunk, MicrophoneError, MicrophoneHandle};
use crate::channel::{ChannelError, ClientMessage, TranscriptionChannel};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capture session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Ready,
    Recording,
    Processing,
    Error,
}

/// Why a capture session entered the error state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorReason {
    /// The OS refused microphone access; the caller must re-invoke
    /// `initialize()` after the user grants consent
    PermissionDenied,
    /// Capture is unavailable in this environment; no retry
    NotSupported,
}

/// Outbound sink for capture control frames and audio chunks
///
/// The production sink is the transcription channel; tests substitute a
/// recording mock.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn send_control(&self, msg: ClientMessage) -> Result<(), ChannelError>;
    async fn send_audio(&self, chunk: &AudioChunk) -> Result<(), ChannelError>;
}

#[async_trait]
impl ChunkSink for TranscriptionChannel {
    async fn send_control(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        self.send(msg).await
    }

    async fn send_audio(&self, chunk: &AudioChunk) -> Result<(), ChannelError> {
        TranscriptionChannel::send_audio(self, chunk).await
    }
}

type MicOpener = fn() -> Result<(MicrophoneHandle, mpsc::Receiver<AudioChunk>), MicrophoneError>;

/// Push-to-talk capture session
pub struct AudioCaptureSession {
    state: CaptureState,
    error_reason: Option<CaptureErrorReason>,
    mic: Option<MicrophoneHandle>,
    forwarder: Option<tokio::task::JoinHandle<()>>,
    /// Gate read by the forwarder task; chunks are dropped while false
    forwarding: Arc<AtomicBool>,
    /// Chunks forwarded during the current recording cycle
    chunks_sent: Arc<AtomicU64>,
    sink: Arc<dyn ChunkSink>,
    open_mic: MicOpener,
}

impl AudioCaptureSession {
    /// Create a capture session that streams into the given sink
    pub fn new(sink: Arc<dyn ChunkSink>) -> Self {
        Self::with_mic_opener(sink, audio::open_microphone)
    }

    pub(crate) fn with_mic_opener(sink: Arc<dyn ChunkSink>, open_mic: MicOpener) -> Self {
        Self {
            state: CaptureState::Idle,
            error_reason: None,
            mic: None,
            forwarder: None,
            forwarding: Arc::new(AtomicBool::new(false)),
            chunks_sent: Arc::new(AtomicU64::new(0)),
            sink,
            open_mic,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Error reason, if the session is in the error state
    pub fn error_reason(&self) -> Option<CaptureErrorReason> {
        self.error_reason
    }

    /// Chunks forwarded during the current recording cycle
    pub fn chunk_count(&self) -> u64 {
        self.chunks_sent.load(Ordering::SeqCst)
    }

    /// Request microphone access and spawn the chunk forwarder
    ///
    /// Valid from `idle` or `error` (explicit retry after consent).
    /// Denial transitions to `error` and never auto-retries.
    pub fn initialize(&mut self) -> CaptureState {
        match self.state {
            CaptureState::Idle | CaptureState::Error => {}
            _ => {
                debug!(state = ?self.state, "initialize ignored");
                return self.state;
            }
        }

        self.state = CaptureState::RequestingPermission;
        self.error_reason = None;

        match (self.open_mic)() {
            Ok((mic, chunk_rx)) => {
                self.mic = Some(mic);
                self.forwarding.store(false, Ordering::SeqCst);
                self.forwarder = Some(spawn_forwarder(
                    chunk_rx,
                    self.sink.clone(),
                    self.forwarding.clone(),
                    self.chunks_sent.clone(),
                ));
                self.state = CaptureState::Ready;
                info!("Capture session ready");
            }
            Err(e) => {
                let reason = if e.is_permission_denied() {
                    CaptureErrorReason::PermissionDenied
                } else {
                    CaptureErrorReason::NotSupported
                };
                warn!(reason = ?reason, "Microphone unavailable: {}", e);
                self.error_reason = Some(reason);
                self.state = CaptureState::Error;
            }
        }
        self.state
    }

    /// Begin a recording cycle
    ///
    /// Only valid from `ready`; a no-op from any other state. Clears the
    /// chunk counter and opens the gate so live chunks flow to the sink.
    pub async fn start_recording(&mut self) {
        if self.state != CaptureState::Ready {
            debug!(state = ?self.state, "start_recording ignored");
            return;
        }
        self.chunks_sent.store(0, Ordering::SeqCst);
        if let Err(e) = self.sink.send_control(ClientMessage::StartRecording).await {
            warn!("Failed to send start_recording: {}", e);
            return;
        }
        self.forwarding.store(true, Ordering::SeqCst);
        self.state = CaptureState::Recording;
        info!("Recording started");
    }

    /// Finalize the recording cycle and wait for transcription
    ///
    /// Transitions to `processing`; the caller returns the session to
    /// `ready` via [`cycle_finished`](Self::cycle_finished) once a
    /// terminal inbound event arrives.
    pub async fn stop_recording(&mut self) {
        if self.state != CaptureState::Recording {
            debug!(state = ?self.state, "stop_recording ignored");
            return;
        }
        self.forwarding.store(false, Ordering::SeqCst);
        if let Err(e) = self.sink.send_control(ClientMessage::EndRecording).await {
            warn!("Failed to send end_recording: {}", e);
        }
        self.state = CaptureState::Processing;
        info!(
            chunks = self.chunks_sent.load(Ordering::SeqCst),
            "Recording finalized"
        );
    }

    /// Discard the recording cycle without transcribing
    ///
    /// Valid from `recording` or `processing`; returns directly to `ready`.
    pub async fn cancel_recording(&mut self) {
        match self.state {
            CaptureState::Recording | CaptureState::Processing => {}
            _ => {
                debug!(state = ?self.state, "cancel_recording ignored");
                return;
            }
        }
        self.forwarding.store(false, Ordering::SeqCst);
        if let Err(e) = self.sink.send_control(ClientMessage::CancelRecording).await {
            warn!("Failed to send cancel_recording: {}", e);
        }
        self.state = CaptureState::Ready;
        info!("Recording canceled");
    }

    /// Mark the current cycle complete after a terminal inbound event
    pub fn cycle_finished(&mut self) {
        if self.state == CaptureState::Processing {
            self.state = CaptureState::Ready;
        }
    }

    /// Terminal operation: stop any recording, release the microphone
    ///
    /// Safe to call from any state, including repeatedly.
    pub fn disconnect(&mut self) {
        self.forwarding.store(false, Ordering::SeqCst);
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(mut mic) = self.mic.take() {
            mic.stop();
        }
        if self.state != CaptureState::Idle {
            info!("Capture session disconnected");
        }
        self.state = CaptureState::Idle;
        self.error_reason = None;
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Forward microphone chunks to the sink while the gate is open
fn spawn_forwarder(
    mut chunk_rx: mpsc::Receiver<AudioChunk>,
    sink: Arc<dyn ChunkSink>,
    forwarding: Arc<AtomicBool>,
    chunks_sent: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Chunk forwarder started");
        while let Some(chunk) = chunk_rx.recv().await {
            if !forwarding.load(Ordering::SeqCst) {
                continue;
            }
            match sink.send_audio(&chunk).await {
                Ok(()) => {
                    let n = chunks_sent.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 || n % 50 == 0 {
                        debug!(
                            "Forwarded chunk #{} ({:.0}ms of audio)",
                            n,
                            n as f64 * chunk.duration_ms()
                        );
                    }
                }
                Err(e) => {
                    warn!("Failed to forward audio chunk: {}", e);
                    break;
                }
            }
        }
        debug!("Chunk forwarder exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockSink {
        controls: Mutex<Vec<String>>,
        audio_count: AtomicU64,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                controls: Mutex::new(Vec::new()),
                audio_count: AtomicU64::new(0),
            })
        }

        fn controls(&self) -> Vec<String> {
            self.controls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkSink for MockSink {
        async fn send_control(&self, msg: ClientMessage) -> Result<(), ChannelError> {
            let kind = match msg {
                ClientMessage::StartRecording => "start_recording",
                ClientMessage::AudioChunk { .. } => "audio_chunk",
                ClientMessage::EndRecording => "end_recording",
                ClientMessage::CancelRecording => "cancel_recording",
                ClientMessage::KeepAlive => "keep_alive",
            };
            self.controls.lock().unwrap().push(kind.to_string());
            Ok(())
        }

        async fn send_audio(&self, _chunk: &AudioChunk) -> Result<(), ChannelError> {
            self.audio_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fake_mic() -> Result<(MicrophoneHandle, mpsc::Receiver<AudioChunk>), MicrophoneError> {
        let (_tx, rx) = mpsc::channel(8);
        // Leak the sender side through the handle's flag only; tests that
        // need live chunks construct their own channel.
        std::mem::forget(_tx);
        Ok((
            MicrophoneHandle {
                is_capturing: Arc::new(AtomicBool::new(true)),
                thread_handle: None,
            },
            rx,
        ))
    }

    fn denied_mic() -> Result<(MicrophoneHandle, mpsc::Receiver<AudioChunk>), MicrophoneError> {
        Err(MicrophoneError::NoInputDevice)
    }

    #[tokio::test]
    async fn test_full_cycle_transitions() {
        let sink = MockSink::new();
        let mut session = AudioCaptureSession::with_mic_opener(sink.clone(), fake_mic);
        assert_eq!(session.state(), CaptureState::Idle);

        assert_eq!(session.initialize(), CaptureState::Ready);

        session.start_recording().await;
        assert_eq!(session.state(), CaptureState::Recording);

        session.stop_recording().await;
        assert_eq!(session.state(), CaptureState::Processing);

        session.cycle_finished();
        assert_eq!(session.state(), CaptureState::Ready);

        assert_eq!(sink.controls(), vec!["start_recording", "end_recording"]);
    }

    #[tokio::test]
    async fn test_denied_initialize_is_terminal() {
        let sink = MockSink::new();
        let mut session = AudioCaptureSession::with_mic_opener(sink.clone(), denied_mic);

        assert_eq!(session.initialize(), CaptureState::Error);
        assert_eq!(
            session.error_reason(),
            Some(CaptureErrorReason::NotSupported)
        );

        // start_recording in error state must not transition or send
        session.start_recording().await;
        assert_eq!(session.state(), CaptureState::Error);
        assert!(sink.controls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_returns_to_ready_without_finalizing() {
        let sink = MockSink::new();
        let mut session = AudioCaptureSession::with_mic_opener(sink.clone(), fake_mic);
        session.initialize();
        session.start_recording().await;

        session.cancel_recording().await;
        assert_eq!(session.state(), CaptureState::Ready);
        assert_eq!(sink.controls(), vec!["start_recording", "cancel_recording"]);
    }

    #[tokio::test]
    async fn test_disconnect_from_any_state() {
        let sink = MockSink::new();
        let mut session = AudioCaptureSession::with_mic_opener(sink.clone(), fake_mic);
        session.disconnect();
        assert_eq!(session.state(), CaptureState::Idle);

        session.initialize();
        session.start_recording().await;
        session.disconnect();
        assert_eq!(session.state(), CaptureState::Idle);

        // Idempotent
        session.disconnect();
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_start_recording_only_from_ready() {
        let sink = MockSink::new();
        let mut session = AudioCaptureSession::with_mic_opener(sink.clone(), fake_mic);

        // idle: no-op
        session.start_recording().await;
        assert_eq!(session.state(), CaptureState::Idle);

        session.initialize();
        session.start_recording().await;
        // recording: second start is a no-op
        session.start_recording().await;
        assert_eq!(session.state(), CaptureState::Recording);
        assert_eq!(sink.controls(), vec!["start_recording"]);
    }

    #[tokio::test]
    async fn test_forwarder_gates_on_recording() {
        let sink = MockSink::new();
        let forwarding = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(8);

        let handle = spawn_forwarder(rx, sink.clone(), forwarding.clone(), counter.clone());

        let chunk = AudioChunk {
            samples: vec![0; 1600],
            sample_rate: 16000,
        };

        // Gate closed: chunk discarded
        tx.send(chunk.clone()).await.unwrap();
        tokio::task::yield_now().await;

        forwarding.store(true, Ordering::SeqCst);
        tx.send(chunk.clone()).await.unwrap();
        tx.send(chunk).await.unwrap();
        drop(tx);
        let _ = handle.await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
