//! Transcription channel for push-to-talk speech-to-text
//!
//! Maintains one persistent WebSocket per briefing session carrying
//! control messages and audio chunks out, and transcription/status
//! events in. Connection loss is surfaced to subscribers as a terminal
//! event for the current cycle; the channel never reconnects on its own
//! mid-question.

mod messages;

pub use messages::{ClientMessage, ServerMessage};

use crate::audio::AudioChunk;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// WebSocket connect timeout in seconds
const WS_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Keep-alive interval in seconds
const KEEP_ALIVE_INTERVAL_SECS: u64 = 30;

/// Errors that can occur on the transcription channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection timeout - service did not respond within {WS_CONNECT_TIMEOUT_SECS} seconds")]
    ConnectionTimeout,

    #[error("Channel closed")]
    Closed,
}

/// Inbound channel event for subscribers
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Service acknowledged the recording start
    RecordingStarted,
    /// Finished transcription for the current cycle
    Transcription {
        text: String,
        confidence: Option<f32>,
        duration_ms: Option<u64>,
    },
    /// No recognizable speech in the cycle (soft)
    NoSpeech { message: Option<String> },
    /// Cycle too short to transcribe (soft, silent)
    RecordingTooShort,
    /// Hard service error
    ServiceError {
        error_code: Option<String>,
        message: Option<String>,
    },
    /// The underlying connection dropped
    Disconnected,
}

/// Build the channel URL with the session identifier as a query parameter
pub(crate) fn build_channel_url(base_url: &str, session_id: &str) -> Result<String, ChannelError> {
    let ws_base = base_url
        .trim_end_matches('/')
        .replace("https://", "wss://")
        .replace("http://", "ws://");

    let mut url =
        url::Url::parse(&ws_base).map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
    url.query_pairs_mut().append_pair("session", session_id);
    Ok(url.to_string())
}

/// Build the WebSocket upgrade request
fn build_ws_request(ws_url: &str) -> Result<http::Request<()>, ChannelError> {
    let parsed =
        url::Url::parse(ws_url).map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ChannelError::ConnectionError("Invalid URL: no host".to_string()))?;

    http::Request::builder()
        .uri(ws_url)
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| ChannelError::ConnectionError(e.to_string()))
}

/// Generate a random Sec-WebSocket-Key
fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Persistent bidirectional stream to the speech-to-text service
///
/// Outbound messages are serialized through a single mpsc queue so
/// control frames and audio chunks preserve their relative order.
pub struct TranscriptionChannel {
    outbound_tx: mpsc::Sender<ClientMessage>,
    event_tx: broadcast::Sender<ChannelEvent>,
    should_stop: Arc<AtomicBool>,
}

impl TranscriptionChannel {
    /// Connect to the transcription service for one briefing session
    pub async fn connect(base_url: &str, session_id: &str) -> Result<Self, ChannelError> {
        let ws_url = build_channel_url(base_url, session_id)?;

        info!(ws_url = %ws_url, session_id = %session_id, "Connecting to transcription service");

        let request = build_ws_request(&ws_url)?;

        let ws_result = timeout(
            Duration::from_secs(WS_CONNECT_TIMEOUT_SECS),
            connect_async(request),
        )
        .await;

        let ws_stream = match ws_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                error!("Transcription channel connection failed: {}", e);
                return Err(ChannelError::ConnectionError(e.to_string()));
            }
            Err(_) => {
                error!("Transcription channel connection timed out");
                return Err(ChannelError::ConnectionTimeout);
            }
        };

        info!("Connected to transcription service");

        let (ws_sink, ws_read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientMessage>(256);
        let (event_tx, _) = broadcast::channel(100);
        let should_stop = Arc::new(AtomicBool::new(false));

        spawn_send_task(ws_sink, outbound_rx, should_stop.clone());
        spawn_receive_task(ws_read, event_tx.clone(), should_stop.clone());

        Ok(Self {
            outbound_tx,
            event_tx,
            should_stop,
        })
    }

    /// Subscribe to inbound channel events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Send a control message
    pub async fn send(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Encode and send one audio chunk
    pub async fn send_audio(&self, chunk: &AudioChunk) -> Result<(), ChannelError> {
        let data = base64::engine::general_purpose::STANDARD.encode(chunk.to_le_bytes());
        self.send(ClientMessage::AudioChunk { data }).await
    }

    /// Close the channel and stop its tasks
    pub fn close(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for TranscriptionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Spawn the send task: forwards outbound messages and keeps the
/// connection alive with periodic pings
fn spawn_send_task<S>(
    mut ws_sink: S,
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
    should_stop: Arc<AtomicBool>,
) where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        debug!("Channel send task started");
        let mut sent = 0u64;
        let mut keep_alive = interval(Duration::from_secs(KEEP_ALIVE_INTERVAL_SECS));
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = keep_alive.tick() => {
                    if should_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let frame = match serde_json::to_string(&ClientMessage::KeepAlive) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize keep-alive: {}", e);
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(frame)).await.is_err() {
                        warn!("Failed to send keep-alive");
                        break;
                    }
                    trace!("Sent keep-alive");
                }
                msg = outbound_rx.recv() => {
                    if should_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some(msg) = msg else {
                        info!("Outbound queue closed after {} messages", sent);
                        break;
                    };
                    let frame = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize outbound message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(frame)).await {
                        error!("Failed to send outbound message: {}", e);
                        break;
                    }
                    sent += 1;
                    if sent == 1 || sent % 100 == 0 {
                        trace!("Channel send task: {} messages sent", sent);
                    }
                }
            }
        }

        let _ = ws_sink.close().await;
        debug!("Channel send task exiting after {} messages", sent);
    });
}

/// Spawn the receive task: parses inbound frames into channel events
fn spawn_receive_task(
    mut ws_read: impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
    event_tx: broadcast::Sender<ChannelEvent>,
    should_stop: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(msg_result) = ws_read.next().await {
            if should_stop.load(Ordering::SeqCst) {
                break;
            }

            match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Channel message: {}", text);
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            if let Some(event) = event_for_message(server_msg) {
                                let _ = event_tx.send(event);
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse channel message: {} - {}", e, text);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Transcription channel closed by server");
                    let _ = event_tx.send(ChannelEvent::Disconnected);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("Channel ping/pong");
                }
                Err(e) => {
                    error!("Transcription channel receive error: {}", e);
                    let _ = event_tx.send(ChannelEvent::Disconnected);
                    break;
                }
                _ => {}
            }
        }
        debug!("Channel receive task exiting");
    });
}

/// Map a parsed server message to a subscriber event
fn event_for_message(msg: ServerMessage) -> Option<ChannelEvent> {
    match msg {
        ServerMessage::RecordingStarted => {
            debug!("Recording acknowledged by service");
            Some(ChannelEvent::RecordingStarted)
        }
        ServerMessage::Transcription {
            text,
            confidence,
            duration_ms,
        } => {
            debug!(confidence = ?confidence, "Transcription received: {}", text);
            Some(ChannelEvent::Transcription {
                text,
                confidence,
                duration_ms,
            })
        }
        ServerMessage::NoSpeech { message } => {
            debug!("No speech detected");
            Some(ChannelEvent::NoSpeech { message })
        }
        ServerMessage::RecordingTooShort => {
            debug!("Recording too short");
            Some(ChannelEvent::RecordingTooShort)
        }
        ServerMessage::Error {
            error_code,
            message,
        } => {
            error!(error_code = ?error_code, "Transcription service error: {:?}", message);
            Some(ChannelEvent::ServiceError {
                error_code,
                message,
            })
        }
        ServerMessage::KeepAliveAck => {
            trace!("Keep-alive acknowledged");
            None
        }
        ServerMessage::Other => None,
    }
}
