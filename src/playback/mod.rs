//! Narration playback controller
//!
//! Plays one streamed narration resource at a time and reports progress,
//! completion, and failure through a typed event channel. Audio output is
//! gated behind an explicit `unlock()` call: loads issued before unlock
//! are queued and start once the output device is acquired, mirroring the
//! create -> unlock -> use -> dispose lifecycle a front end drives from a
//! user gesture.
//!
//! The output device lives on a dedicated thread because the rodio output
//! stream is not `Send`; narration bytes are fetched on the async runtime
//! and handed to that thread for decode and playback.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Progress reporting cadence
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Playback event for subscribers
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// Enough data buffered; playback began
    Started,
    /// Periodic position report, bounded cadence
    Progress {
        position: Duration,
        duration: Option<Duration>,
    },
    /// Playback reached the end; fires exactly once per load
    Completed,
    /// Playback failed; fires at most once per load and terminates it
    Failed { reason: String },
}

/// Abstraction over narration playback, implemented by the rodio-backed
/// controller and by test doubles
pub trait NarrationPlayer: Send + Sync {
    /// Acquire the shared audio output; must be called once before the
    /// first `load` takes effect. Idempotent.
    fn unlock(&self);
    /// Begin streaming playback of a narration resource. Queued if the
    /// output is not yet unlocked.
    fn load(&self, url: &str);
    /// Halt playback immediately. Idempotent.
    fn stop(&self);
    /// Subscribe to playback events
    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent>;
}

/// Command handed to the playback thread
enum PlayerCommand {
    Play { bytes: Vec<u8> },
    Stop,
    Dispose,
}

struct ControllerInner {
    unlocked: bool,
    /// Output device could not be acquired; all loads fail fast
    unavailable: bool,
    queued_url: Option<String>,
    command_tx: Option<std::sync::mpsc::Sender<PlayerCommand>>,
}

/// Streamed narration playback backed by the default audio output device
pub struct AudioPlaybackController {
    inner: Arc<Mutex<ControllerInner>>,
    event_tx: broadcast::Sender<PlaybackEvent>,
    http: reqwest::Client,
}

impl AudioPlaybackController {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Mutex::new(ControllerInner {
                unlocked: false,
                unavailable: false,
                queued_url: None,
                command_tx: None,
            })),
            event_tx,
            http: reqwest::Client::new(),
        }
    }

    /// Release the output device and stop the playback thread
    pub fn dispose(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(tx) = inner.command_tx.take() {
            let _ = tx.send(PlayerCommand::Dispose);
        }
        inner.unlocked = false;
        inner.queued_url = None;
    }

    /// Fetch the narration resource and hand it to the playback thread
    fn begin_load(&self, url: String) {
        let inner = self.inner.clone();
        let event_tx = self.event_tx.clone();
        let http = self.http.clone();

        tokio::spawn(async move {
            debug!(url = %url, "Fetching narration audio");
            let bytes = match fetch_narration(&http, &url).await {
                Ok(bytes) => bytes,
                Err(reason) => {
                    warn!(url = %url, "Narration fetch failed: {}", reason);
                    let _ = event_tx.send(PlaybackEvent::Failed { reason });
                    return;
                }
            };

            let command_tx = match inner.lock() {
                Ok(guard) => guard.command_tx.clone(),
                Err(_) => None,
            };
            match command_tx {
                Some(tx) => {
                    if tx.send(PlayerCommand::Play { bytes }).is_err() {
                        let _ = event_tx.send(PlaybackEvent::Failed {
                            reason: "playback thread gone".to_string(),
                        });
                    }
                }
                None => {
                    let _ = event_tx.send(PlaybackEvent::Failed {
                        reason: "audio output not available".to_string(),
                    });
                }
            }
        });
    }
}

impl Default for AudioPlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl NarrationPlayer for AudioPlaybackController {
    fn unlock(&self) {
        let queued = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.unlocked || inner.unavailable {
                return;
            }
            match spawn_playback_thread(self.event_tx.clone()) {
                Ok(tx) => {
                    inner.command_tx = Some(tx);
                    inner.unlocked = true;
                    info!("Audio output unlocked");
                }
                Err(reason) => {
                    warn!("Audio output unavailable: {}", reason);
                    inner.unavailable = true;
                }
            }
            inner.queued_url.take()
        };

        if let Some(url) = queued {
            debug!("Starting queued narration load");
            self.load(&url);
        }
    }

    fn load(&self, url: &str) {
        {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.unavailable {
                let _ = self.event_tx.send(PlaybackEvent::Failed {
                    reason: "audio output not available".to_string(),
                });
                return;
            }
            if !inner.unlocked {
                debug!(url = %url, "Output locked, queueing narration load");
                inner.queued_url = Some(url.to_string());
                return;
            }
            // Preempt whatever is currently playing
            if let Some(tx) = &inner.command_tx {
                let _ = tx.send(PlayerCommand::Stop);
            }
        }
        self.begin_load(url.to_string());
    }

    fn stop(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.queued_url = None;
        if let Some(tx) = &inner.command_tx {
            let _ = tx.send(PlayerCommand::Stop);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for AudioPlaybackController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Download the narration resource, mapping failures to a reason string
async fn fetch_narration(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let response = http
        .get(url)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("narration endpoint returned {}", status));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("stream read failed: {}", e))?;

    if bytes.is_empty() {
        return Err("narration resource is empty".to_string());
    }
    Ok(bytes.to_vec())
}

/// Spawn the dedicated output thread owning the rodio stream
fn spawn_playback_thread(
    event_tx: broadcast::Sender<PlaybackEvent>,
) -> Result<std::sync::mpsc::Sender<PlayerCommand>, String> {
    let (command_tx, command_rx) = std::sync::mpsc::channel::<PlayerCommand>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

    std::thread::Builder::new()
        .name("narration-playback".to_string())
        .spawn(move || {
            let (stream, handle) = match rodio::OutputStream::try_default() {
                Ok(pair) => {
                    let _ = ready_tx.send(Ok(()));
                    pair
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            // The stream must outlive every sink created from its handle
            let _stream = stream;
            run_playback_loop(&handle, command_rx, event_tx);
        })
        .map_err(|e| e.to_string())?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(command_tx),
        Ok(Err(reason)) => Err(reason),
        Err(_) => Err("playback thread startup failed".to_string()),
    }
}

/// Sequentially play commands until disposed
fn run_playback_loop(
    handle: &rodio::OutputStreamHandle,
    command_rx: std::sync::mpsc::Receiver<PlayerCommand>,
    event_tx: broadcast::Sender<PlaybackEvent>,
) {
    loop {
        match command_rx.recv() {
            Ok(PlayerCommand::Play { bytes }) => {
                if play_one(handle, bytes, &command_rx, &event_tx) {
                    return; // disposed mid-playback
                }
            }
            Ok(PlayerCommand::Stop) => {
                // Nothing playing; stale stop
            }
            Ok(PlayerCommand::Dispose) | Err(_) => {
                debug!("Playback thread disposed");
                return;
            }
        }
    }
}

/// Play one resource to completion, stop, or disposal
///
/// Returns true if the thread should exit.
fn play_one(
    handle: &rodio::OutputStreamHandle,
    bytes: Vec<u8>,
    command_rx: &std::sync::mpsc::Receiver<PlayerCommand>,
    event_tx: &broadcast::Sender<PlaybackEvent>,
) -> bool {
    use rodio::Source;

    let decoder = match rodio::Decoder::new(Cursor::new(bytes)) {
        Ok(decoder) => decoder,
        Err(e) => {
            error!("Narration decode failed: {}", e);
            let _ = event_tx.send(PlaybackEvent::Failed {
                reason: format!("decode error: {}", e),
            });
            return false;
        }
    };
    let duration = decoder.total_duration();

    let sink = match rodio::Sink::try_new(handle) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to open playback sink: {}", e);
            let _ = event_tx.send(PlaybackEvent::Failed {
                reason: format!("sink error: {}", e),
            });
            return false;
        }
    };
    sink.append(decoder);

    let started_at = Instant::now();
    let _ = event_tx.send(PlaybackEvent::Started);
    info!(duration = ?duration, "Narration playback started");

    loop {
        // Preemption check between progress ticks
        match command_rx.recv_timeout(PROGRESS_INTERVAL) {
            Ok(PlayerCommand::Stop) => {
                sink.stop();
                debug!("Narration playback stopped");
                return false;
            }
            Ok(PlayerCommand::Play { bytes }) => {
                sink.stop();
                return play_one(handle, bytes, command_rx, event_tx);
            }
            Ok(PlayerCommand::Dispose) => {
                sink.stop();
                return true;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                return true;
            }
        }

        if sink.empty() {
            let _ = event_tx.send(PlaybackEvent::Completed);
            info!("Narration playback completed");
            return false;
        }

        let position = match duration {
            Some(total) => started_at.elapsed().min(total),
            None => started_at.elapsed(),
        };
        let _ = event_tx.send(PlaybackEvent::Progress { position, duration });
    }
}
