//! Briefing orchestrator
//!
//! The top-level state machine driving one end-to-end voice briefing:
//! section narration, pause points with a silence countdown, push-to-talk
//! follow-up questions, and graceful text-only degradation when audio
//! fails. All session state is owned by a single event-loop task; every
//! component reports through a typed channel into that loop, which is the
//! one place transitions happen. Before any transition that would retire
//! a pause cycle, the loop cancels the silence timer, the capture cycle,
//! and any in-flight Q&A request, so no two competing timers or sessions
//! are ever alive.

mod classifier;
mod content;
mod qa;
mod session;

pub use classifier::{ContinuationClassifier, LiteralPhraseClassifier, UtteranceIntent};
pub use content::{BriefingRequest, ContentError, ContentProvider, GeneratedBriefing, HttpContentProvider};
pub use qa::{AnswerProvider, HttpAnswerProvider, QaAnswer, QaError, SessionContext};
pub use session::{BriefingSession, BriefingSnapshot, BriefingStatus, Section};

use crate::capture::{AudioCaptureSession, CaptureErrorReason, CaptureState};
use crate::channel::ChannelEvent;
use crate::persistence::{CompletionStore, PartialCompletion};
use crate::playback::{NarrationPlayer, PlaybackEvent};
use crate::timer::{SilenceElapsed, SilenceTimer};
use crate::transcript::TranscriptLog;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Default silence countdown at pause points
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(4);

/// Answer text used when the Q&A call fails; the session must still
/// return to awaiting_response
const QA_UNAVAILABLE_TEXT: &str =
    "Sorry, I couldn't retrieve an answer for that just now. We can keep going.";

/// User-initiated commands accepted by the orchestrator
#[derive(Debug, Clone)]
pub enum BriefingCommand {
    /// Begin a briefing; also unlocks audio output (this command is
    /// always the result of a user gesture)
    Start {
        user_id: String,
        area_order: Vec<String>,
    },
    /// Explicit continue (button or keyboard shortcut)
    Continue,
    NextSection,
    PreviousSection,
    GoToSection(usize),
    /// Hold-to-talk pressed
    PushToTalk,
    /// Hold-to-talk released
    ReleaseTalk,
    /// Re-request microphone access after the user granted consent
    RetryVoiceInput,
    /// End the briefing, recording a partial completion
    End,
    /// Clear all session state and return to idle
    Reset,
}

/// Collaborators the orchestrator composes
pub struct BriefingDeps {
    pub content: Arc<dyn ContentProvider>,
    pub qa: Arc<dyn AnswerProvider>,
    pub player: Arc<dyn NarrationPlayer>,
    pub capture: AudioCaptureSession,
    /// Inbound transcription events for this session's channel
    pub voice_events: broadcast::Receiver<ChannelEvent>,
    pub store: Arc<CompletionStore>,
    pub classifier: Box<dyn ContinuationClassifier>,
}

/// Handle to a running orchestrator
pub struct BriefingHandle {
    commands: mpsc::Sender<BriefingCommand>,
    snapshot: watch::Receiver<BriefingSnapshot>,
    transcript: Arc<Mutex<TranscriptLog>>,
    task: tokio::task::JoinHandle<()>,
}

impl BriefingHandle {
    /// Send a command; returns false if the orchestrator is gone
    pub async fn send(&self, command: BriefingCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Current session snapshot
    pub fn snapshot(&self) -> BriefingSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot updates
    pub fn watch(&self) -> watch::Receiver<BriefingSnapshot> {
        self.snapshot.clone()
    }

    /// Copy of the transcript entries in order
    pub fn transcript(&self) -> Vec<crate::transcript::TranscriptEntry> {
        self.transcript
            .lock()
            .map(|log| log.entries().to_vec())
            .unwrap_or_default()
    }

    /// Stop the orchestrator task outright
    pub fn shutdown(self) {
        drop(self.commands);
        self.task.abort();
    }
}

/// Resolution of an in-flight Q&A request
struct QaResolved {
    entry_id: u64,
    result: Result<QaAnswer, QaError>,
}

/// Top-level state machine for one voice briefing session
pub struct BriefingOrchestrator {
    deps: BriefingDeps,
    silence_timeout: Duration,

    session: Option<BriefingSession>,
    error: Option<String>,
    transcript: Arc<Mutex<TranscriptLog>>,
    timer: SilenceTimer,
    /// Voice input degraded for the rest of the session
    voice_available: bool,

    cmd_rx: mpsc::Receiver<BriefingCommand>,
    playback_rx: broadcast::Receiver<PlaybackEvent>,
    silence_tx: mpsc::Sender<SilenceElapsed>,
    silence_rx: mpsc::Receiver<SilenceElapsed>,
    qa_tx: mpsc::Sender<QaResolved>,
    qa_rx: mpsc::Receiver<QaResolved>,
    qa_task: Option<tokio::task::JoinHandle<()>>,
    countdown_rx: watch::Receiver<Option<u32>>,
    snapshot_tx: watch::Sender<BriefingSnapshot>,
}

impl BriefingOrchestrator {
    /// Spawn the orchestrator event loop
    pub fn spawn(deps: BriefingDeps, silence_timeout: Duration) -> BriefingHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (silence_tx, silence_rx) = mpsc::channel(8);
        let (qa_tx, qa_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(BriefingSnapshot::idle());
        let transcript = Arc::new(Mutex::new(TranscriptLog::new()));

        let timer = SilenceTimer::new();
        let countdown_rx = timer.countdown();
        let playback_rx = deps.player.subscribe();

        let orchestrator = Self {
            deps,
            silence_timeout,
            session: None,
            error: None,
            transcript: transcript.clone(),
            timer,
            voice_available: true,
            cmd_rx,
            playback_rx,
            silence_tx,
            silence_rx,
            qa_tx,
            qa_rx,
            qa_task: None,
            countdown_rx,
            snapshot_tx,
        };

        let task = tokio::spawn(orchestrator.run());

        BriefingHandle {
            commands: cmd_tx,
            snapshot: snapshot_rx,
            transcript,
            task,
        }
    }

    /// The single serialization point for all session transitions
    async fn run(mut self) {
        info!("Briefing orchestrator started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                event = self.playback_rx.recv() => {
                    if let Ok(event) = event {
                        self.handle_playback(event).await;
                    }
                }
                event = self.deps.voice_events.recv() => {
                    if let Ok(event) = event {
                        self.handle_voice(event).await;
                    }
                }
                Some(elapsed) = self.silence_rx.recv() => {
                    self.handle_silence(elapsed).await;
                }
                Some(resolved) = self.qa_rx.recv() => {
                    self.handle_qa_resolved(resolved);
                }
                changed = self.countdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish();
                }
            }
        }
        self.teardown().await;
        info!("Briefing orchestrator stopped");
    }

    fn status(&self) -> BriefingStatus {
        match &self.session {
            Some(session) => session.status,
            None if self.error.is_some() => BriefingStatus::Error,
            None => BriefingStatus::Idle,
        }
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(session) => BriefingSnapshot {
                status: session.status,
                briefing_id: Some(session.id.clone()),
                current_section: session.current_section,
                total_sections: session.sections.len(),
                silence_countdown: *self.countdown_rx.borrow(),
                error: self.error.clone(),
            },
            None => BriefingSnapshot {
                status: self.status(),
                error: self.error.clone(),
                ..BriefingSnapshot::idle()
            },
        };
        let _ = self.snapshot_tx.send(snapshot);
    }

    async fn handle_command(&mut self, command: BriefingCommand) {
        debug!(status = ?self.status(), "Command: {:?}", command);
        match command {
            BriefingCommand::Start {
                user_id,
                area_order,
            } => self.start_briefing(user_id, area_order).await,
            BriefingCommand::Continue => {
                if self.status() == BriefingStatus::AwaitingResponse {
                    self.cancel_pause_cycle().await;
                    self.advance().await;
                }
            }
            BriefingCommand::NextSection => {
                if self.navigation_allowed() {
                    self.cancel_pause_cycle().await;
                    self.advance().await;
                }
            }
            BriefingCommand::PreviousSection => {
                if self.navigation_allowed() {
                    self.cancel_pause_cycle().await;
                    self.deps.player.stop();
                    if let Some(session) = &mut self.session {
                        session.current_section = session.current_section.saturating_sub(1);
                    }
                    self.record_partial();
                    self.play_current_section().await;
                }
            }
            BriefingCommand::GoToSection(index) => {
                if self.navigation_allowed() {
                    let valid = self
                        .session
                        .as_ref()
                        .is_some_and(|s| index < s.sections.len());
                    if !valid {
                        warn!(index, "go_to_section ignored: index out of range");
                        return;
                    }
                    self.cancel_pause_cycle().await;
                    self.deps.player.stop();
                    if let Some(session) = &mut self.session {
                        session.current_section = index;
                    }
                    self.record_partial();
                    self.play_current_section().await;
                }
            }
            BriefingCommand::PushToTalk => {
                if self.status() == BriefingStatus::AwaitingResponse
                    && self.deps.capture.state() == CaptureState::Ready
                {
                    // The user is speaking; silence no longer applies
                    self.timer.cancel();
                    self.deps.capture.start_recording().await;
                    self.publish();
                }
            }
            BriefingCommand::ReleaseTalk => {
                if self.deps.capture.state() == CaptureState::Recording {
                    self.deps.capture.stop_recording().await;
                }
            }
            BriefingCommand::RetryVoiceInput => {
                if self.deps.capture.state() == CaptureState::Error {
                    let state = self.deps.capture.initialize();
                    self.voice_available = state == CaptureState::Ready;
                    info!(available = self.voice_available, "Voice input retry");
                }
            }
            BriefingCommand::End => self.end_briefing().await,
            BriefingCommand::Reset => self.reset().await,
        }
    }

    async fn start_briefing(&mut self, user_id: String, area_order: Vec<String>) {
        if self.status() != BriefingStatus::Idle {
            warn!(status = ?self.status(), "start_briefing ignored");
            return;
        }

        // Start is always user-initiated, which satisfies the output
        // unlock requirement in one place
        self.deps.player.unlock();

        let id = new_briefing_id();
        self.error = None;
        self.session = Some(BriefingSession::new(id.clone(), Vec::new()));
        self.publish();

        let request = BriefingRequest {
            user_id,
            area_order,
        };
        match self.deps.content.generate(&request).await {
            Ok(briefing) => {
                info!(briefing_id = %id, sections = briefing.sections.len(), "Briefing loaded");
                self.session = Some(BriefingSession::new(id, briefing.sections));
                self.play_current_section().await;
            }
            Err(e) => {
                error!("Briefing generation failed: {}", e);
                self.error = Some(e.to_string());
                self.session = None;
                self.publish();
            }
        }
    }

    /// Enter playing for the current section, or complete past the end
    async fn play_current_section(&mut self) {
        let current = match &mut self.session {
            Some(session) => {
                if session.current_section >= session.sections.len() {
                    None
                } else {
                    session.status = BriefingStatus::Playing;
                    session
                        .section()
                        .map(|s| (s.title.clone(), s.audio_url.clone()))
                }
            }
            None => return,
        };

        let Some((title, audio_url)) = current else {
            self.complete_briefing();
            return;
        };

        if let Ok(mut log) = self.transcript.lock() {
            log.append_system(format!("Now playing: {}", title));
        }
        self.publish();

        match audio_url {
            Some(url) => {
                // Fresh subscription so events from a prior load are
                // never attributed to this one
                self.playback_rx = self.deps.player.subscribe();
                self.deps.player.load(&url);
            }
            None => {
                debug!(section = %title, "No narration audio, continuing text-only");
                self.mark_section_degraded("no narration audio available");
                self.section_finished().await;
            }
        }
    }

    async fn handle_playback(&mut self, event: PlaybackEvent) {
        if self.status() != BriefingStatus::Playing {
            return;
        }
        match event {
            PlaybackEvent::Started => {
                debug!("Narration started");
            }
            PlaybackEvent::Progress { .. } => {}
            PlaybackEvent::Completed => {
                self.section_finished().await;
            }
            PlaybackEvent::Failed { reason } => {
                warn!("Narration failed, continuing text-only: {}", reason);
                self.mark_section_degraded(&reason);
                if let Ok(mut log) = self.transcript.lock() {
                    log.append_system(
                        "Narration audio is unavailable for this section; continuing in text mode.",
                    );
                }
                self.section_finished().await;
            }
        }
    }

    /// The current section's narration ended (or was degraded to text)
    async fn section_finished(&mut self) {
        let pause_point = self
            .session
            .as_ref()
            .and_then(|s| s.section())
            .map(|s| s.pause_point)
            .unwrap_or(false);

        if pause_point {
            self.enter_awaiting_response().await;
        } else {
            self.advance().await;
        }
    }

    /// Pause for follow-ups: arm the silence countdown and make the
    /// capture session ready
    async fn enter_awaiting_response(&mut self) {
        match &mut self.session {
            Some(session) => session.status = BriefingStatus::AwaitingResponse,
            None => return,
        }

        if self.voice_available {
            match self.deps.capture.state() {
                CaptureState::Idle => {
                    let state = self.deps.capture.initialize();
                    if state != CaptureState::Ready {
                        self.voice_available = false;
                        self.note_voice_unavailable();
                    }
                }
                CaptureState::Ready => {}
                CaptureState::Error => {
                    // Denied earlier; never auto-retry
                    self.voice_available = false;
                    self.note_voice_unavailable();
                }
                other => {
                    debug!(state = ?other, "capture busy at pause point");
                }
            }
        }

        self.timer.arm(self.silence_timeout, self.silence_tx.clone());
        self.publish();
    }

    fn note_voice_unavailable(&self) {
        if let Ok(mut log) = self.transcript.lock() {
            log.append_system(
                "Voice input is unavailable; sections will advance automatically after the countdown.",
            );
        }
        match self.deps.capture.error_reason() {
            Some(CaptureErrorReason::PermissionDenied) => {
                warn!("Microphone permission denied; continuing without voice input");
            }
            _ => {
                warn!("Voice capture not supported; continuing without voice input");
            }
        }
    }

    async fn handle_voice(&mut self, event: ChannelEvent) {
        // Transcription cycles only matter at a pause point
        if self.status() != BriefingStatus::AwaitingResponse {
            debug!(status = ?self.status(), "voice event outside pause point ignored");
            return;
        }
        let in_cycle = matches!(
            self.deps.capture.state(),
            CaptureState::Recording | CaptureState::Processing
        );

        match event {
            ChannelEvent::RecordingStarted => {
                debug!("Capture cycle acknowledged");
            }
            ChannelEvent::Transcription {
                text,
                confidence,
                duration_ms,
            } => {
                if !in_cycle {
                    debug!("stale transcription ignored");
                    return;
                }
                self.deps.capture.cycle_finished();
                debug!(confidence = ?confidence, duration_ms = ?duration_ms, "Utterance: {}", text);
                match self.deps.classifier.classify(&text) {
                    UtteranceIntent::Continue => {
                        info!("Continuation command recognized");
                        self.timer.cancel();
                        self.advance().await;
                    }
                    UtteranceIntent::Question => {
                        self.timer.cancel();
                        self.begin_qa(text, confidence);
                    }
                    UtteranceIntent::Empty => {
                        self.rearm_timer();
                    }
                }
            }
            ChannelEvent::NoSpeech { message } => {
                if in_cycle {
                    self.deps.capture.cycle_finished();
                }
                let notice = message
                    .unwrap_or_else(|| "No speech detected. Listening again.".to_string());
                if let Ok(mut log) = self.transcript.lock() {
                    log.append_system(notice);
                }
                self.rearm_timer();
            }
            ChannelEvent::RecordingTooShort => {
                // Soft and silent: back to ready, countdown resumes
                if in_cycle {
                    self.deps.capture.cycle_finished();
                }
                self.rearm_timer();
            }
            ChannelEvent::ServiceError {
                error_code,
                message,
            } => {
                error!(error_code = ?error_code, "Transcription service error: {:?}", message);
                if in_cycle {
                    self.deps.capture.cycle_finished();
                }
                self.rearm_timer();
            }
            ChannelEvent::Disconnected => {
                warn!("Transcription channel lost; degrading to timer-only pauses");
                self.deps.capture.cancel_recording().await;
                self.voice_available = false;
                if let Ok(mut log) = self.transcript.lock() {
                    log.append_system(
                        "Voice connection lost; sections will advance automatically after the countdown.",
                    );
                }
                self.rearm_timer();
            }
        }
    }

    /// Re-arm the countdown after a soft event so the session never
    /// stalls at a pause point without a live timer
    fn rearm_timer(&mut self) {
        if self.status() == BriefingStatus::AwaitingResponse {
            self.timer.arm(self.silence_timeout, self.silence_tx.clone());
            self.publish();
        }
    }

    fn begin_qa(&mut self, question: String, confidence: Option<f32>) {
        let Some(session) = &mut self.session else {
            return;
        };
        let Some(section) = session.section() else {
            return;
        };

        let context = SessionContext {
            briefing_id: session.id.clone(),
            section_title: section.title.clone(),
            section_content: section.content.clone(),
            area_id: section.area_id.clone(),
        };
        session.status = BriefingStatus::Qa;

        let entry_id = match self.transcript.lock() {
            Ok(mut log) => {
                log.append_user(question.clone(), confidence);
                log.append_pending_assistant()
            }
            Err(_) => return,
        };

        info!("Question dispatched: {}", question);
        let qa = self.deps.qa.clone();
        let qa_tx = self.qa_tx.clone();
        self.qa_task = Some(tokio::spawn(async move {
            let result = qa.answer(&question, &context).await;
            let _ = qa_tx.send(QaResolved { entry_id, result }).await;
        }));
        self.publish();
    }

    fn handle_qa_resolved(&mut self, resolved: QaResolved) {
        if self.status() != BriefingStatus::Qa {
            debug!("stale Q&A resolution ignored");
            return;
        }
        self.qa_task = None;

        if let Ok(mut log) = self.transcript.lock() {
            match resolved.result {
                Ok(answer) => {
                    log.resolve_assistant(resolved.entry_id, answer.answer, answer.citations);
                }
                Err(e) => {
                    error!("Q&A request failed: {}", e);
                    log.resolve_assistant(resolved.entry_id, QA_UNAVAILABLE_TEXT, Vec::new());
                }
            }
        }

        if let Some(session) = &mut self.session {
            session.status = BriefingStatus::AwaitingResponse;
        }
        self.timer.arm(self.silence_timeout, self.silence_tx.clone());
        self.publish();
    }

    async fn handle_silence(&mut self, elapsed: SilenceElapsed) {
        if !self.timer.is_current(&elapsed) {
            debug!(generation = elapsed.generation, "stale silence expiry dropped");
            return;
        }
        self.timer.acknowledge(&elapsed);
        if self.status() != BriefingStatus::AwaitingResponse {
            return;
        }
        info!("Silence countdown elapsed, auto-advancing");
        self.deps.capture.cancel_recording().await;
        self.advance().await;
    }

    /// Move to the next section, completing the briefing past the end
    async fn advance(&mut self) {
        self.deps.player.stop();
        match &mut self.session {
            Some(session) => session.current_section += 1,
            None => return,
        }
        self.record_partial();
        // Boxed: text-only sections re-enter advance from
        // play_current_section, so the future is recursive
        Box::pin(self.play_current_section()).await;
    }

    fn navigation_allowed(&self) -> bool {
        matches!(
            self.status(),
            BriefingStatus::Playing | BriefingStatus::AwaitingResponse
        )
    }

    /// Cancel every live pause-cycle resource: timer, capture, Q&A
    async fn cancel_pause_cycle(&mut self) {
        self.timer.cancel();
        self.deps.capture.cancel_recording().await;
        if let Some(task) = self.qa_task.take() {
            task.abort();
        }
    }

    fn mark_section_degraded(&mut self, reason: &str) {
        if let Some(session) = &mut self.session {
            if let Some(section) = session.section_mut() {
                section.error_message = Some(reason.to_string());
            }
        }
    }

    fn record_partial(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if session.sections.is_empty() {
            return;
        }
        self.deps.store.record_partial(&PartialCompletion {
            briefing_id: session.id.clone(),
            completed_sections: session.current_section.min(session.sections.len()),
            total_sections: session.sections.len(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn complete_briefing(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        session.status = BriefingStatus::Complete;
        session.current_section = session.sections.len();
        info!(briefing_id = %session.id, "Briefing complete");

        self.deps.store.clear_partial(&session.id);
        if let Ok(log) = self.transcript.lock() {
            self.deps.store.export_transcript_best_effort(&log);
        }
        self.publish();
    }

    async fn end_briefing(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        info!(briefing_id = %session.id, section = session.current_section, "Briefing ended by user");

        self.cancel_pause_cycle().await;
        self.deps.player.stop();
        self.record_partial();
        self.deps.capture.disconnect();

        if let Ok(log) = self.transcript.lock() {
            self.deps.store.export_transcript_best_effort(&log);
        }

        self.session = None;
        self.error = None;
        self.publish();
    }

    /// Return to idle, discarding session state
    ///
    /// Any partial-completion record already written stays on disk.
    async fn reset(&mut self) {
        self.cancel_pause_cycle().await;
        self.deps.player.stop();
        self.deps.capture.disconnect();
        self.session = None;
        self.error = None;
        self.voice_available = true;
        if let Ok(mut log) = self.transcript.lock() {
            *log = TranscriptLog::new();
        }
        self.publish();
    }

    async fn teardown(&mut self) {
        self.cancel_pause_cycle().await;
        self.deps.player.stop();
        self.deps.capture.disconnect();
    }
}

/// Generate a session-unique briefing identifier
fn new_briefing_id() -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen_range(0..0xFFFF_FFFF);
    format!("briefing-{}-{:08x}", chrono::Utc::now().format("%Y%m%d%H%M%S"), suffix)
}
