//! Briefing session data model

use serde::{Deserialize, Serialize};

/// One narrated content section
///
/// Immutable once loaded; only its position in the sequence is read. The
/// single exception is `error_message`, which the orchestrator sets when
/// narration for the section fails and the sequence continues text-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Narration text, also shown when audio falls back to text-only
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    /// Whether the orchestrator pauses for follow-ups after this section
    pub pause_point: bool,
    /// Per-section narration audio resource, provided by the TTS service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Orchestrator state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefingStatus {
    Idle,
    Loading,
    Playing,
    AwaitingResponse,
    Qa,
    Complete,
    Error,
}

/// Mutable session state owned exclusively by the orchestrator
///
/// Invariant: `current_section` is a valid index into `sections` while
/// status is playing, awaiting_response, or qa; it is one past the last
/// valid index exactly when status is complete.
#[derive(Debug)]
pub struct BriefingSession {
    pub id: String,
    pub sections: Vec<Section>,
    pub current_section: usize,
    pub status: BriefingStatus,
}

impl BriefingSession {
    pub fn new(id: String, sections: Vec<Section>) -> Self {
        Self {
            id,
            sections,
            current_section: 0,
            status: BriefingStatus::Loading,
        }
    }

    /// The section currently being narrated or discussed
    pub fn section(&self) -> Option<&Section> {
        self.sections.get(self.current_section)
    }

    pub fn section_mut(&mut self) -> Option<&mut Section> {
        self.sections.get_mut(self.current_section)
    }

    pub fn is_last_section(&self) -> bool {
        self.current_section + 1 >= self.sections.len()
    }
}

/// Point-in-time view of the session published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BriefingSnapshot {
    pub status: BriefingStatus,
    pub briefing_id: Option<String>,
    pub current_section: usize,
    pub total_sections: usize,
    /// Seconds remaining on the silence countdown, `None` when disarmed
    pub silence_countdown: Option<u32>,
    /// Set when the session entered the error state
    pub error: Option<String>,
}

impl BriefingSnapshot {
    pub fn idle() -> Self {
        Self {
            status: BriefingStatus::Idle,
            briefing_id: None,
            current_section: 0,
            total_sections: 0,
            silence_countdown: None,
            error: None,
        }
    }
}
