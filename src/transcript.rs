//! Briefing transcript log
//!
//! Append-only, time-ordered record of everything said during a briefing:
//! system narration cues, user questions, and assistant answers with
//! citations. The log is the single serialization point for transcript
//! ordering; entries are appended in the order their triggering events
//! resolve and never reordered afterwards. The only permitted in-place
//! mutation is resolving a pending assistant entry once its answer
//! arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    System,
    User,
    Assistant,
}

/// Source reference attached to an assistant answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub data_point: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: u64,
    pub kind: EntryKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Attached to assistant entries only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// True while an async answer is still being produced for this entry
    pub is_processing: bool,
}

/// Append-only transcript for one briefing session
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, kind: EntryKind, text: String, confidence: Option<f32>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(TranscriptEntry {
            id,
            kind,
            text,
            timestamp: Utc::now(),
            confidence,
            citations: Vec::new(),
            is_processing: false,
        });
        id
    }

    /// Append a system cue (section start, soft notices)
    pub fn append_system(&mut self, text: impl Into<String>) -> u64 {
        self.append(EntryKind::System, text.into(), None)
    }

    /// Append a transcribed user utterance
    pub fn append_user(&mut self, text: impl Into<String>, confidence: Option<f32>) -> u64 {
        self.append(EntryKind::User, text.into(), confidence)
    }

    /// Append a placeholder assistant entry awaiting its answer
    pub fn append_pending_assistant(&mut self) -> u64 {
        let id = self.append(EntryKind::Assistant, String::new(), None);
        // Safe: just pushed
        if let Some(entry) = self.entries.last_mut() {
            entry.is_processing = true;
        }
        id
    }

    /// Resolve a pending assistant entry in place
    ///
    /// The entry keeps its ordering position; only its text, citations,
    /// and processing flag change. Unknown ids are ignored.
    pub fn resolve_assistant(&mut self, id: u64, text: impl Into<String>, citations: Vec<Citation>) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.id == id && e.kind == EntryKind::Assistant)
        {
            entry.text = text.into();
            entry.citations = citations;
            entry.is_processing = false;
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the transcript as Markdown for export
    ///
    /// Citations are rendered as a footnote list under their answer.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let label = match entry.kind {
                EntryKind::System => "System",
                EntryKind::User => "You",
                EntryKind::Assistant => "Assistant",
            };
            out.push_str(&format!(
                "**{}** ({}): {}\n",
                label,
                entry.timestamp.format("%H:%M:%S"),
                entry.text
            ));
            for citation in &entry.citations {
                out.push_str(&format!("  - {}: {}\n", citation.source, citation.data_point));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_preserve_order() {
        let mut log = TranscriptLog::new();
        let a = log.append_system("Now playing: Downtime");
        let b = log.append_user("why was downtime high", Some(0.9));
        let c = log.append_pending_assistant();

        let ids: Vec<u64> = log.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_resolve_keeps_position() {
        let mut log = TranscriptLog::new();
        log.append_user("question one", None);
        let pending = log.append_pending_assistant();
        log.append_system("Now playing: Quality");

        log.resolve_assistant(
            pending,
            "Downtime was driven by line 3.",
            vec![Citation {
                source: "downtime_report".into(),
                data_point: "line 3: 42 min".into(),
                timestamp: None,
            }],
        );

        let entry = &log.entries()[1];
        assert_eq!(entry.id, pending);
        assert!(!entry.is_processing);
        assert_eq!(entry.citations.len(), 1);
        // Prior and later entries untouched, order stable
        assert_eq!(log.entries()[0].text, "question one");
        assert_eq!(log.entries()[2].kind, EntryKind::System);
    }

    #[test]
    fn test_resolve_unknown_id_is_ignored() {
        let mut log = TranscriptLog::new();
        log.append_system("cue");
        log.resolve_assistant(99, "answer", Vec::new());
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].text, "cue");
    }

    #[test]
    fn test_user_and_system_entries_carry_no_citations() {
        let mut log = TranscriptLog::new();
        log.append_system("cue");
        log.append_user("question", Some(0.5));
        assert!(log.entries().iter().all(|e| e.citations.is_empty()));
    }

    #[test]
    fn test_markdown_rendering() {
        let mut log = TranscriptLog::new();
        log.append_user("why was downtime high", None);
        let pending = log.append_pending_assistant();
        log.resolve_assistant(
            pending,
            "Line 3 jams.",
            vec![Citation {
                source: "oee_dashboard".into(),
                data_point: "availability 81%".into(),
                timestamp: None,
            }],
        );

        let md = log.to_markdown();
        assert!(md.contains("**You**"));
        assert!(md.contains("**Assistant**"));
        assert!(md.contains("oee_dashboard: availability 81%"));
    }
}
