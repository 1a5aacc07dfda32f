#![deny(clippy::all)]

//! Voice briefing session engine
//!
//! Plays a generated briefing as a sequence of narrated sections, pausing
//! at configured pause points for spoken follow-up questions. A silence
//! countdown auto-advances past pause points; push-to-talk streams the
//! user's voice to a transcription service, and recognized questions are
//! answered in context with citations. Audio failures degrade the session
//! to text-only rather than ending it.

pub mod audio;
pub mod briefing;
pub mod capture;
pub mod channel;
pub mod config;
pub mod persistence;
pub mod playback;
pub mod timer;
pub mod transcript;

pub use briefing::{
    BriefingCommand, BriefingDeps, BriefingHandle, BriefingOrchestrator, BriefingSnapshot,
    BriefingStatus,
};
pub use config::EngineConfig;
