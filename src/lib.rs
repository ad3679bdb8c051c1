//! Stagebot - a staged voice sales assistant
//!
//! The bot listens for an utterance, decides which stage of a scripted
//! conversation it belongs to, asks a chat-completion endpoint for a reply
//! in that stage's voice and speaks it, sentence by sentence when the
//! endpoint streams.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  transcript   ┌──────────────┐  utterance + instruction
//! │  Recognizer  │ ────────────▶ │   VoiceBot   │ ───────────────────────┐
//! │ (voice::*)   │ ◀──────────── │  (bot.rs)    │                        ▼
//! └──────────────┘ pause/resume  └──────┬───────┘              ┌──────────────────┐
//!                                       │ stage lookup         │ CompletionClient │
//!                                       ▼                      │  whole / stream  │
//!                                ┌──────────────┐              └────────┬─────────┘
//!                                │   stages     │                       │ chunks
//!                                └──────────────┘                       ▼
//!                                                              ┌──────────────────┐
//!                                                              │  PlaybackQueue   │
//!                                                              │  → Synthesizer   │
//!                                                              └──────────────────┘
//! ```

pub mod bot;
pub mod completion;
pub mod config;
pub mod error;
pub mod playback;
pub mod stages;
pub mod voice;

pub use bot::{BotStatus, SessionState, VoiceBot};
pub use completion::{CompletionClient, StreamingPolicy};
pub use config::{Settings, SettingsStore};
pub use error::{Error, RecognitionError, Result};
pub use playback::{PlaybackQueue, Spoken};
pub use stages::{CommandMarkers, Stage, determine_stage, find_stage, parse_stage_command};
