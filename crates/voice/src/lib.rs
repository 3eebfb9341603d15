//! Voice Arbiter (C8) — owns the audio device and arbitrates between local
//! input events, the chat-driven audio-command file, and the monologue
//! clock through a single priority speak queue. See `arbiter::VoiceArbiter`
//! for the state machine itself.

pub mod arbiter;
pub mod engines;
pub mod input;
pub mod monologue;
pub mod playback;
pub mod queue;
pub mod recorder;

pub use arbiter::{AiStateSnapshot, AudioState, LogbookCallback, ReplyCallback, VoiceArbiter};
pub use engines::{HybridTtsEngine, LocalSttEngine, LocalTtsEngine, RemoteSttEngine, RemoteTtsEngine, SttEngine, TtsEngine};
pub use input::{InputAction, InputSource, RawInputListener};
pub use monologue::{MonologueEngine, SystemSnapshot};
pub use queue::{Priority, SpeakQueue, VoiceRequest};
