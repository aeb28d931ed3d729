pub mod gate;
pub mod player;
pub mod tone;

pub use gate::{AudioGate, PlayOutcome};
pub use player::{AudioBackend, NullBackend, RodioBackend};
pub use tone::{Tone, ToneSpec};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    /// Playback requested before any user interaction was recorded.
    #[error("Audio not ready: a user interaction is required first")]
    NotReady,

    #[error("Audio device error: {0}")]
    Device(String),
}
