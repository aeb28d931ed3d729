use crate::models::PreferencesStorage;

use super::player::AudioBackend;
use super::tone::{Tone, ToneSpec};
use super::AudioError;

/// Result of a successful `play()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Played,
    /// Sound is disabled in preferences; nothing happened.
    Muted,
}

/// Interaction-gated notification sound.
///
/// Playback is refused with [`AudioError::NotReady`] until a user interaction
/// has been recorded, either in this session through [`AudioGate::initialize`]
/// or persisted from an earlier one. The gate owns the preference storage so
/// `sound_enabled` and `has_interacted` are always read and written together.
pub struct AudioGate {
    backend: Box<dyn AudioBackend>,
    prefs: PreferencesStorage,
    tone: Tone,
    device_open: bool,
}

impl AudioGate {
    pub fn new(backend: Box<dyn AudioBackend>, prefs: PreferencesStorage) -> Self {
        Self::with_tone(backend, prefs, ToneSpec::default())
    }

    pub fn with_tone(backend: Box<dyn AudioBackend>, prefs: PreferencesStorage, spec: ToneSpec) -> Self {
        Self {
            backend,
            prefs,
            tone: spec.synthesize(),
            device_open: false,
        }
    }

    /// Call from a user-interaction handler. Opens the output device and
    /// records the interaction. Idempotent once it has succeeded.
    pub fn initialize(&mut self) -> Result<(), AudioError> {
        if self.device_open {
            return Ok(());
        }
        self.backend.open()?;
        self.device_open = true;
        if !self.prefs.has_interacted() {
            self.prefs.set_has_interacted(true);
        }
        tracing::info!("Notification sound unlocked");
        Ok(())
    }

    pub fn play(&mut self) -> Result<PlayOutcome, AudioError> {
        if !self.prefs.sound_enabled() {
            return Ok(PlayOutcome::Muted);
        }
        if !self.device_open {
            if !self.prefs.has_interacted() {
                return Err(AudioError::NotReady);
            }
            // Interaction persisted from an earlier session. Runs on the
            // dispatch path, so don't wait for the device.
            self.backend.open_in_background()?;
            self.device_open = true;
        }
        if let Err(e) = self.backend.play(&self.tone) {
            // Lost or never opened; the next play reopens lazily.
            self.device_open = false;
            return Err(e);
        }
        Ok(PlayOutcome::Played)
    }

    /// Device is open and `play()` will not need another interaction.
    pub fn is_ready(&self) -> bool {
        self.device_open
    }

    pub fn sound_enabled(&self) -> bool {
        self.prefs.sound_enabled()
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.prefs.set_sound_enabled(enabled);
    }

    pub fn has_interacted(&self) -> bool {
        self.prefs.has_interacted()
    }

    pub fn tone(&self) -> &Tone {
        &self.tone
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Preferences;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Backend that counts calls and can be told to fail.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingBackend {
        pub opens: Arc<Mutex<u32>>,
        pub background_opens: Arc<Mutex<u32>>,
        pub plays: Arc<Mutex<u32>>,
        pub fail_open: bool,
        pub fail_play: Arc<Mutex<bool>>,
    }

    impl AudioBackend for RecordingBackend {
        fn open(&mut self) -> Result<(), AudioError> {
            if self.fail_open {
                return Err(AudioError::Device("no device".to_string()));
            }
            *self.opens.lock() += 1;
            Ok(())
        }

        fn open_in_background(&mut self) -> Result<(), AudioError> {
            *self.background_opens.lock() += 1;
            Ok(())
        }

        fn play(&mut self, _tone: &Tone) -> Result<(), AudioError> {
            if *self.fail_play.lock() {
                return Err(AudioError::Device("device lost".to_string()));
            }
            *self.plays.lock() += 1;
            Ok(())
        }
    }

    fn gate_with(backend: RecordingBackend, prefs: Preferences) -> AudioGate {
        AudioGate::new(Box::new(backend), PreferencesStorage::in_memory(prefs))
    }

    #[test]
    fn test_play_before_initialize_is_not_ready() {
        let backend = RecordingBackend::default();
        let mut gate = gate_with(backend.clone(), Preferences::default());

        assert_eq!(gate.play(), Err(AudioError::NotReady));
        assert_eq!(*backend.plays.lock(), 0);

        gate.initialize().unwrap();
        assert_eq!(gate.play(), Ok(PlayOutcome::Played));
        assert_eq!(*backend.plays.lock(), 1);
        assert!(gate.has_interacted());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let backend = RecordingBackend::default();
        let mut gate = gate_with(backend.clone(), Preferences::default());
        gate.initialize().unwrap();
        gate.initialize().unwrap();
        assert_eq!(*backend.opens.lock(), 1);
        assert!(gate.is_ready());
    }

    #[test]
    fn test_failed_initialize_keeps_gate_closed() {
        let backend = RecordingBackend {
            fail_open: true,
            ..Default::default()
        };
        let mut gate = gate_with(backend, Preferences::default());
        assert!(matches!(gate.initialize(), Err(AudioError::Device(_))));
        assert!(!gate.has_interacted());
        assert_eq!(gate.play(), Err(AudioError::NotReady));
    }

    #[test]
    fn test_muted_is_noop_even_before_interaction() {
        let backend = RecordingBackend::default();
        let prefs = Preferences {
            sound_enabled: false,
            has_interacted: false,
        };
        let mut gate = gate_with(backend.clone(), prefs);
        assert_eq!(gate.play(), Ok(PlayOutcome::Muted));
        assert_eq!(*backend.plays.lock(), 0);
    }

    #[test]
    fn test_persisted_interaction_opens_lazily() {
        let backend = RecordingBackend::default();
        let prefs = Preferences {
            sound_enabled: true,
            has_interacted: true,
        };
        let mut gate = gate_with(backend.clone(), prefs);
        assert!(!gate.is_ready());
        assert_eq!(gate.play(), Ok(PlayOutcome::Played));
        assert_eq!(*backend.background_opens.lock(), 1);
        assert_eq!(*backend.opens.lock(), 0);
        assert!(gate.is_ready());

        gate.play().unwrap();
        assert_eq!(*backend.background_opens.lock(), 1);
    }

    #[test]
    fn test_lost_device_reopens_on_next_play() {
        let backend = RecordingBackend::default();
        let prefs = Preferences {
            sound_enabled: true,
            has_interacted: true,
        };
        let mut gate = gate_with(backend.clone(), prefs);

        *backend.fail_play.lock() = true;
        assert!(matches!(gate.play(), Err(AudioError::Device(_))));
        assert!(!gate.is_ready());

        *backend.fail_play.lock() = false;
        assert_eq!(gate.play(), Ok(PlayOutcome::Played));
        assert_eq!(*backend.background_opens.lock(), 2);
        assert_eq!(*backend.plays.lock(), 1);
    }

    #[test]
    fn test_toggle_sound() {
        let backend = RecordingBackend::default();
        let mut gate = gate_with(backend.clone(), Preferences::default());
        gate.initialize().unwrap();
        gate.set_sound_enabled(false);
        assert_eq!(gate.play(), Ok(PlayOutcome::Muted));
        gate.set_sound_enabled(true);
        assert_eq!(gate.play(), Ok(PlayOutcome::Played));
        assert_eq!(*backend.plays.lock(), 1);
    }
}
