use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chime_core::audio::{AudioBackend, RodioBackend, ToneSpec};
use chime_core::models::{Preferences, PreferencesStorage};

pub fn show(data_dir: &Path) -> Preferences {
    PreferencesStorage::new(data_dir).get().clone()
}

pub fn set_sound(data_dir: &Path, enabled: bool) -> Preferences {
    let mut storage = PreferencesStorage::new(data_dir);
    storage.set_sound_enabled(enabled);
    storage.get().clone()
}

/// Forget the recorded interaction so the next session starts locked.
pub fn reset_interaction(data_dir: &Path) -> Preferences {
    let mut storage = PreferencesStorage::new(data_dir);
    storage.set_has_interacted(false);
    storage.get().clone()
}

/// Play the notification tone once. Running the command counts as the
/// user interaction.
pub fn play_tone() -> Result<()> {
    let tone = ToneSpec::default().synthesize();
    let mut backend = RodioBackend::new();
    backend.open()?;
    backend.play(&tone)?;
    // Playback is detached; keep the device alive until it finishes.
    std::thread::sleep(tone.duration() + Duration::from_millis(100));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_sound_persists() {
        let dir = tempdir().unwrap();
        assert!(show(dir.path()).sound_enabled);

        set_sound(dir.path(), false);
        assert!(!show(dir.path()).sound_enabled);
    }

    #[test]
    fn test_reset_interaction() {
        let dir = tempdir().unwrap();
        let mut storage = PreferencesStorage::new(dir.path());
        storage.set_has_interacted(true);

        let prefs = reset_interaction(dir.path());
        assert!(!prefs.has_interacted);
        assert!(!show(dir.path()).has_interacted);
    }
}
