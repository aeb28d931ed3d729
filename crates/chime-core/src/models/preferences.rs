use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::PREFERENCES_FILE;

fn default_true() -> bool {
    true
}

/// Notification preferences (persisted to JSON file)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    /// Set once the user has explicitly unlocked audio playback.
    #[serde(default)]
    pub has_interacted: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            has_interacted: false,
        }
    }
}

/// Durable key-value storage for [`Preferences`]. Last write wins.
pub struct PreferencesStorage {
    path: PathBuf,
    prefs: Preferences,
}

impl PreferencesStorage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        let path = data_dir.as_ref().join(PREFERENCES_FILE);
        let prefs = Self::load_from_file(&path).unwrap_or_default();
        Self { path, prefs }
    }

    /// Storage that never touches disk.
    pub fn in_memory(prefs: Preferences) -> Self {
        Self {
            path: PathBuf::new(),
            prefs,
        }
    }

    fn load_from_file(path: &Path) -> Option<Preferences> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                tracing::warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save_to_file(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = self.write_atomic() {
            tracing::error!("Failed to save preferences: {}", e);
        }
    }

    fn write_atomic(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.prefs)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)
    }

    pub fn get(&self) -> &Preferences {
        &self.prefs
    }

    pub fn sound_enabled(&self) -> bool {
        self.prefs.sound_enabled
    }

    pub fn set_sound_enabled(&mut self, value: bool) {
        self.prefs.sound_enabled = value;
        self.save_to_file();
    }

    pub fn has_interacted(&self) -> bool {
        self.prefs.has_interacted
    }

    pub fn set_has_interacted(&mut self, value: bool) {
        self.prefs.has_interacted = value;
        self.save_to_file();
    }
}
