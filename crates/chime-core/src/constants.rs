//! Application-wide constants
//!
//! Centralized location for file names, defaults and tuning values
//! that are used across multiple modules.

use std::time::Duration;

/// Default data directory name (relative to the platform data dir)
pub const DATA_DIR_NAME: &str = "chime";

/// Preferences file inside the data directory
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Default real-time notification endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3000/ws/notifications";

/// Outbound frame name used by the "send test event" hook
pub const TEST_EVENT_NAME: &str = "test_notification";

/// Upper bound on simultaneously registered connection listeners
pub const DEFAULT_MAX_LISTENERS: usize = 16;

/// Records fetched per history page during resync
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Upper bound on one history request, connect and body included
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

// Reconnect defaults
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const RECONNECT_MULTIPLIER: f64 = 2.0;
/// Consecutive failures after which the client is reported offline
pub const OFFLINE_AFTER_ATTEMPTS: u32 = 5;

// Notification tone
pub mod tone {
    pub const SAMPLE_RATE: u32 = 44_100;
    pub const FIRST_HZ: f32 = 880.0;
    pub const SECOND_HZ: f32 = 1_320.0;
    /// Each of the two segments; 300 ms total
    pub const SEGMENT_MS: u32 = 150;
    pub const FADE_MS: u32 = 15;
    pub const GAIN: f32 = 0.3;
}
