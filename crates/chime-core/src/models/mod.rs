pub mod notification;
pub mod preferences;

pub use notification::{InboundNotification, NormalizeError, NotificationKind, NotificationRecord};
pub use preferences::{Preferences, PreferencesStorage};
