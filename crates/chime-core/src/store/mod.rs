pub mod notification_store;

pub use notification_store::{InsertOutcome, NotificationStore, SharedNotificationStore};
