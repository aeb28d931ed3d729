use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a notification.
///
/// Unknown categories are carried verbatim in `Other` so a newer producer
/// never breaks an older client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Mention,
    AchievementUnlocked,
    LevelUp,
    ChallengeWinner,
    System,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::Mention => "mention",
            NotificationKind::AchievementUnlocked => "achievement_unlocked",
            NotificationKind::LevelUp => "level_up",
            NotificationKind::ChallengeWinner => "challenge_winner",
            NotificationKind::System => "system",
            NotificationKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(value: &str) -> Self {
        match value {
            "like" => NotificationKind::Like,
            "comment" => NotificationKind::Comment,
            "follow" => NotificationKind::Follow,
            "mention" => NotificationKind::Mention,
            "achievement_unlocked" => NotificationKind::AchievementUnlocked,
            "level_up" => NotificationKind::LevelUp,
            "challenge_winner" => NotificationKind::ChallengeWinner,
            "system" => NotificationKind::System,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

impl From<String> for NotificationKind {
    fn from(value: String) -> Self {
        NotificationKind::from(value.as_str())
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification tracked client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Producer data for routing/UI (post id, actor id, ...). Never interpreted here.
    #[serde(default)]
    pub payload: Value,
    pub redirect_target: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(
        id: impl Into<String>,
        kind: NotificationKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            message: String::new(),
            payload: Value::Null,
            redirect_target: None,
            is_read: false,
            created_at,
        }
    }

    pub fn with_text(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.title = title.into();
        self.message = message.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_target = Some(target.into());
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// True when any field other than id, kind, read state and timestamp differs.
    pub(crate) fn content_differs(&self, other: &NotificationRecord) -> bool {
        self.title != other.title
            || self.message != other.message
            || self.payload != other.payload
            || self.redirect_target != other.redirect_target
    }
}

/// Why an inbound notification could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Notification as it appears on the wire, both on the real-time feed and in
/// REST history pages.
///
/// Every field is optional here; `into_record` decides what is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundNotification {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub created_at: Option<Value>,
}

impl InboundNotification {
    pub fn into_record(self) -> Result<NotificationRecord, NormalizeError> {
        let id = match self.id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => return Err(NormalizeError::MissingField("id")),
            Some(other) => {
                return Err(NormalizeError::InvalidField {
                    field: "id",
                    value: other.to_string(),
                })
            }
        };

        let kind = match self.kind {
            Some(kind) if !kind.trim().is_empty() => NotificationKind::from(kind.trim()),
            _ => return Err(NormalizeError::MissingField("type")),
        };

        let created_at = match self.created_at {
            Some(Value::Null) | None => return Err(NormalizeError::MissingField("created_at")),
            Some(raw) => parse_timestamp(&raw).ok_or_else(|| NormalizeError::InvalidField {
                field: "created_at",
                value: raw.to_string(),
            })?,
        };

        Ok(NotificationRecord {
            id,
            kind,
            title: self.title.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            payload: self.data.unwrap_or(Value::Null),
            redirect_target: self.redirect_url.filter(|url| !url.is_empty()),
            is_read: self.is_read.unwrap_or(false),
            created_at,
        })
    }
}

impl From<&NotificationRecord> for InboundNotification {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            id: Some(Value::String(record.id.clone())),
            kind: Some(record.kind.to_string()),
            title: Some(record.title.clone()),
            message: Some(record.message.clone()),
            data: Some(record.payload.clone()),
            redirect_url: record.redirect_target.clone(),
            is_read: Some(record.is_read),
            created_at: Some(Value::String(record.created_at.to_rfc3339())),
        }
    }
}

/// Above this a numeric timestamp is taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and Unix seconds or milliseconds.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<i64>().ok().and_then(from_unix)
        }
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() >= MILLIS_THRESHOLD as u64 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> InboundNotification {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_kind_roundtrips_unknown_values() {
        let kind: NotificationKind = serde_json::from_value(json!("streak_extended")).unwrap();
        assert_eq!(kind, NotificationKind::Other("streak_extended".to_string()));
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("streak_extended"));

        let known: NotificationKind = serde_json::from_value(json!("level_up")).unwrap();
        assert_eq!(known, NotificationKind::LevelUp);
    }

    #[test]
    fn test_full_event_normalizes() {
        let record = inbound(json!({
            "id": 42,
            "type": "comment",
            "title": "New comment",
            "message": "Sam commented on your post",
            "data": {"post_id": 7},
            "redirect_url": "/posts/7",
            "is_read": false,
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .into_record()
        .unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.kind, NotificationKind::Comment);
        assert_eq!(record.payload, json!({"post_id": 7}));
        assert_eq!(record.redirect_target.as_deref(), Some("/posts/7"));
        assert!(!record.is_read);
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_missing_required_fields() {
        let no_id = inbound(json!({"type": "like", "created_at": 1}));
        assert_eq!(no_id.into_record(), Err(NormalizeError::MissingField("id")));

        let no_type = inbound(json!({"id": "a", "created_at": 1}));
        assert_eq!(no_type.into_record(), Err(NormalizeError::MissingField("type")));

        let no_time = inbound(json!({"id": "a", "type": "like"}));
        assert_eq!(
            no_time.into_record(),
            Err(NormalizeError::MissingField("created_at"))
        );
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        let event = inbound(json!({"id": "a", "type": "like", "created_at": "yesterday"}));
        assert!(matches!(
            event.into_record(),
            Err(NormalizeError::InvalidField { field: "created_at", .. })
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let secs = parse_timestamp(&json!(1_700_000_000)).unwrap();
        let millis = parse_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        let sql = parse_timestamp(&json!("2023-11-14 22:13:20")).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs, sql);
    }

    #[test]
    fn test_extreme_unix_timestamps_are_rejected() {
        for extreme in [i64::MIN, i64::MAX] {
            let event = inbound(json!({"id": "a", "type": "like", "created_at": extreme}));
            assert!(matches!(
                event.into_record(),
                Err(NormalizeError::InvalidField { field: "created_at", .. })
            ));
        }
        let negative = parse_timestamp(&json!(-1_700_000_000_000i64)).unwrap();
        assert_eq!(negative, parse_timestamp(&json!(-1_700_000_000)).unwrap());
    }
}
