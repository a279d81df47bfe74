// Core domain types shared between the relay and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chat line in a document's conversation.
///
/// The author is always the sender's verified username and the timestamp is
/// assigned by the relay when the message is processed, never by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEvent {
    /// Author username.
    pub user: String,
    pub message: String,
    #[serde(with = "iso8601_millis")]
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    pub fn new(user: impl Into<String>, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { user: user.into(), message: message.into(), timestamp }
    }
}

/// ISO-8601 in UTC with millisecond precision, e.g. `2026-02-07T10:15:00.250Z`.
pub mod iso8601_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn format(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}
