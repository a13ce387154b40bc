use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attendance reply of an event attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    NeedsAction,
    Declined,
    Tentative,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether this entry represents the authenticated user.
    #[serde(rename = "self", default, skip_serializing_if = "is_false")]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<ResponseStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Start or end of an event. All-day events only carry `date`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timepoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl Timepoint {
    /// The raw RFC 3339 timestamp of a timed event, if present.
    pub fn date_time(&self) -> Option<&str> {
        self.date_time.as_deref().filter(|s| !s.is_empty())
    }

    /// Parsed timestamp of a timed event. `None` for all-day or malformed entries.
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.date_time()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    pub fn is_all_day(&self) -> bool {
        self.date_time().is_none() && self.date.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A Google Calendar event. Fields the client does not interpret are kept in `extra` so that
/// serializing an event reproduces what the API returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Timepoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timepoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Returns true if the authenticated user declined this event.
    pub fn is_declined(&self) -> bool {
        self.attendees.iter().any(|attendee| {
            attendee.is_self && attendee.response_status == Some(ResponseStatus::Declined)
        })
    }

    /// Start instant of a timed event; `None` for all-day events or a missing start.
    pub fn start_timestamp(&self) -> Option<DateTime<Utc>> {
        self.start
            .as_ref()
            .and_then(Timepoint::timestamp)
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Last modification instant.
    pub fn updated_timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn title(&self) -> &str {
        self.summary.as_deref().unwrap_or_default()
    }
}

/// A single page of the `events.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct Events {
    #[serde(default)]
    pub items: Vec<Event>,
    pub next_page_token: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !value
}
