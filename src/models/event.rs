use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Completed => "completed",
        }
    }

    /// Admin-driven status transitions; anything else is a conflict.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Draft, EventStatus::Published)
                | (EventStatus::Draft, EventStatus::Cancelled)
                | (EventStatus::Published, EventStatus::Cancelled)
                | (EventStatus::Published, EventStatus::Completed)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "cancelled" => Ok(EventStatus::Cancelled),
            "completed" => Ok(EventStatus::Completed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// A sellable occasion. `available_capacity` only moves through the ticket
/// lifecycle (issue, cancel), never through direct edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub total_capacity: i32,
    pub available_capacity: i32,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub total_capacity: i32,
}
