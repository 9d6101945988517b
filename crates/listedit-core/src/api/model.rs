//! List entry types exchanged with the media-tracking API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Watch/read status of a list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaListStatus {
    Current,
    Planning,
    Completed,
    Dropped,
    Paused,
    Repeating,
}

/// One entry of the user's media list, as fetched by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub id: i64,
    pub media_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<MediaListStatus>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub progress: u32,
    /// Episode/chapter count of the media, when known.
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ListEntry {
    pub fn new(id: i64, media_id: i64) -> Self {
        Self {
            id,
            media_id,
            title: None,
            status: None,
            score: None,
            progress: 0,
            total_episodes: None,
            private: None,
            notes: None,
        }
    }
}

/// Field changes for one mutation. `None` leaves the field untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MediaListStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EntryChanges {
    pub fn is_empty(&self) -> bool {
        self == &EntryChanges::default()
    }

    /// GraphQL variables for the fields that are set.
    pub fn to_variables(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Drop every field that already matches `entry`.
    pub fn without_noops(mut self, entry: &ListEntry) -> Self {
        if self.status.is_some() && self.status == entry.status {
            self.status = None;
        }
        if self.score.is_some() && self.score == entry.score {
            self.score = None;
        }
        if self.progress == Some(entry.progress) {
            self.progress = None;
        }
        if self.private.is_some() && self.private == entry.private {
            self.private = None;
        }
        if self.notes.is_some() && self.notes == entry.notes {
            self.notes = None;
        }
        self
    }
}
