//! Raw events produced by the live platform feed.
//!
//! Upstream libraries and relays disagree on event names and payload shapes, so an
//! event is kept as a kind plus the untouched JSON payload. Field extraction and
//! defaulting is left to [`crate::normalizer`].

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Kind of an upstream live event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiveEventKind {
    /// The feed is connected to the room
    Connect,
    /// Chat comment
    Comment,
    /// Gift sent by a viewer
    Gift,
    /// Batched likes ("digg")
    Digg,
    /// Single like
    Like,
    /// Room statistics update (viewer count)
    RoomUpdate,
    /// A viewer followed the streamer
    Follow,
    /// A viewer shared the stream
    Share,
    /// A viewer joined the room
    Join,
    /// Q&A question posted
    Question,
    /// The live stream ended
    StreamEnd,
    /// Anything this bridge does not interpret
    Other(String),
}

impl LiveEventKind {
    /// Resolve an upstream event name.
    ///
    /// Names are compared case-insensitively with `_`, `-` and a leading
    /// `webcast`/`tiktok` prefix ignored, so `WebcastGiftMessage`, `gift` and
    /// `tiktokGift` all map to [`LiveEventKind::Gift`].
    pub fn from_name(name: &str) -> Self {
        let key = canonical_key(name);

        match key.as_str() {
            "connect" | "connected" => Self::Connect,
            "comment" | "chat" => Self::Comment,
            "gift" => Self::Gift,
            "digg" => Self::Digg,
            "like" => Self::Like,
            "roomuser" | "roomuserseq" | "viewer" | "viewers" | "roomupdate" | "roomstats" => {
                Self::RoomUpdate
            }
            "follow" => Self::Follow,
            "share" => Self::Share,
            "join" | "member" => Self::Join,
            "question" | "questionnew" => Self::Question,
            "streamend" | "liveend" => Self::StreamEnd,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "connect",
            Self::Comment => "comment",
            Self::Gift => "gift",
            Self::Digg => "digg",
            Self::Like => "like",
            Self::RoomUpdate => "room_update",
            Self::Follow => "follow",
            Self::Share => "share",
            Self::Join => "join",
            Self::Question => "question",
            Self::StreamEnd => "stream_end",
            Self::Other(name) => name,
        }
    }
}

/// A single event received from the live feed.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    /// Event kind
    pub kind: LiveEventKind,
    /// Upstream payload, untouched
    pub payload: Value,
    /// Time the event was received locally
    pub received_at: DateTime<Utc>,
}

impl LiveEvent {
    /// Create a new event received now.
    pub fn new(kind: LiveEventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Create an event from an upstream event name.
    ///
    /// The "social" event of some relays carries follows and shares; it is
    /// reclassified from its `displayType`/`label` field.
    pub fn from_named(name: &str, payload: Value) -> Self {
        let kind = if canonical_key(name) == "social" {
            classify_social(&payload).unwrap_or_else(|| LiveEventKind::Other(name.to_string()))
        } else {
            LiveEventKind::from_name(name)
        };
        Self::new(kind, payload)
    }
}

/// Lowercase, separator-free name with platform prefixes and suffixes removed.
fn canonical_key(name: &str) -> String {
    let folded: String = name
        .chars()
        .filter(|c| !matches!(*c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();
    let key = folded
        .strip_prefix("webcast")
        .or_else(|| folded.strip_prefix("tiktok"))
        .unwrap_or(&folded);
    key.strip_suffix("message")
        .or_else(|| key.strip_suffix("event"))
        .unwrap_or(key)
        .to_string()
}

fn classify_social(payload: &Value) -> Option<LiveEventKind> {
    let hint = ["displayType", "display_type", "label"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))?
        .to_ascii_lowercase();

    if hint.contains("follow") {
        Some(LiveEventKind::Follow)
    } else if hint.contains("share") {
        Some(LiveEventKind::Share)
    } else {
        None
    }
}
