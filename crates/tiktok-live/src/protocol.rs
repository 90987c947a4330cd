//! Host protocol messages.
//!
//! The automation host talks newline-delimited JSON over stdio. Inbound lines
//! decode into [`HostCommand`]; everything written back is an [`OutboundMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

/// Action that starts monitoring an account.
pub const ACTION_START: &str = "tiktok.live.start";
/// Action that stops the active session.
pub const ACTION_STOP: &str = "tiktok.live.stop";
/// Action parameter carrying the account to monitor.
pub const PARAM_USERNAME: &str = "tiktok.live.username";

/// State identifiers exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter)]
pub enum StateId {
    #[strum(serialize = "tiktok.live.status")]
    Status,
    #[strum(serialize = "tiktok.live.current_username")]
    CurrentUsername,
    #[strum(serialize = "tiktok.live.viewers")]
    Viewers,
    #[strum(serialize = "tiktok.live.total_likes")]
    TotalLikes,
    #[strum(serialize = "tiktok.live.followers")]
    Followers,
    #[strum(serialize = "tiktok.live.last_comment")]
    LastComment,
    #[strum(serialize = "tiktok.live.last_commenter")]
    LastCommenter,
    #[strum(serialize = "tiktok.live.room_id")]
    RoomId,
}

impl StateId {
    /// Value this state takes after a display reset, `None` if the reset leaves it alone.
    pub fn reset_value(self) -> Option<&'static str> {
        match self {
            Self::Status => None,
            Self::Viewers | Self::TotalLikes | Self::Followers => Some("0"),
            Self::CurrentUsername | Self::LastComment | Self::LastCommenter | Self::RoomId => {
                Some("")
            }
        }
    }

    /// States touched by a display reset, with their zero values, in emission order.
    pub fn reset_list() -> impl Iterator<Item = (StateId, &'static str)> {
        StateId::iter().filter_map(|id| id.reset_value().map(|value| (id, value)))
    }
}

/// Broadcast event identifiers exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter)]
pub enum BroadcastId {
    #[strum(serialize = "tiktok.live.connected")]
    Connected,
    #[strum(serialize = "tiktok.live.new_comment")]
    NewComment,
    #[strum(serialize = "tiktok.live.gift_received")]
    GiftReceived,
    #[strum(serialize = "tiktok.live.new_follower")]
    NewFollower,
    #[strum(serialize = "tiktok.live.stream_ended")]
    StreamEnded,
}

/// Status strings written to [`StateId::Status`].
pub mod status {
    pub const READY: &str = "Ready";
    pub const CONNECTING: &str = "Connecting...";
    pub const CONNECTED: &str = "Connected";
    pub const STOPPED: &str = "Stopped";
    pub const STREAM_ENDED: &str = "Stream Ended";
    pub const DISCONNECTED: &str = "Disconnected";
    pub const NO_USERNAME: &str = "Error: No username provided";
    pub const UNAVAILABLE: &str = "Error: Live connection unavailable";

    /// Format an error status line.
    pub fn error(reason: &str) -> String {
        format!("Error: {reason}")
    }
}

/// Static plugin metadata returned for an `info` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub sdk_version: u32,
    pub version: String,
    pub plugin: String,
}

impl Default for PluginInfo {
    fn default() -> Self {
        Self {
            sdk_version: 6,
            version: "1.0.0".to_string(),
            plugin: "TikTok Live Monitor".to_string(),
        }
    }
}

/// A key/value parameter attached to an action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub value: Value,
}

impl ActionData {
    /// The parameter value as text; non-string scalars are rendered, null is empty.
    pub fn value_str(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// A command sent by the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCommand {
    /// Request for plugin metadata
    Info,
    /// Settings were (re)applied
    Settings,
    /// A user-triggered action
    Action {
        #[serde(rename = "actionId", default)]
        action_id: String,
        #[serde(default)]
        data: Vec<ActionData>,
    },
    /// The host is closing the plugin
    ClosePlugin,
    /// Any other message type
    #[serde(other)]
    Unknown,
}

impl HostCommand {
    /// Decode one inbound line.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Find a parameter value by id, trimmed; blank values count as absent.
pub fn find_param<'a>(data: &'a [ActionData], id: &str) -> Option<&'a ActionData> {
    data.iter()
        .find(|item| item.id == id)
        .filter(|item| !item.value_str().trim().is_empty())
}

/// A message written to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Last-value-wins state update
    #[serde(rename = "stateUpdate")]
    StateUpdate { id: String, value: String },
    /// Fire-once event notification
    #[serde(rename = "broadcast")]
    Broadcast {
        event: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// Reply to an `info` request
    #[serde(rename = "info")]
    Info {
        #[serde(rename = "sdkVersion")]
        sdk_version: u32,
        version: String,
        plugin: String,
    },
    /// Dispatch-level failure
    #[serde(rename = "error")]
    Error { message: String },
}

impl OutboundMessage {
    /// Build a state update.
    pub fn state(id: StateId, value: impl ToString) -> Self {
        Self::StateUpdate {
            id: id.as_ref().to_string(),
            value: value.to_string(),
        }
    }

    /// Build a broadcast without payload.
    pub fn broadcast(event: BroadcastId) -> Self {
        Self::Broadcast {
            event: event.as_ref().to_string(),
            payload: Map::new(),
        }
    }

    /// Build a broadcast carrying payload fields.
    pub fn broadcast_with(event: BroadcastId, payload: Map<String, Value>) -> Self {
        Self::Broadcast {
            event: event.as_ref().to_string(),
            payload,
        }
    }

    /// Build the info reply.
    pub fn info(info: &PluginInfo) -> Self {
        Self::Info {
            sdk_version: info.sdk_version,
            version: info.version.clone(),
            plugin: info.plugin.clone(),
        }
    }

    /// Build an error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize as a single protocol line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
