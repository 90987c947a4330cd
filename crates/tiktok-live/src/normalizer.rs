//! Normalization of upstream live events into host messages.
//!
//! Every event kind has one normalization function and a fixed set of field
//! aliases with a default for each field. Payloads come from different library
//! versions and relays: fields move between a nested object (`user`, `gift`) and
//! the top level, get renamed between camelCase and snake_case, and numbers show
//! up as strings. None of that is allowed to surface as an error.
//!
//! | kind        | defaults                                                   |
//! |-------------|------------------------------------------------------------|
//! | comment     | text `""`, commenter `"Unknown"`                           |
//! | gift        | name `"Unknown Gift"`, diamonds `0`, repeat `1`, sender `"Unknown"` |
//! | digg        | count `1`, user `"unknown"`                                |
//! | like        | count fixed at `1`, user `"unknown"`                       |
//! | room update | viewers `0`                                                |
//! | follow      | follower `"Unknown"`                                       |
//! | question    | text `""`, asker `"Unknown"`                               |

use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::event::{LiveEvent, LiveEventKind};
use crate::protocol::{BroadcastId, OutboundMessage, StateId, status};

/// Field aliases, most specific first.
mod fields {
    pub const USER: &[&str] = &["user", "author", "sender"];
    pub const GIFT: &[&str] = &["gift", "giftDetails", "gift_details"];

    pub const NICKNAME: &[&str] = &["nickname", "nickName", "nick_name", "displayName", "display_name"];
    pub const USER_ID: &[&str] = &["uniqueId", "unique_id", "userId", "user_id"];

    pub const COMMENT: &[&str] = &["comment", "text", "content"];
    pub const QUESTION: &[&str] = &["question", "questionText", "question_text", "content"];

    pub const GIFT_NAME: &[&str] = &["name", "giftName", "gift_name"];
    pub const DIAMONDS: &[&str] = &["diamondCount", "diamond_count", "diamonds"];
    pub const REPEAT: &[&str] = &["repeatCount", "repeat_count", "repeat"];

    pub const DIGG: &[&str] = &["diggCount", "digg_count", "likeCount", "like_count", "count"];
    pub const VIEWERS: &[&str] = &["totalUser", "total_user", "viewerCount", "viewer_count", "total"];
    pub const ROOM_ID: &[&str] = &["roomId", "room_id"];
}

/// Defaults substituted for absent fields.
pub mod defaults {
    pub const COMMENT: &str = "";
    pub const NICKNAME: &str = "Unknown";
    pub const GIFT_NAME: &str = "Unknown Gift";
    pub const USER_ID: &str = "unknown";
    pub const DIAMONDS: u64 = 0;
    pub const REPEAT: u64 = 1;
    pub const DIGG: u64 = 1;
    pub const VIEWERS: u64 = 0;
}

/// Like counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeTally {
    total: u64,
    per_user: FxHashMap<String, u64>,
}

impl LikeTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add likes for a user; returns the new session total.
    pub fn add(&mut self, user_id: &str, count: u64) -> u64 {
        self.total = self.total.saturating_add(count);
        let entry = self.per_user.entry(user_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(count);
        self.total
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Likes attributed to one user.
    pub fn for_user(&self, user_id: &str) -> u64 {
        self.per_user.get(user_id).copied().unwrap_or(0)
    }

    pub fn per_user(&self) -> &FxHashMap<String, u64> {
        &self.per_user
    }

    pub fn clear(&mut self) {
        self.total = 0;
        self.per_user.clear();
    }
}

/// What the session has to do beyond forwarding messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionAction {
    #[default]
    None,
    /// The feed reported the room as connected
    Activate { room_id: Option<String> },
    /// Refresh the follower count
    RefreshFollowers,
    /// The stream ended; run the terminal sequence
    EndStream,
}

/// Result of normalizing one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub messages: Vec<OutboundMessage>,
    pub action: SessionAction,
}

impl Normalized {
    fn messages(messages: Vec<OutboundMessage>) -> Self {
        Self {
            messages,
            action: SessionAction::None,
        }
    }

    fn with_action(mut self, action: SessionAction) -> Self {
        self.action = action;
        self
    }
}

/// Normalize one event. Like events update `likes`.
pub fn normalize(event: &LiveEvent, likes: &mut LikeTally) -> Normalized {
    let payload = Payload::new(&event.payload);
    match &event.kind {
        LiveEventKind::Connect => normalize_connect(&payload),
        LiveEventKind::Comment => normalize_comment(&payload),
        LiveEventKind::Gift => normalize_gift(&payload),
        LiveEventKind::Digg => {
            let count = payload
                .u64_field(fields::DIGG)
                .filter(|c| *c > 0)
                .unwrap_or(defaults::DIGG);
            normalize_likes(&payload, count, likes)
        }
        LiveEventKind::Like => normalize_likes(&payload, 1, likes),
        LiveEventKind::RoomUpdate => normalize_room_update(&payload),
        LiveEventKind::Follow => normalize_follow(&payload),
        LiveEventKind::Question => normalize_question(&payload),
        LiveEventKind::StreamEnd => Normalized::default().with_action(SessionAction::EndStream),
        LiveEventKind::Share | LiveEventKind::Join | LiveEventKind::Other(_) => {
            debug!(kind = event.kind.as_str(), "Ignoring event");
            Normalized::default()
        }
    }
}

fn normalize_connect(payload: &Payload<'_>) -> Normalized {
    let room_id = payload.string_field(fields::ROOM_ID);

    let mut messages = vec![OutboundMessage::state(StateId::Status, status::CONNECTED)];
    if let Some(room_id) = &room_id {
        messages.push(OutboundMessage::state(StateId::RoomId, room_id));
    }
    messages.push(OutboundMessage::broadcast(BroadcastId::Connected));

    Normalized::messages(messages).with_action(SessionAction::Activate { room_id })
}

fn normalize_comment(payload: &Payload<'_>) -> Normalized {
    let text = payload
        .string_field(fields::COMMENT)
        .unwrap_or_else(|| defaults::COMMENT.to_string());
    let commenter = payload.nickname();

    Normalized::messages(vec![
        OutboundMessage::state(StateId::LastComment, text),
        OutboundMessage::state(StateId::LastCommenter, commenter),
        OutboundMessage::broadcast(BroadcastId::NewComment),
    ])
}

fn normalize_gift(payload: &Payload<'_>) -> Normalized {
    let gift = payload.nested(fields::GIFT);
    let lookup_str = |keys: &[&str]| gift.string_field(keys).or_else(|| payload.string_field(keys));
    let lookup_u64 = |keys: &[&str]| gift.u64_field(keys).or_else(|| payload.u64_field(keys));

    let name = lookup_str(fields::GIFT_NAME).unwrap_or_else(|| defaults::GIFT_NAME.to_string());
    let diamonds = lookup_u64(fields::DIAMONDS).unwrap_or(defaults::DIAMONDS);
    let count = lookup_u64(fields::REPEAT)
        .filter(|c| *c > 0)
        .unwrap_or(defaults::REPEAT);
    let value = diamonds.saturating_mul(count);
    let sender = payload.nickname();

    let mut data = Map::new();
    data.insert("gift_name".to_string(), json!(name));
    data.insert("count".to_string(), json!(count));
    data.insert("value".to_string(), json!(value));
    data.insert("sender".to_string(), json!(sender.clone()));

    Normalized::messages(vec![
        OutboundMessage::broadcast_with(BroadcastId::GiftReceived, data),
        OutboundMessage::state(StateId::LastCommenter, sender),
    ])
}

fn normalize_likes(payload: &Payload<'_>, count: u64, likes: &mut LikeTally) -> Normalized {
    let user_id = payload
        .user_string(fields::USER_ID)
        .unwrap_or_else(|| defaults::USER_ID.to_string());
    let total = likes.add(&user_id, count);

    Normalized::messages(vec![OutboundMessage::state(StateId::TotalLikes, total)])
}

fn normalize_room_update(payload: &Payload<'_>) -> Normalized {
    let viewers = payload.u64_field(fields::VIEWERS).unwrap_or(defaults::VIEWERS);

    Normalized::messages(vec![OutboundMessage::state(StateId::Viewers, viewers)])
        .with_action(SessionAction::RefreshFollowers)
}

fn normalize_follow(payload: &Payload<'_>) -> Normalized {
    let mut data = Map::new();
    data.insert("follower".to_string(), json!(payload.nickname()));

    Normalized::messages(vec![OutboundMessage::broadcast_with(
        BroadcastId::NewFollower,
        data,
    )])
}

fn normalize_question(payload: &Payload<'_>) -> Normalized {
    let question = payload
        .string_field(fields::QUESTION)
        .unwrap_or_else(|| defaults::COMMENT.to_string());

    Normalized::messages(vec![
        OutboundMessage::state(StateId::LastComment, format!("Q: {question}")),
        OutboundMessage::state(StateId::LastCommenter, payload.nickname()),
    ])
}

/// Read-only view over an event payload with alias and leniency rules.
#[derive(Clone, Copy)]
struct Payload<'a> {
    value: Option<&'a Map<String, Value>>,
}

impl<'a> Payload<'a> {
    fn new(value: &'a Value) -> Self {
        Self {
            value: value.as_object(),
        }
    }

    fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        let map = self.value?;
        keys.iter()
            .filter_map(|key| map.get(*key))
            .find(|v| !v.is_null())
    }

    /// First nested object found under one of `keys`; empty view if none.
    fn nested(&self, keys: &[&str]) -> Payload<'a> {
        Payload {
            value: keys
                .iter()
                .filter_map(|key| self.value?.get(*key))
                .find_map(Value::as_object),
        }
    }

    fn string_field(&self, keys: &[&str]) -> Option<String> {
        self.get(keys).and_then(lenient_string)
    }

    fn u64_field(&self, keys: &[&str]) -> Option<u64> {
        self.get(keys).and_then(lenient_u64)
    }

    /// String field on the nested user object, falling back to the top level.
    fn user_string(&self, keys: &[&str]) -> Option<String> {
        self.nested(fields::USER)
            .string_field(keys)
            .or_else(|| self.string_field(keys))
            .filter(|s| !s.is_empty())
    }

    fn nickname(&self) -> String {
        self.user_string(fields::NICKNAME)
            .unwrap_or_else(|| defaults::NICKNAME.to_string())
    }
}

/// Strings as-is, numbers and booleans rendered; everything else is absent.
fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Non-negative integers, integral floats and numeric strings; everything else is absent.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f.trunc() as u64)
            })
        }
        _ => None,
    }
}
