//! Session state and the shared session cell.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::normalizer::LikeTally;

/// Lifecycle state of the monitoring session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Stopping,
}

impl SessionState {
    /// Whether events of this session may still change the display.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

/// The single monitoring session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Normalized account id; empty when idle
    pub account_id: String,
    pub state: SessionState,
    /// Like counters of the current session
    pub likes: LikeTally,
    /// Follower count captured at start
    pub initial_follower_count: u64,
    /// Room id reported by the feed
    pub room_id: Option<String>,
    /// Incremented on every start
    pub generation: u64,
}

impl Session {
    pub fn total_likes(&self) -> u64 {
        self.likes.total()
    }

    pub fn per_user_likes(&self) -> &FxHashMap<String, u64> {
        self.likes.per_user()
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Go back to Idle with empty fields. The generation is kept.
    pub(crate) fn clear(&mut self) {
        *self = Self {
            generation: self.generation,
            ..Self::default()
        };
    }
}

/// Shared session cell.
///
/// Writers go through [`watch::Sender::send_if_modified`], so every closure runs
/// under the cell's write lock. Work tagged with a generation only runs while
/// that generation is current and live; outbound messages emitted from inside
/// the closure can therefore never interleave with a later session's messages.
#[derive(Debug, Clone)]
pub(crate) struct SessionCell {
    tx: Arc<watch::Sender<Session>>,
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Unconditional update, reserved for the controller.
    pub fn update(&self, f: impl FnOnce(&mut Session)) {
        self.tx.send_modify(f);
    }

    /// Run `f` only if `generation` is current and the session is live.
    /// Returns `None` when the work is stale.
    pub fn with_live<R>(&self, generation: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.tx.send_if_modified(|session| {
            if session.generation != generation || !session.state.is_live() {
                return false;
            }
            out = f.take().map(|f| f(session));
            true
        });
        out
    }
}
