//! TikTok LIVE to automation host bridge.
//!
//! Live events arrive through a [`LiveProvider`], are normalized into state
//! updates and broadcasts and written to the host as JSON lines. The host drives
//! the single monitoring session through [`CommandDispatcher`].

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod followers;
pub mod normalizer;
pub mod outbound;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod websocket;

pub use dispatcher::{CommandDispatcher, Dispatch, run_host_loop};
pub use error::{LiveError, Result};
pub use event::{LiveEvent, LiveEventKind};
pub use followers::{
    DisabledLookup, FollowerLookup, FollowerLookupConfig, HttpFollowerLookup, parse_follower_count,
};
pub use normalizer::{LikeTally, Normalized, SessionAction, normalize};
pub use outbound::{MemoryLog, OutboundChannel};
pub use protocol::{BroadcastId, HostCommand, OutboundMessage, PluginInfo, StateId};
pub use provider::{ConnectionConfig, LiveConnection, LiveProvider, ReconnectConfig};
pub use session::{
    Ack, Session, SessionConfig, SessionController, SessionDeps, SessionState,
    normalize_account_id,
};
pub use websocket::{LiveProtocol, RelayProtocol, WebSocketLiveProvider, create_relay_provider};
