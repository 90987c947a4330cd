//! Per-session runner.
//!
//! The runner owns the live connection of one session generation. It pulls
//! events, normalizes them under the session cell's lock and emits the result,
//! runs follower refreshes in the background and handles the two ways a feed
//! can end on its own: an explicit stream end and feed loss.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::LiveEvent;
use crate::followers::FollowerLookup;
use crate::normalizer::{SessionAction, normalize};
use crate::outbound::OutboundChannel;
use crate::protocol::{BroadcastId, OutboundMessage, StateId, status};
use crate::provider::{LiveConnection, LiveProvider};

use super::controller::ControlCommand;
use super::state::{SessionCell, SessionState};

/// Whether the event loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Parameters for creating a session runner.
pub(crate) struct RunnerParams {
    pub generation: u64,
    pub account_id: String,
    pub provider: Arc<dyn LiveProvider>,
    pub connection: LiveConnection,
    pub followers: Arc<dyn FollowerLookup>,
    pub outbound: OutboundChannel,
    pub cell: SessionCell,
    pub control_tx: mpsc::WeakSender<ControlCommand>,
}

pub(crate) struct SessionRunner {
    generation: u64,
    account_id: String,
    provider: Arc<dyn LiveProvider>,
    connection: LiveConnection,
    followers: Arc<dyn FollowerLookup>,
    outbound: OutboundChannel,
    cell: SessionCell,
    control_tx: mpsc::WeakSender<ControlCommand>,
    refresh: Option<JoinHandle<()>>,
}

impl SessionRunner {
    pub fn new(params: RunnerParams) -> Self {
        let RunnerParams {
            generation,
            account_id,
            provider,
            connection,
            followers,
            outbound,
            cell,
            control_tx,
        } = params;

        Self {
            generation,
            account_id,
            provider,
            connection,
            followers,
            outbound,
            cell,
            control_tx,
            refresh: None,
        }
    }

    /// Run until cancelled, the stream ends or the feed is lost.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!(
            account = %self.account_id,
            generation = self.generation,
            connection = %self.connection.id,
            "Session runner started"
        );

        loop {
            let event = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                event = self.connection.next_event() => event,
            };

            let Some(event) = event else {
                self.feed_lost();
                break;
            };

            let flow = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                flow = self.handle_event_guarded(event) => flow,
            };

            if flow == Flow::Stop {
                break;
            }
        }

        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        // Also covers a stop that lands while the stream-end sequence is running.
        self.disconnect().await;
        debug!(account = %self.account_id, generation = self.generation, "Session runner finished");
    }

    /// Handle one event; errors and panics are logged and swallowed.
    async fn handle_event_guarded(&mut self, event: LiveEvent) -> Flow {
        let kind = event.kind.as_str().to_string();
        match AssertUnwindSafe(self.handle_event(event)).catch_unwind().await {
            Ok(flow) => flow,
            Err(panic) => {
                error!(
                    account = %self.account_id,
                    kind = %kind,
                    "Event handler panicked: {}",
                    panic_message(panic.as_ref())
                );
                Flow::Continue
            }
        }
    }

    async fn handle_event(&mut self, event: LiveEvent) -> Flow {
        let outbound = self.outbound.clone();
        let applied = self.cell.with_live(self.generation, |session| {
            let normalized = normalize(&event, &mut session.likes);
            emit_all(&outbound, &normalized.messages);

            if let SessionAction::Activate { room_id } = &normalized.action {
                session.state = SessionState::Active;
                if room_id.is_some() {
                    session.room_id = room_id.clone();
                }
            }
            normalized.action
        });

        match applied {
            None => {
                debug!(kind = event.kind.as_str(), "Dropping event for inactive session");
                Flow::Continue
            }
            Some(SessionAction::RefreshFollowers) => {
                self.spawn_refresh();
                Flow::Continue
            }
            Some(SessionAction::EndStream) => self.end_stream().await,
            Some(SessionAction::None) | Some(SessionAction::Activate { .. }) => Flow::Continue,
        }
    }

    /// Refresh the follower count unless a refresh is already running.
    fn spawn_refresh(&mut self) {
        if self.refresh.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(account = %self.account_id, "Follower refresh already in flight");
            return;
        }

        let followers = self.followers.clone();
        let outbound = self.outbound.clone();
        let cell = self.cell.clone();
        let account_id = self.account_id.clone();
        let generation = self.generation;

        self.refresh = Some(tokio::spawn(async move {
            let count = followers.fetch(&account_id).await;
            cell.with_live(generation, |_| {
                emit_all(&outbound, &[OutboundMessage::state(StateId::Followers, count)]);
            });
        }));
    }

    /// The stream ended: final follower snapshot, announce, reset, Idle.
    async fn end_stream(&mut self) -> Flow {
        info!(account = %self.account_id, "Live stream ended");
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }

        let final_followers = self.followers.fetch(&self.account_id).await;
        let outbound = self.outbound.clone();
        let ended = self.cell.with_live(self.generation, |session| {
            emit_all(
                &outbound,
                &[
                    OutboundMessage::state(StateId::Followers, final_followers),
                    OutboundMessage::state(StateId::Status, status::STREAM_ENDED),
                    OutboundMessage::broadcast(BroadcastId::StreamEnded),
                ],
            );
            if let Err(e) = outbound.reset_states() {
                warn!(error = %e, "Failed to reset display");
            }
            session.clear();
        });

        if ended.is_some() {
            self.disconnect().await;
            self.notify_ended();
        }
        Flow::Stop
    }

    /// The feed closed without a stream end.
    fn feed_lost(&mut self) {
        let outbound = self.outbound.clone();
        let lost = self.cell.with_live(self.generation, |session| {
            warn!(account = %session.account_id, "Live feed lost");
            emit_all(
                &outbound,
                &[OutboundMessage::state(StateId::Status, status::DISCONNECTED)],
            );
            if let Err(e) = outbound.reset_states() {
                warn!(error = %e, "Failed to reset display");
            }
            session.clear();
        });

        if lost.is_some() {
            self.connection.close();
            self.notify_ended();
        }
    }

    async fn disconnect(&mut self) {
        if !self.connection.is_open() {
            return;
        }
        if let Err(e) = self.provider.disconnect(&mut self.connection).await {
            warn!(account = %self.account_id, error = %e, "Failed to disconnect");
        }
    }

    fn notify_ended(&self) {
        if let Some(tx) = self.control_tx.upgrade() {
            let _ = tx.try_send(ControlCommand::SessionEnded {
                generation: self.generation,
            });
        }
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
    }
}

fn emit_all(outbound: &OutboundChannel, messages: &[OutboundMessage]) {
    for message in messages {
        if let Err(e) = outbound.send(message) {
            warn!(error = %e, "Failed to write to host");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
