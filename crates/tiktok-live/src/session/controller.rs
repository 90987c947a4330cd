//! Session controller.
//!
//! The controller is a single background task that owns every lifecycle
//! transition. [`SessionController`] handles enqueue commands; the task
//! processes them one at a time, so a start never overlaps a stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LiveError, Result};
use crate::followers::FollowerLookup;
use crate::outbound::OutboundChannel;
use crate::protocol::{StateId, status};
use crate::provider::{ConnectionConfig, LiveProvider};

use super::runner::{RunnerParams, SessionRunner};
use super::state::{Session, SessionCell, SessionState};

/// Timing and limits for the session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a stop waits for the runner before abandoning it
    pub stop_timeout: Duration,
    /// Upper bound for opening the live connection
    pub connect_timeout: Duration,
    /// Connect failure reasons are cut to this many characters
    pub max_reason_len: usize,
    /// Passed to the provider on connect
    pub connection: ConnectionConfig,
    /// Capacity of the command queue
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            max_reason_len: 200,
            connection: ConnectionConfig::default(),
            command_buffer: 64,
        }
    }
}

/// Collaborators of the controller.
#[derive(Clone)]
pub struct SessionDeps {
    /// Live feed provider; `None` when no feed is available
    pub provider: Option<Arc<dyn LiveProvider>>,
    pub followers: Arc<dyn FollowerLookup>,
    pub outbound: OutboundChannel,
}

/// Commands processed by the controller task.
pub(crate) enum ControlCommand {
    Start {
        account: String,
        done: oneshot::Sender<()>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Reset {
        done: oneshot::Sender<()>,
    },
    /// Sent by a runner that ended its session on its own
    SessionEnded { generation: u64 },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Completion of an enqueued command.
#[derive(Debug)]
#[must_use = "dropping an Ack does not cancel the command"]
pub struct Ack(oneshot::Receiver<()>);

impl Ack {
    /// Wait until the controller has processed the command.
    pub async fn wait(self) -> Result<()> {
        self.0.await.map_err(|_| LiveError::ControllerClosed)
    }
}

/// Handle to the session controller task.
#[derive(Clone)]
pub struct SessionController {
    command_tx: mpsc::Sender<ControlCommand>,
    cell: SessionCell,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &self.cell.snapshot())
            .finish()
    }
}

impl SessionController {
    /// Spawn the controller task on the current runtime.
    pub fn spawn(deps: SessionDeps, config: SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let cell = SessionCell::new();

        let task = ControllerTask {
            deps,
            config,
            cell: cell.clone(),
            control_tx: command_tx.downgrade(),
            active: None,
        };
        tokio::spawn(task.run(command_rx));

        Self { command_tx, cell }
    }

    /// Start monitoring an account, replacing any current session.
    pub async fn start(&self, raw_account_id: &str) -> Result<Ack> {
        self.request(|done| ControlCommand::Start {
            account: raw_account_id.to_string(),
            done,
        })
        .await
    }

    /// Stop the current session. Nothing happens when idle.
    pub async fn stop(&self) -> Result<Ack> {
        self.request(|done| ControlCommand::Stop { done }).await
    }

    /// Reset the display and report Ready. An active session keeps running.
    pub async fn reset(&self) -> Result<Ack> {
        self.request(|done| ControlCommand::Reset { done }).await
    }

    /// Stop any session and terminate the controller task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|done| ControlCommand::Shutdown { done })
            .await?
            .wait()
            .await
    }

    /// Current session.
    pub fn snapshot(&self) -> Session {
        self.cell.snapshot()
    }

    /// Watch session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.cell.subscribe()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> ControlCommand,
    ) -> Result<Ack> {
        let (done, ack) = oneshot::channel();
        self.command_tx
            .send(command(done))
            .await
            .map_err(|_| LiveError::ControllerClosed)?;
        Ok(Ack(ack))
    }
}

/// Strip surrounding whitespace and leading `@`.
pub fn normalize_account_id(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_string()
}

/// Cut a failure reason to at most `max_len` characters.
pub(crate) fn truncate_reason(reason: &str, max_len: usize) -> String {
    reason.chars().take(max_len).collect()
}

struct ActiveSession {
    generation: u64,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

struct ControllerTask {
    deps: SessionDeps,
    config: SessionConfig,
    cell: SessionCell,
    control_tx: mpsc::WeakSender<ControlCommand>,
    active: Option<ActiveSession>,
}

impl ControllerTask {
    async fn run(mut self, mut command_rx: mpsc::Receiver<ControlCommand>) {
        debug!("Session controller started");

        while let Some(command) = command_rx.recv().await {
            match command {
                ControlCommand::Start { account, done } => {
                    self.start(&account).await;
                    let _ = done.send(());
                }
                ControlCommand::Stop { done } => {
                    self.stop().await;
                    let _ = done.send(());
                }
                ControlCommand::Reset { done } => {
                    self.reset();
                    let _ = done.send(());
                }
                ControlCommand::SessionEnded { generation } => {
                    self.reap(generation).await;
                }
                ControlCommand::Shutdown { done } => {
                    // Later requests fail at send instead of sitting in the queue
                    command_rx.close();
                    self.stop().await;
                    let _ = done.send(());
                    break;
                }
            }
        }

        // All handles dropped without a shutdown
        if self.active.is_some() {
            self.stop().await;
        }
        debug!("Session controller stopped");
    }

    async fn start(&mut self, raw_account_id: &str) {
        let account_id = normalize_account_id(raw_account_id);
        if account_id.is_empty() {
            warn!("Start requested without a username");
            self.emit_status(status::NO_USERNAME);
            return;
        }

        let Some(provider) = self.deps.provider.clone() else {
            warn!(account = %account_id, "Start requested but no live provider is configured");
            self.emit_status(status::UNAVAILABLE);
            return;
        };

        self.stop().await;

        let followers = self.deps.followers.fetch(&account_id).await;

        let mut generation = 0;
        self.cell.update(|session| {
            session.clear();
            session.generation += 1;
            session.account_id = account_id.clone();
            session.initial_follower_count = followers;
            session.state = SessionState::Connecting;
            generation = session.generation;
        });
        info!(account = %account_id, generation, followers, "Starting session");

        self.emit_status(status::CONNECTING);
        self.emit_state(StateId::CurrentUsername, &account_id);
        self.emit_state(StateId::Followers, followers);

        let connect = provider.connect(&account_id, &self.config.connection);
        let result = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(LiveError::timeout(format!(
                "connection not established within {}s",
                self.config.connect_timeout.as_secs_f64()
            ))),
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                warn!(account = %account_id, error = %e, "Failed to connect");
                self.cell.update(Session::clear);
                let reason = truncate_reason(&e.to_string(), self.config.max_reason_len);
                self.emit_status(&status::error(&reason));
                return;
            }
        };

        let cancel_token = CancellationToken::new();
        let runner = SessionRunner::new(RunnerParams {
            generation,
            account_id,
            provider,
            connection,
            followers: self.deps.followers.clone(),
            outbound: self.deps.outbound.clone(),
            cell: self.cell.clone(),
            control_tx: self.control_tx.clone(),
        });
        let handle = tokio::spawn(runner.run(cancel_token.clone()));

        self.active = Some(ActiveSession {
            generation,
            cancel_token,
            handle,
        });
    }

    async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Stop requested while idle");
            return;
        };

        let live = self
            .cell
            .with_live(active.generation, |session| {
                session.state = SessionState::Stopping;
            })
            .is_some();

        if !live {
            // The session already ended on its own and said so on the display.
            self.join(active).await;
            return;
        }

        info!(generation = active.generation, "Stopping session");
        self.join(active).await;

        self.cell.update(Session::clear);
        self.emit_status(status::STOPPED);
        if let Err(e) = self.deps.outbound.reset_states() {
            warn!(error = %e, "Failed to reset display");
        }
    }

    /// Cancel the runner and wait for it, aborting after the stop timeout.
    async fn join(&self, active: ActiveSession) {
        let ActiveSession {
            generation,
            cancel_token,
            mut handle,
        } = active;

        cancel_token.cancel();
        match tokio::time::timeout(self.config.stop_timeout, &mut handle).await {
            Ok(Ok(())) => debug!(generation, "Session runner joined"),
            Ok(Err(e)) => warn!(generation, error = %e, "Session runner failed"),
            Err(_) => {
                warn!(
                    generation,
                    "Session runner did not stop within {:?}, abandoning it",
                    self.config.stop_timeout
                );
                handle.abort();
            }
        }
    }

    async fn reap(&mut self, generation: u64) {
        if let Some(active) = self.active.take_if(|active| active.generation == generation) {
            self.join(active).await;
        }
    }

    fn reset(&self) {
        if let Err(e) = self.deps.outbound.reset_states() {
            warn!(error = %e, "Failed to reset display");
        }
        self.emit_status(status::READY);
    }

    fn emit_status(&self, value: &str) {
        self.emit_state(StateId::Status, value);
    }

    fn emit_state(&self, id: StateId, value: impl ToString) {
        if let Err(e) = self.deps.outbound.emit_state(id, value) {
            warn!(state = id.as_ref(), error = %e, "Failed to write to host");
        }
    }
}
