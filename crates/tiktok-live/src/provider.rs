//! Live feed provider trait and connection types.
//!
//! A provider turns an account id into a stream of [`LiveEvent`]s. The session
//! layer only sees this trait; the relay-backed WebSocket implementation lives in
//! [`crate::websocket`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::event::LiveEvent;

/// Connection handle for an open live feed.
#[derive(Debug)]
pub struct LiveConnection {
    /// Unique connection ID
    pub id: String,
    /// Platform identifier
    pub platform: String,
    /// Account being monitored
    pub account_id: String,
    /// Connection start time
    pub connected_at: DateTime<Utc>,
    events: mpsc::Receiver<LiveEvent>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl LiveConnection {
    /// Create a handle over an event receiver.
    pub fn new(
        id: impl Into<String>,
        platform: impl Into<String>,
        account_id: impl Into<String>,
        events: mpsc::Receiver<LiveEvent>,
    ) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            account_id: account_id.into(),
            connected_at: Utc::now(),
            events,
            shutdown_tx: None,
            tasks: Vec::new(),
            closed: false,
        }
    }

    /// Attach a shutdown signal for the background feed task.
    pub fn with_shutdown(mut self, shutdown_tx: mpsc::Sender<()>) -> Self {
        self.shutdown_tx = Some(shutdown_tx);
        self
    }

    /// Attach tasks that are aborted when the connection closes.
    pub fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Receive the next event. Returns None once the feed is closed.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Signal shutdown, stop accepting events and abort background tasks.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        self.events.close();
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Reconnect policy for a feed that drops after it was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60000,
        }
    }
}

impl ReconnectConfig {
    /// Delay after `delay_ms`: doubled, capped at the maximum.
    pub fn next_delay(&self, delay_ms: u64) -> u64 {
        delay_ms.saturating_mul(2).min(self.max_reconnect_delay_ms)
    }
}

/// Configuration for establishing a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reconnect policy after the first successful connect
    pub reconnect: ReconnectConfig,
    /// Interval between keep-alive pings
    pub heartbeat_interval: Duration,
    /// Capacity of the event buffer between the feed task and the session
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

/// Source of live events for an account.
#[async_trait]
pub trait LiveProvider: Send + Sync {
    /// Platform name this provider handles.
    fn platform(&self) -> &str;

    /// Open the feed for an account. Returns once the feed is established; event
    /// delivery starts immediately and is buffered in the returned handle.
    async fn connect(&self, account_id: &str, config: &ConnectionConfig) -> Result<LiveConnection>;

    /// Close the feed.
    async fn disconnect(&self, connection: &mut LiveConnection) -> Result<()> {
        connection.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LiveEventKind;
    use serde_json::Value;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectConfig {
            max_reconnect_attempts: 3,
            base_reconnect_delay_ms: 400,
            max_reconnect_delay_ms: 1000,
        };
        assert_eq!(policy.next_delay(400), 800);
        assert_eq!(policy.next_delay(800), 1000);

        let extreme = ReconnectConfig {
            max_reconnect_delay_ms: u64::MAX,
            ..policy
        };
        assert_eq!(extreme.next_delay(u64::MAX / 2 + 1), u64::MAX);
    }

    #[tokio::test]
    async fn test_connection_delivers_then_closes() {
        let (tx, rx) = mpsc::channel(4);
        let mut conn = LiveConnection::new("c1", "tiktok", "alice", rx);

        tx.send(LiveEvent::new(LiveEventKind::Like, Value::Null))
            .await
            .unwrap();
        assert_eq!(
            conn.next_event().await.map(|e| e.kind),
            Some(LiveEventKind::Like)
        );

        conn.close();
        assert!(!conn.is_open());
        assert!(tx.send(LiveEvent::new(LiveEventKind::Like, Value::Null)).await.is_err());
        assert!(conn.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_close_signals_shutdown_and_aborts_tasks() {
        let (_tx, rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();

        let mut conn = LiveConnection::new("c2", "tiktok", "bob", rx)
            .with_shutdown(shutdown_tx)
            .with_tasks(vec![task]);
        conn.close();

        assert!(shutdown_rx.recv().await.is_some());
        tokio::time::timeout(Duration::from_secs(1), async {
            while !abort.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task should be aborted");
    }
}
