//! Shared fixtures: a scripted live provider and follower lookups.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tiktok_live::{
    ConnectionConfig, FollowerLookup, LiveConnection, LiveError, LiveEvent, LiveProvider,
    MemoryLog, OutboundChannel, Result, SessionConfig, SessionController, SessionDeps,
    SessionState,
};
use tokio::sync::{Semaphore, mpsc};

struct Feed {
    account: String,
    tx: Option<mpsc::Sender<LiveEvent>>,
}

#[derive(Default)]
struct Script {
    feeds: Vec<Feed>,
    fail_with: Option<String>,
    hang_on_disconnect: bool,
    max_open: usize,
    disconnects: usize,
}

/// Provider whose feeds are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        let provider = Self::default();
        provider.script.lock().fail_with = Some(reason.into());
        provider
    }

    /// Disconnect never completes.
    pub fn hanging() -> Self {
        let provider = Self::default();
        provider.script.lock().hang_on_disconnect = true;
        provider
    }

    pub fn connects(&self) -> usize {
        self.script.lock().feeds.len()
    }

    pub fn disconnects(&self) -> usize {
        self.script.lock().disconnects
    }

    /// Highest number of simultaneously open feeds seen at any connect.
    pub fn max_open(&self) -> usize {
        self.script.lock().max_open
    }

    pub fn open_feeds(&self) -> usize {
        open_count(&self.script.lock().feeds)
    }

    pub fn account(&self, index: usize) -> String {
        self.script.lock().feeds[index].account.clone()
    }

    /// Push an event into feed `index`; returns false if the feed is closed.
    pub async fn send(&self, index: usize, name: &str, payload: Value) -> bool {
        let tx = self.script.lock().feeds[index].tx.clone();
        match tx {
            Some(tx) => tx.send(LiveEvent::from_named(name, payload)).await.is_ok(),
            None => false,
        }
    }

    /// Push into the most recent feed.
    pub async fn send_last(&self, name: &str, payload: Value) -> bool {
        let index = self.connects() - 1;
        self.send(index, name, payload).await
    }

    /// Drop the sending side of feed `index`, as a lost connection would.
    pub fn lose_feed(&self, index: usize) {
        self.script.lock().feeds[index].tx = None;
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.script.lock().feeds[index]
            .tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

fn open_count(feeds: &[Feed]) -> usize {
    feeds
        .iter()
        .filter(|feed| feed.tx.as_ref().is_some_and(|tx| !tx.is_closed()))
        .count()
}

#[async_trait]
impl LiveProvider for ScriptedProvider {
    fn platform(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, account_id: &str, _config: &ConnectionConfig) -> Result<LiveConnection> {
        let mut script = self.script.lock();
        if let Some(reason) = &script.fail_with {
            return Err(LiveError::connection(reason.clone()));
        }

        let (tx, rx) = mpsc::channel(64);
        let open = open_count(&script.feeds) + 1;
        script.max_open = script.max_open.max(open);
        let id = format!("scripted-{}", script.feeds.len());
        script.feeds.push(Feed {
            account: account_id.to_string(),
            tx: Some(tx),
        });
        Ok(LiveConnection::new(id, "scripted", account_id, rx))
    }

    async fn disconnect(&self, connection: &mut LiveConnection) -> Result<()> {
        let hang = {
            let mut script = self.script.lock();
            script.disconnects += 1;
            script.hang_on_disconnect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        connection.close();
        Ok(())
    }
}

/// Lookup returning a fixed count and counting calls.
#[derive(Default)]
pub struct StaticFollowers {
    count: u64,
    calls: AtomicUsize,
}

impl StaticFollowers {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FollowerLookup for StaticFollowers {
    async fn fetch(&self, _account_id: &str) -> u64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.count
    }
}

/// Answers the first call at once; later calls wait for a permit.
pub struct GatedFollowers {
    calls: AtomicUsize,
    gate: Semaphore,
    first: u64,
    later: u64,
}

impl GatedFollowers {
    pub fn new(first: u64, later: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            first,
            later,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl FollowerLookup for GatedFollowers {
    async fn fetch(&self, _account_id: &str) -> u64 {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return self.first;
        }
        match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.later
            }
            Err(_) => 0,
        }
    }
}

/// Answers the first call, panics on every later one.
#[derive(Default)]
pub struct PanickingFollowers {
    calls: AtomicUsize,
}

#[async_trait]
impl FollowerLookup for PanickingFollowers {
    async fn fetch(&self, _account_id: &str) -> u64 {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return 3;
        }
        panic!("follower lookup exploded");
    }
}

/// Answers the first call; on later calls queues a stop and returns only once
/// the session is stopping.
#[derive(Default)]
pub struct StopDuringFetch {
    calls: AtomicUsize,
    controller: Mutex<Option<SessionController>>,
}

impl StopDuringFetch {
    pub fn attach(&self, controller: SessionController) {
        *self.controller.lock() = Some(controller);
    }
}

#[async_trait]
impl FollowerLookup for StopDuringFetch {
    async fn fetch(&self, _account_id: &str) -> u64 {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return 5;
        }
        let Some(controller) = self.controller.lock().clone() else {
            return 0;
        };
        let mut rx = controller.subscribe();
        if controller.stop().await.is_ok() {
            let _ = rx.wait_for(|s| s.state == SessionState::Stopping).await;
        }
        6
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub provider: ScriptedProvider,
    pub log: MemoryLog,
}

pub fn harness(provider: ScriptedProvider, followers: Arc<dyn FollowerLookup>) -> Harness {
    harness_with(provider, followers, SessionConfig::default())
}

pub fn harness_with(
    provider: ScriptedProvider,
    followers: Arc<dyn FollowerLookup>,
    config: SessionConfig,
) -> Harness {
    let (outbound, log) = OutboundChannel::in_memory();
    let controller = SessionController::spawn(
        SessionDeps {
            provider: Some(Arc::new(provider.clone())),
            followers,
            outbound,
        },
        config,
    );
    Harness {
        controller,
        provider,
        log,
    }
}

impl Harness {
    pub async fn start(&self, account: &str) {
        self.controller
            .start(account)
            .await
            .expect("controller running")
            .wait()
            .await
            .expect("start processed");
    }

    pub async fn stop(&self) {
        self.controller
            .stop()
            .await
            .expect("controller running")
            .wait()
            .await
            .expect("stop processed");
    }

    pub async fn reset(&self) {
        self.controller
            .reset()
            .await
            .expect("controller running")
            .wait()
            .await
            .expect("reset processed");
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Let spawned tasks run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out: {what}"))
}
