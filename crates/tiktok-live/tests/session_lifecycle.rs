mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use tiktok_live::protocol::status;
use tiktok_live::{
    BroadcastId, DisabledLookup, FollowerLookupConfig, HttpFollowerLookup, SessionConfig,
    SessionState, StateId,
};

#[tokio::test]
async fn start_normalizes_account_and_announces_connecting() {
    let followers = Arc::new(StaticFollowers::new(42));
    let h = harness(ScriptedProvider::new(), followers.clone());

    h.start("@Alice ").await;

    assert_eq!(h.provider.connects(), 1);
    assert_eq!(h.provider.account(0), "Alice");
    assert_eq!(followers.calls(), 1);

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.state, SessionState::Connecting);
    assert_eq!(snapshot.account_id, "Alice");
    assert_eq!(snapshot.initial_follower_count, 42);
    assert_eq!(snapshot.total_likes(), 0);
    assert_eq!(snapshot.generation, 1);

    assert_eq!(h.log.state_values(StateId::Status), vec![status::CONNECTING]);
    assert_eq!(h.log.state_values(StateId::CurrentUsername), vec!["Alice"]);
    assert_eq!(h.log.state_values(StateId::Followers), vec!["42"]);
}

#[tokio::test]
async fn blank_username_reports_error_and_stays_idle() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));

    h.start("").await;
    h.start("   ").await;
    h.start("@").await;

    assert_eq!(h.provider.connects(), 0);
    assert!(h.controller.snapshot().is_idle());
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::NO_USERNAME; 3]
    );
}

#[tokio::test]
async fn stop_while_idle_emits_nothing() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));

    h.stop().await;
    h.stop().await;

    assert!(h.log.lines().is_empty());
    assert!(h.controller.snapshot().is_idle());
}

#[tokio::test]
async fn connect_event_activates_and_events_flow() {
    let h = harness(ScriptedProvider::new(), Arc::new(StaticFollowers::new(1)));
    h.start("alice").await;

    assert!(h.provider.send_last("connected", json!({"roomId": "7001"})).await);
    assert!(
        h.provider
            .send_last("chat", json!({"comment": "hi", "user": {"nickname": "Ann"}}))
            .await
    );

    eventually("comment", || {
        h.log.state_values(StateId::LastComment) == vec!["hi"]
    })
    .await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.state, SessionState::Active);
    assert_eq!(snapshot.room_id.as_deref(), Some("7001"));
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::CONNECTED]
    );
    assert_eq!(h.log.state_values(StateId::RoomId), vec!["7001"]);
    assert_eq!(h.log.broadcasts(BroadcastId::Connected).len(), 1);
    assert_eq!(h.log.broadcasts(BroadcastId::NewComment).len(), 1);
    assert_eq!(h.log.state_values(StateId::LastCommenter), vec!["Ann"]);
}

#[tokio::test]
async fn digg_and_like_accumulate_per_user() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("alice").await;

    h.provider
        .send_last("digg", json!({"diggCount": 4, "user": {"uniqueId": "u1"}}))
        .await;
    h.provider
        .send_last("like", json!({"user": {"uniqueId": "u1"}}))
        .await;

    eventually("likes", || h.controller.snapshot().total_likes() == 5).await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.per_user_likes().get("u1"), Some(&5));
    assert_eq!(h.log.state_values(StateId::TotalLikes), vec!["4", "5"]);
}

#[tokio::test]
async fn gift_broadcast_carries_value() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("alice").await;

    h.provider
        .send_last(
            "gift",
            json!({"gift": {"diamond_count": 5, "repeat_count": 3, "name": "Rose"}, "user": {"nickname": "Bob"}}),
        )
        .await;

    eventually("gift", || !h.log.broadcasts(BroadcastId::GiftReceived).is_empty()).await;
    assert_eq!(
        h.log.broadcasts(BroadcastId::GiftReceived),
        vec![json!({
            "type": "broadcast",
            "event": "tiktok.live.gift_received",
            "gift_name": "Rose",
            "count": 3,
            "value": 15,
            "sender": "Bob"
        })]
    );
}

#[tokio::test]
async fn follower_network_error_yields_zero_and_monitoring_proceeds() {
    let lookup = HttpFollowerLookup::new(FollowerLookupConfig {
        profile_url: "http://127.0.0.1:9/@{account}".to_string(),
        timeout: Duration::from_millis(500),
        ..Default::default()
    })
    .unwrap();
    let h = harness(ScriptedProvider::new(), Arc::new(lookup));

    h.start("alice").await;

    assert_eq!(h.log.state_values(StateId::Followers), vec!["0"]);
    assert_eq!(h.controller.snapshot().initial_follower_count, 0);
    assert_eq!(h.controller.snapshot().state, SessionState::Connecting);
    assert_eq!(h.provider.connects(), 1);
}

#[tokio::test]
async fn stop_closes_feed_and_resets_display() {
    let h = harness(ScriptedProvider::new(), Arc::new(StaticFollowers::new(9)));
    h.start("alice").await;
    h.provider.send_last("connect", json!({})).await;
    eventually("active", || h.controller.snapshot().state == SessionState::Active).await;

    h.stop().await;

    assert!(h.controller.snapshot().is_idle());
    assert_eq!(h.controller.snapshot().account_id, "");
    assert!(!h.provider.is_open(0));
    assert_eq!(h.provider.disconnects(), 1);
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::CONNECTED, status::STOPPED]
    );
    assert_eq!(h.log.state_values(StateId::Followers), vec!["9", "0"]);
    assert_eq!(
        h.log.state_values(StateId::CurrentUsername),
        vec!["alice", ""]
    );

    // A second stop is a no-op.
    let lines = h.log.lines().len();
    h.stop().await;
    assert_eq!(h.log.lines().len(), lines);
}

#[tokio::test]
async fn stream_end_runs_terminal_sequence_once() {
    let followers = Arc::new(StaticFollowers::new(7));
    let h = harness(ScriptedProvider::new(), followers.clone());
    h.start("alice").await;
    h.provider.send_last("connect", json!({"roomId": 1})).await;
    h.provider
        .send_last("like", json!({"uniqueId": "u1"}))
        .await;
    h.provider.send_last("streamEnd", json!({})).await;

    eventually("idle", || h.controller.snapshot().is_idle()).await;

    assert_eq!(h.log.broadcasts(BroadcastId::StreamEnded).len(), 1);
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::CONNECTED, status::STREAM_ENDED]
    );
    // Start snapshot, final snapshot, then the display reset.
    assert_eq!(h.log.state_values(StateId::Followers), vec!["7", "7", "0"]);
    assert_eq!(h.log.state_values(StateId::TotalLikes), vec!["1", "0"]);
    assert_eq!(followers.calls(), 2);
    assert_eq!(h.controller.snapshot().total_likes(), 0);

    eventually("feed closed", || !h.provider.is_open(0)).await;
    assert_eq!(h.provider.disconnects(), 1);

    // The session is over: stop does nothing and issues no second close.
    let lines = h.log.lines().len();
    h.stop().await;
    assert_eq!(h.log.lines().len(), lines);
    assert_eq!(h.provider.disconnects(), 1);
}

#[tokio::test]
async fn stop_during_stream_end_still_disconnects() {
    let followers = Arc::new(StopDuringFetch::default());
    let h = harness(ScriptedProvider::new(), followers.clone());
    followers.attach(h.controller.clone());
    h.start("alice").await;
    h.provider.send_last("connect", json!({})).await;
    h.provider.send_last("streamEnd", json!({})).await;

    eventually("stopped", || {
        h.log
            .state_values(StateId::Status)
            .iter()
            .any(|v| v == status::STOPPED)
    })
    .await;

    // The stop won: no stream-end announcement, but the feed is closed properly.
    assert!(h.controller.snapshot().is_idle());
    assert!(h.log.broadcasts(BroadcastId::StreamEnded).is_empty());
    eventually("feed closed", || !h.provider.is_open(0)).await;
    assert_eq!(h.provider.disconnects(), 1);
}

#[tokio::test]
async fn restart_stops_previous_session_first() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));

    h.start("A").await;
    h.start("B").await;

    assert_eq!(h.provider.connects(), 2);
    assert_eq!(h.provider.account(0), "A");
    assert_eq!(h.provider.account(1), "B");
    assert_eq!(h.provider.max_open(), 1);
    assert!(!h.provider.is_open(0));
    assert!(h.provider.is_open(1));

    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::STOPPED, status::CONNECTING]
    );
    assert_eq!(
        h.log.state_values(StateId::CurrentUsername),
        vec!["A", "", "B"]
    );

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.account_id, "B");
    assert_eq!(snapshot.generation, 2);
}

#[tokio::test]
async fn events_from_previous_session_are_dropped() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("A").await;
    h.start("B").await;

    // The old feed is closed; nothing it might still deliver reaches the host.
    assert!(!h.provider.send(0, "like", json!({"uniqueId": "x"})).await);
    h.provider
        .send_last("like", json!({"uniqueId": "y"}))
        .await;

    eventually("like", || h.controller.snapshot().total_likes() == 1).await;
    assert_eq!(h.controller.snapshot().likes.for_user("x"), 0);
}

#[tokio::test]
async fn connect_failure_reports_truncated_reason() {
    let reason = "x".repeat(300);
    let h = harness(ScriptedProvider::failing(reason), Arc::new(DisabledLookup));

    h.start("alice").await;

    let statuses = h.log.state_values(StateId::Status);
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0], status::CONNECTING);
    let error = &statuses[1];
    assert!(error.starts_with("Error: Connection error: "));
    assert_eq!(error.chars().count(), "Error: ".len() + 200);

    assert!(h.controller.snapshot().is_idle());
    assert_eq!(h.controller.snapshot().account_id, "");

    // Nothing to stop afterwards.
    let lines = h.log.lines().len();
    h.stop().await;
    assert_eq!(h.log.lines().len(), lines);
}

#[tokio::test]
async fn feed_loss_goes_idle_without_broadcast() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("alice").await;
    h.provider.send_last("connect", json!({})).await;
    eventually("active", || h.controller.snapshot().state == SessionState::Active).await;

    h.provider.lose_feed(0);

    eventually("idle", || h.controller.snapshot().is_idle()).await;
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::CONNECTED, status::DISCONNECTED]
    );
    assert!(h.log.broadcasts(BroadcastId::StreamEnded).is_empty());
    assert_eq!(h.log.state_values(StateId::Viewers), vec!["0"]);

    // A new session can start right away.
    h.start("bob").await;
    assert_eq!(h.controller.snapshot().account_id, "bob");
}

#[tokio::test]
async fn stop_timeout_abandons_runner_and_resets_anyway() {
    let config = SessionConfig {
        stop_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let h = harness_with(ScriptedProvider::hanging(), Arc::new(DisabledLookup), config);
    h.start("alice").await;

    within("stop", h.stop()).await;

    assert!(h.controller.snapshot().is_idle());
    assert_eq!(
        h.log.state_values(StateId::Status),
        vec![status::CONNECTING, status::STOPPED]
    );
    // The abandoned runner is aborted, which drops its connection.
    eventually("feed closed", || !h.provider.is_open(0)).await;

    h.start("bob").await;
    assert_eq!(h.provider.max_open(), 1);
}

#[tokio::test]
async fn settings_reset_keeps_session_running() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("alice").await;
    h.provider.send_last("connect", json!({})).await;
    eventually("active", || h.controller.snapshot().state == SessionState::Active).await;

    h.reset().await;

    assert_eq!(h.controller.snapshot().state, SessionState::Active);
    assert_eq!(
        h.log.state_values(StateId::Status).last().map(String::as_str),
        Some(status::READY)
    );
    assert!(h.provider.is_open(0));

    h.provider
        .send_last("comment", json!({"comment": "still here"}))
        .await;
    eventually("comment", || {
        h.log.state_values(StateId::LastComment).last().map(String::as_str) == Some("still here")
    })
    .await;
}

#[tokio::test]
async fn follower_refresh_is_single_flight() {
    let followers = Arc::new(GatedFollowers::new(10, 20));
    let h = harness(ScriptedProvider::new(), followers.clone());
    h.start("alice").await;

    for viewers in [5, 6, 7] {
        h.provider
            .send_last("roomUser", json!({"viewerCount": viewers}))
            .await;
    }
    eventually("viewers", || h.log.state_values(StateId::Viewers).len() == 3).await;
    eventually("refresh started", || followers.calls() == 2).await;
    settle().await;
    assert_eq!(followers.calls(), 2);

    followers.release(10);
    eventually("refreshed followers", || {
        h.log.state_values(StateId::Followers) == vec!["10", "20"]
    })
    .await;

    // Once the refresh finished, a later update starts another.
    within("second refresh", async {
        while followers.calls() < 3 {
            h.provider
                .send_last("roomUser", json!({"viewerCount": 8}))
                .await;
            settle().await;
        }
    })
    .await;
}

#[tokio::test]
async fn handler_panic_does_not_end_session() {
    let h = harness(ScriptedProvider::new(), Arc::new(PanickingFollowers::default()));
    h.start("alice").await;
    h.provider.send_last("connect", json!({})).await;

    // Stream end looks up followers, which panics here.
    h.provider.send_last("streamEnd", json!({})).await;
    h.provider
        .send_last("comment", json!({"comment": "after"}))
        .await;

    eventually("comment after panic", || {
        h.log.state_values(StateId::LastComment) == vec!["after"]
    })
    .await;
    assert_eq!(h.controller.snapshot().state, SessionState::Active);
    assert!(h.log.broadcasts(BroadcastId::StreamEnded).is_empty());
}

#[tokio::test]
async fn shutdown_stops_active_session() {
    let h = harness(ScriptedProvider::new(), Arc::new(DisabledLookup));
    h.start("alice").await;

    within("shutdown", h.controller.shutdown()).await.unwrap();

    assert!(!h.provider.is_open(0));
    assert_eq!(
        h.log.state_values(StateId::Status).last().map(String::as_str),
        Some(status::STOPPED)
    );
}
