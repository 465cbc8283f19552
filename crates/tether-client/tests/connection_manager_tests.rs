//! Connection manager behaviour against the scripted mock transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{echo_args, mock_manager, request};
use pretty_assertions::assert_eq;
use tether_client::{
    ConnectionEvent, ConnectionEventKind, ConnectionState, ErrorKind, ManagerConfig, TetherError,
    ToolArguments,
};
use tokio::sync::broadcast;

/// Health monitor and staleness checks pushed far out of the way.
fn quiet_config() -> ManagerConfig {
    ManagerConfig {
        health_check_interval: Duration::from_secs(3600),
        freshness_window: Duration::from_secs(3600),
        very_stale_after: Duration::from_secs(3600),
        ..ManagerConfig::default()
    }
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn label(kind: &ConnectionEventKind) -> &'static str {
    match kind {
        ConnectionEventKind::Connecting { .. } => "connecting",
        ConnectionEventKind::Connected { .. } => "connected",
        ConnectionEventKind::Disconnected { .. } => "disconnected",
        ConnectionEventKind::HealthCheck { .. } => "health_check",
        ConnectionEventKind::ToolsListUpdated { .. } => "tools_list_updated",
        ConnectionEventKind::ToolCallStarted { .. } => "tool_call_started",
        ConnectionEventKind::ToolCallCompleted { .. } => "tool_call_completed",
        ConnectionEventKind::ToolCallFailed { .. } => "tool_call_failed",
    }
}

fn drain(events: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<&'static str> {
    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        labels.push(label(&event.kind));
    }
    labels
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let (manager, server) = mock_manager(quiet_config());
    server.set_connect_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        manager.connect(request("mock://one")),
        manager.connect(request("mock://one"))
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(server.connects(), 1);
    assert_eq!(server.live(), 1);

    // Already connected: no new transport
    manager.connect(request("mock://one")).await.unwrap();
    assert_eq!(server.connects(), 1);
    assert_eq!(manager.status().generation, 1);
    assert_eq!(manager.status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_recovers_after_periodic_tick() {
    let config = ManagerConfig {
        recovery_interval: Duration::from_secs(60),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.init().unwrap();
    let mut events = manager.subscribe();

    server.set_reachable(false);
    for _ in 0..3 {
        let err = manager.connect(request("mock://flaky")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
    }
    assert_eq!(manager.status().failures.consecutive_failures, 3);
    assert_eq!(
        drain(&mut events),
        vec![
            "connecting",
            "disconnected",
            "connecting",
            "disconnected",
            "connecting",
            "disconnected"
        ]
    );

    // One recovery tick
    tokio::time::sleep(Duration::from_secs(61)).await;
    let status = manager.status();
    assert_eq!(status.failures.consecutive_failures, 2);
    assert!(status.failures.last_error.is_some());

    server.set_reachable(true);
    manager.connect(request("mock://flaky")).await.unwrap();
    let status = manager.status();
    assert_eq!(status.failures.consecutive_failures, 0);
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_fails_fast_until_recovery() {
    let config = ManagerConfig {
        max_consecutive_failures: 2,
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    server.set_reachable(false);

    manager.connect(request("mock://down")).await.unwrap_err();
    manager.connect(request("mock://down")).await.unwrap_err();
    assert_eq!(manager.status().state, ConnectionState::PermanentlyFailed);

    let err = manager.connect(request("mock://down")).await.unwrap_err();
    assert_eq!(
        err,
        TetherError::RetryBudgetExhausted {
            failures: 2,
            limit: 2
        }
    );
    assert_eq!(server.connects(), 2);

    manager.reset_for_recovery();
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.failures.consecutive_failures, 1);

    server.set_reachable(true);
    manager.connect(request("mock://down")).await.unwrap();
    assert_eq!(manager.status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_clears_permanent_failure() {
    let config = ManagerConfig {
        max_consecutive_failures: 1,
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    server.set_reachable(false);
    manager.connect(request("mock://down")).await.unwrap_err();
    assert_eq!(manager.status().state, ConnectionState::PermanentlyFailed);

    server.set_reachable(true);
    manager.force_reconnect(None).await.unwrap();
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.failures.consecutive_failures, 0);
    assert_eq!(status.failures.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_reset_failure_state_is_full_reset() {
    let (manager, server) = mock_manager(quiet_config());
    server.set_reachable(false);
    manager.connect(request("mock://down")).await.unwrap_err();
    manager.connect(request("mock://down")).await.unwrap_err();

    manager.reset_failure_state();
    let failures = manager.status().failures;
    assert_eq!(failures.consecutive_failures, 0);
    assert!(failures.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_never_overlaps_sessions() {
    let (manager, server) = mock_manager(quiet_config());
    manager.connect(request("mock://one")).await.unwrap();

    manager
        .force_reconnect(Some("mock://two".into()))
        .await
        .unwrap();
    assert_eq!(manager.status().target.unwrap().uri, "mock://two");

    // Switching target through a plain connect also tears down first
    manager.connect(request("mock://three")).await.unwrap();

    assert_eq!(server.connects(), 3);
    assert_eq!(server.peak_live(), 1);
    assert_eq!(server.live(), 1);
    assert_eq!(server.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_close_does_not_hang_reconnect() {
    let (manager, server) = mock_manager(quiet_config());
    manager.connect(request("mock://one")).await.unwrap();
    server.set_close_hangs(true);

    let started = tokio::time::Instant::now();
    manager
        .force_reconnect(Some("mock://two".into()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Waited out close_timeout, then moved on
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "elapsed {elapsed:?}");
    assert_eq!(manager.status().state, ConnectionState::Connected);
    assert_eq!(manager.status().target.unwrap().uri, "mock://two");
    assert_eq!(server.closes(), 0);
    assert_eq!(server.connects(), 2);
    assert_eq!(server.live(), 1);
    assert_eq!(server.peak_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_connect_times_out_and_counts_as_failure() {
    let (manager, server) = mock_manager(quiet_config());
    server.set_connect_hangs(true);

    let err = manager.connect(request("mock://one")).await.unwrap_err();
    match &err {
        TetherError::Timeout { operation, timeout } => {
            assert_eq!(operation, "connect");
            assert_eq!(*timeout, Duration::from_secs(10));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Timeout);
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.failures.consecutive_failures, 1);
    assert_eq!(server.live(), 0);

    server.set_connect_hangs(false);
    manager.connect(request("mock://one")).await.unwrap();
    assert_eq!(manager.status().failures.consecutive_failures, 0);
    assert_eq!(server.connects(), 2);
    assert_eq!(server.peak_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_attempt_cannot_clobber_newer_one() {
    let (manager, server) = mock_manager(quiet_config());
    server.set_connect_delay(Duration::from_secs(10));

    let slow = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(request("mock://slow")).await })
    };
    settle().await;
    assert_eq!(manager.status().state, ConnectionState::Connecting);

    server.set_connect_delay(Duration::ZERO);
    manager
        .force_reconnect(Some("mock://fast".into()))
        .await
        .unwrap();

    assert_eq!(slow.await.unwrap().unwrap_err(), TetherError::Superseded);
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.target.unwrap().uri, "mock://fast");
    assert_eq!(status.generation, 2);
    assert_eq!(server.peak_live(), 1);
    assert_eq!(server.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tool_error_keeps_connection() {
    let (manager, server) = mock_manager(quiet_config());
    manager.connect(request("mock://tools")).await.unwrap();

    let err = manager
        .call_tool("does_not_exist", ToolArguments::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tool);
    assert!(manager.is_connected());
    assert_eq!(manager.status().state, ConnectionState::Connected);
    assert_eq!(server.connects(), 1);

    let result = manager.call_tool("echo", echo_args("still here")).await.unwrap();
    assert_eq!(result.text(), "still here");
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_marks_disconnected_immediately() {
    let (manager, server) = mock_manager(quiet_config());
    manager.connect(request("mock://tools")).await.unwrap();

    server.set_drop_calls(true);
    let err = manager
        .call_tool("echo", echo_args("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!manager.is_connected());
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
    // A call failure is not a connect failure
    assert_eq!(manager.status().failures.consecutive_failures, 0);

    // The next caller reconnects instead of reusing the dead handle
    server.set_drop_calls(false);
    let result = manager.call_tool("echo", echo_args("back")).await.unwrap();
    assert_eq!(result.text(), "back");
    assert_eq!(server.connects(), 2);
    assert_eq!(server.peak_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_primitives_cache() {
    let config = ManagerConfig {
        primitives_ttl: Duration::from_secs(60),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.connect(request("mock://cache")).await.unwrap();

    let first = manager.get_primitives(false).await.unwrap();
    let second = manager.get_primitives(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(server.list_calls(), 1);
    assert_eq!(first.len(), 2);
    assert_eq!(first.tools().count(), 1);

    let forced = manager.get_primitives(true).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &forced));
    assert_eq!(server.list_calls(), 2);

    // Reconnecting invalidates even within the TTL
    manager.force_reconnect(None).await.unwrap();
    manager.get_primitives(false).await.unwrap();
    assert_eq!(server.list_calls(), 3);

    // Expiry
    tokio::time::advance(Duration::from_secs(61)).await;
    manager.get_primitives(false).await.unwrap();
    assert_eq!(server.list_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_health_checks_degrade_then_disconnect_and_stop() {
    let config = ManagerConfig {
        health_check_interval: Duration::from_secs(30),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.connect(request("mock://health")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(manager.status().state, ConnectionState::Connected);
    assert!(server.health_checks() > 0);

    server.set_healthy(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(manager.status().state, ConnectionState::Degraded);
    assert!(manager.is_connected());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
    assert!(!manager.is_connected());
    settle().await;
    assert_eq!(server.live(), 0);

    // The monitor stopped with the connection
    let checks = server.health_checks();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(server.health_checks(), checks);
}

#[tokio::test(start_paused = true)]
async fn test_passing_check_restores_degraded_connection() {
    let config = ManagerConfig {
        health_check_interval: Duration::from_secs(30),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.connect(request("mock://health")).await.unwrap();

    server.set_healthy(false);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(manager.status().state, ConnectionState::Degraded);

    server.set_healthy(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(manager.status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_very_stale_status_triggers_one_background_check() {
    let config = ManagerConfig {
        very_stale_after: Duration::from_secs(10),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.connect(request("mock://stale")).await.unwrap();
    assert!(manager.is_connected());
    settle().await;
    assert_eq!(server.health_checks(), 0);

    tokio::time::advance(Duration::from_secs(11)).await;
    server.set_healthy(false);
    // Answers immediately with the current state
    assert!(manager.is_connected());
    assert!(manager.is_connected());
    settle().await;
    assert_eq!(server.health_checks(), 1);
    assert_eq!(manager.status().state, ConnectionState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_stale_connection_is_rebuilt_before_use() {
    let config = ManagerConfig {
        freshness_window: Duration::from_secs(10),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.connect(request("mock://fresh")).await.unwrap();

    manager.call_tool("echo", echo_args("a")).await.unwrap();
    assert_eq!(server.connects(), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    manager.call_tool("echo", echo_args("b")).await.unwrap();
    assert_eq!(server.connects(), 2);
    assert_eq!(server.peak_live(), 1);
    assert_eq!(manager.status().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_forgets_request() {
    let (manager, server) = mock_manager(quiet_config());
    manager.connect(request("mock://bye")).await.unwrap();

    manager.disconnect().await;
    assert_eq!(server.live(), 0);
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.target.is_none());

    let err = manager
        .call_tool("echo", echo_args("x"))
        .await
        .unwrap_err();
    assert_eq!(err, TetherError::NotConnected);
    assert_eq!(server.connects(), 1);

    // Disconnecting twice is harmless
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events() {
    let (manager, _server) = mock_manager(quiet_config());
    let mut events = manager.subscribe();

    manager.connect(request("mock://events")).await.unwrap();
    manager.call_tool("echo", echo_args("x")).await.unwrap();
    manager
        .call_tool("nope", ToolArguments::new())
        .await
        .unwrap_err();
    manager.get_primitives(false).await.unwrap();
    manager.disconnect().await;

    assert_eq!(
        drain(&mut events),
        vec![
            "connecting",
            "connected",
            "tool_call_started",
            "tool_call_completed",
            "tool_call_started",
            "tool_call_failed",
            "tools_list_updated",
            "disconnected"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_carry_transport_and_error() {
    let (manager, server) = mock_manager(quiet_config());
    let mut events = manager.subscribe();
    server.set_reachable(false);
    manager.connect(request("mock://down")).await.unwrap_err();

    let connecting = events.try_recv().unwrap();
    assert_eq!(connecting.transport, Some(common::TRANSPORT));
    let disconnected = events.try_recv().unwrap();
    match disconnected.kind {
        ConnectionEventKind::Disconnected { error: Some(error) } => {
            assert!(error.contains("connection refused"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_uri_is_configuration_error() {
    let (manager, server) = mock_manager(quiet_config());
    let err = manager
        .connect(request("http://localhost/mcp"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(server.connects(), 0);
    assert_eq!(manager.status().failures.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_and_stops_timers() {
    let config = ManagerConfig {
        health_check_interval: Duration::from_secs(30),
        ..quiet_config()
    };
    let (manager, server) = mock_manager(config);
    manager.init().unwrap();
    manager.connect(request("mock://end")).await.unwrap();

    manager.shutdown().await;
    assert_eq!(server.live(), 0);
    assert!(!manager.is_connected());

    let checks = server.health_checks();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.health_checks(), checks);

    let err = manager.connect(request("mock://end")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(server.connects(), 1);
}
