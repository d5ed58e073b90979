#![allow(clippy::unwrap_used, reason = "test code")]
#![allow(clippy::expect_used, reason = "test code")]

//! `POST /v1/shutdown` over a real control socket.

mod common;

use std::time::Duration;

#[tokio::test]
async fn shutdown_request_succeeds_and_subsequent_requests_fail() {
    let daemon = common::test_daemon().await;

    daemon.client.health().await.expect("daemon reachable before shutdown");

    daemon.client.shutdown().await.expect("shutdown request accepted");

    // The server waits out its drain period (2s by default) before it stops
    // accepting connections, so give it more than that before checking.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let after = daemon.client.health().await;
    assert!(after.is_err());
}
