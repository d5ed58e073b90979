#![allow(clippy::unwrap_used, reason = "test code")]
#![allow(clippy::expect_used, reason = "test code")]

//! Register → list → two-phase bind → unregister driven over a real control
//! socket via `ControlClient`.

mod common;

use moat_daemon::api::types::{CredentialEntry, RegisterRequest};

fn minimal_request(run_id: &str) -> RegisterRequest {
    RegisterRequest {
        run_id: run_id.to_owned(),
        credentials: Vec::new(),
        extra_headers: Vec::new(),
        remove_headers: Vec::new(),
        token_substitutions: Vec::new(),
        mcp_servers: Vec::new(),
        network_policy: String::new(),
        network_allow: Vec::new(),
        grants: Vec::new(),
        aws_config: None,
    }
}

#[tokio::test]
async fn register_then_list_round_trips_run_id_and_credential() {
    let daemon = common::test_daemon().await;

    let mut request = minimal_request("run-abc");
    request.credentials.push(CredentialEntry {
        host: "api.github.com".to_owned(),
        header: "Authorization".to_owned(),
        value: "Bearer ghp_xxx".to_owned(),
        grant: Some("github".to_owned()),
    });

    let registered = daemon.client.register_run(&request).await.expect("register");
    assert!(!registered.auth_token.is_empty());
    assert_eq!(registered.auth_token.len(), 64);
    assert_eq!(registered.proxy_port, 9443);

    let runs = daemon.client.list_runs().await.expect("list");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-abc");
    assert_eq!(runs[0].container_id, "");
}

#[tokio::test]
async fn two_phase_bind_then_list_reflects_container_id() {
    let daemon = common::test_daemon().await;

    let registered = daemon.client.register_run(&minimal_request("run-abc")).await.expect("register");

    daemon
        .client
        .update_run(&registered.auth_token, "ctr-123")
        .await
        .expect("update");

    let runs = daemon.client.list_runs().await.expect("list");
    assert_eq!(runs[0].container_id, "ctr-123");
}

#[tokio::test]
async fn update_run_unknown_token_is_not_found() {
    let daemon = common::test_daemon().await;

    let result = daemon.client.update_run("nonexistent-token", "ctr-123").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unregister_run_twice_second_call_is_not_found() {
    let daemon = common::test_daemon().await;

    let registered = daemon.client.register_run(&minimal_request("run-abc")).await.expect("register");

    daemon.client.unregister_run(&registered.auth_token).await.expect("first removal");
    let second = daemon.client.unregister_run(&registered.auth_token).await;
    assert!(second.is_err());

    let runs = daemon.client.list_runs().await.expect("list");
    assert!(runs.is_empty());
}

#[tokio::test]
async fn routes_without_a_route_table_configured_fail() {
    let daemon = common::test_daemon().await;

    let result = daemon
        .client
        .register_routes("claude", std::collections::HashMap::new())
        .await;
    assert!(result.is_err());
}
