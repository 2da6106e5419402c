//! HTTP health probes against an in-process axum server

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use mapcheck_common::ErrorKind;
use mapcheck_e2e::commands::{EndpointCheck, HealthCheckCommand, HealthCheckOptions};
use mapcheck_e2e::{Command, CommandConfig, RunOptions, Runner, TestContext};

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Html("<html><title>Map</title></html>") }))
        .route("/health", get(|| async { "ok" }))
        .route("/api/routes", get(|| async { Json(json!([])) }))
        .route("/api/hazards", get(|| async { Json(json!([])) }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "late"
            }),
        )
        .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn command(endpoints: Vec<EndpointCheck>) -> HealthCheckCommand {
    HealthCheckCommand::new(
        "health-check",
        HealthCheckOptions {
            main_path: Some("/".to_string()),
            endpoints,
        },
        CommandConfig {
            timeout_ms: 5_000,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn production_health_preset_passes_against_healthy_server() {
    let addr = serve().await;
    let tmp = TempDir::new().unwrap();

    let report = Runner::default()
        .run(
            RunOptions {
                preset: "production-health".into(),
                base_url: format!("http://{}", addr),
                artifacts_dir: tmp.path().to_path_buf(),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert!(report.success, "errors: {:?}", report.summary.errors);
    let health = &report.results[0];
    assert_eq!(health.metadata["healthy"], true);
    assert_eq!(health.metadata["endpoints"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn status_and_content_type_mismatches_fail() {
    let addr = serve().await;
    let ctx = TestContext::new(format!("http://{}", addr), "unused");

    let result = command(vec![
        EndpointCheck::new("/broken"),
        EndpointCheck::new("/health").with_content_type("json"),
    ])
    .run(&ctx)
    .await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("returned status 500 (expected 200)"));
    assert!(result.errors[1].contains("content type"));
    assert_eq!(result.error_kind, Some(ErrorKind::Other));
    assert_eq!(result.metadata["healthy"], false);
}

#[tokio::test]
async fn slow_endpoint_is_a_performance_failure() {
    let addr = serve().await;
    let ctx = TestContext::new(format!("http://{}", addr), "unused");

    let result = command(vec![EndpointCheck::new("/slow").with_max_response_ms(50)])
        .run(&ctx)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Performance));
    assert!(result.errors[0].contains("threshold 50 ms"));
}

#[tokio::test]
async fn unreachable_server_is_a_network_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let ctx = TestContext::new(format!("http://{}", addr), "unused");
    let result = HealthCheckCommand::new(
        "health-check",
        HealthCheckOptions::default(),
        CommandConfig {
            timeout_ms: 2_000,
            retries: 1,
            retry_delay_ms: 1,
            ..Default::default()
        },
    )
    .run(&ctx)
    .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Network));
    assert!(result.errors[0].contains("unreachable"));
}

/// Drops the first connection, then answers every request with 200
async fn serve_after_one_reset() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = Vec::new();
                while !read.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    )
                    .await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn retry_backoff_does_not_count_toward_response_budget() {
    let addr = serve_after_one_reset().await;
    let ctx = TestContext::new(format!("http://{}", addr), "unused");

    let result = HealthCheckCommand::new(
        "health-check",
        HealthCheckOptions {
            main_path: None,
            endpoints: vec![EndpointCheck::new("/health").with_max_response_ms(250)],
        },
        CommandConfig {
            timeout_ms: 5_000,
            retries: 2,
            retry_delay_ms: 400,
            ..Default::default()
        },
    )
    .run(&ctx)
    .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.duration_ms >= 400);
    let probe = &result.metadata["endpoints"][0];
    assert_eq!(probe["status"], 200);
    assert!(probe["durationMs"].as_u64().unwrap() < 250);
}

#[tokio::test]
async fn client_timeout_is_a_timeout_failure() {
    let addr = serve().await;
    let ctx = TestContext::new(format!("http://{}", addr), "unused");

    let result = HealthCheckCommand::new(
        "health-check",
        HealthCheckOptions {
            main_path: None,
            endpoints: vec![EndpointCheck::new("/slow")],
        },
        CommandConfig {
            timeout_ms: 100,
            ..Default::default()
        },
    )
    .run(&ctx)
    .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.errors[0].contains("timed out"));
}
