//! File routes over real HTTP.

use std::sync::Arc;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use file_gateway::config::GatewayConfig;
use file_gateway::observability::logging::events;
use file_gateway::observability::metrics::BUSINESS_EVENTS_TOTAL;
use file_gateway::observability::SpanStatus;
use file_gateway::storage::MemoryObjectStore;

mod common;

async fn gateway() -> (common::TestServer, common::TestPipeline) {
    let t = common::test_pipeline();
    let server = common::spawn_gateway(
        GatewayConfig::default(),
        Arc::new(MemoryObjectStore::new()),
        t.pipeline.clone(),
    )
    .await;
    (server, t)
}

#[tokio::test]
async fn test_upload_then_download() {
    let (server, _) = gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .put(server.url("/api/files/photos/beach.png"))
        .header(CONTENT_TYPE, "image/png")
        .header("x-uploaded-by", "maria")
        .body(vec![7u8; 2048])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let uploaded: Value = res.json().await.unwrap();
    assert_eq!(uploaded["storageKey"], "beach.png");
    assert_eq!(uploaded["bucket"], "photos");
    assert_eq!(uploaded["contentType"], "image/png");
    assert_eq!(uploaded["sizeBytes"], 2048);
    assert_eq!(uploaded["uploadedBy"], "maria");

    let res = client
        .get(server.url("/api/files/photos/beach.png"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[CONTENT_TYPE], "image/png");
    assert_eq!(res.headers()[CONTENT_LENGTH], "2048");
    assert_eq!(
        res.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"beach.png\""
    );
    assert_eq!(res.bytes().await.unwrap().as_ref(), &[7u8; 2048][..]);

    server.stop().await;
}

#[tokio::test]
async fn test_upload_defaults_uploader_and_content_type() {
    let (server, _) = gateway().await;

    let res = reqwest::Client::new()
        .put(server.url("/api/files/misc/blob"))
        .body("raw")
        .send()
        .await
        .unwrap();
    let uploaded: Value = res.json().await.unwrap();
    assert_eq!(uploaded["uploadedBy"], "anonymous");
    assert_eq!(uploaded["contentType"], "application/octet-stream");

    server.stop().await;
}

#[tokio::test]
async fn test_metadata_and_list() {
    let (server, _) = gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/api/files/docs/missing.txt/metadata"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "NotFound");

    for key in ["b.txt", "a.txt"] {
        client
            .put(server.url(&format!("/api/files/docs/{}", key)))
            .header(CONTENT_TYPE, "text/plain")
            .body("hello")
            .send()
            .await
            .unwrap();
    }

    let meta: Value = client
        .get(server.url("/api/files/docs/a.txt/metadata"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(meta["contentType"], "text/plain");
    assert_eq!(meta["sizeBytes"], 5);
    assert_eq!(meta["uploadedBy"], "unknown");

    let listed: Vec<Value> = client
        .get(server.url("/api/files/docs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let keys: Vec<_> = listed.iter().map(|f| f["storageKey"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["a.txt", "b.txt"]);

    let res = client.get(server.url("/api/files/empty")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "StorageFailure");

    server.stop().await;
}

#[tokio::test]
async fn test_delete_then_not_found() {
    let (server, _) = gateway().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/api/files/tmp/scratch"))
        .body("x")
        .send()
        .await
        .unwrap();

    let res = client.delete(server.url("/api/files/tmp/scratch")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = client.delete(server.url("/api/files/tmp/scratch")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = client.get(server.url("/api/files/tmp/scratch")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_encoded_slash_in_key() {
    let (server, _) = gateway().await;
    let client = reqwest::Client::new();

    client
        .put(server.url("/api/files/reports/2024%2Fq1.csv"))
        .body("a,b")
        .send()
        .await
        .unwrap();
    let meta: Value = client
        .get(server.url("/api/files/reports/2024%2Fq1.csv/metadata"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(meta["storageKey"], "2024/q1.csv");

    server.stop().await;
}

#[tokio::test]
async fn test_chunked_upload_without_length_is_rejected() {
    let (server, _) = gateway().await;

    let mut conn = TcpStream::connect(server.addr).await.unwrap();
    conn.write_all(
        b"PUT /api/files/b/k HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
    )
    .await
    .unwrap();
    let mut raw = String::new();
    conn.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 400"), "unexpected response: {}", raw);
    assert!(raw.contains("Content-Length"));

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let t = common::test_pipeline();
    let mut config = GatewayConfig::default();
    config.security.max_body_size = 16;
    let server = common::spawn_gateway(config, Arc::new(MemoryObjectStore::new()), t.pipeline.clone()).await;

    let res = reqwest::Client::new()
        .put(server.url("/api/files/b/big"))
        .body(vec![0u8; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    server.stop().await;
}

#[tokio::test]
async fn test_request_id_propagates() {
    let (logs, _guard) = common::capture_logs();
    let (server, _) = gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/api/files/none/thing/metadata"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");

    let res = client
        .get(server.url("/api/files/none/thing/metadata"))
        .send()
        .await
        .unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());

    let starts = logs
        .for_operation("GET /api/files/{bucket}/{key}/metadata")
        .into_iter()
        .filter(|e| e.event() == Some(events::START))
        .collect::<Vec<_>>();
    assert_eq!(starts.len(), 2);
    assert!(starts[0].field("args").unwrap().contains("req-42"));
    assert!(starts[1].field("args").unwrap().contains(&generated));

    server.stop().await;
}

#[tokio::test]
async fn test_forwarded_client_ip_is_logged() {
    let (logs, _guard) = common::capture_logs();
    let (server, _) = gateway().await;

    reqwest::Client::new()
        .get(server.url("/api/files/any?prefix=x"))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("user-agent", "curl/8.4.0")
        .send()
        .await
        .unwrap();

    let start = logs
        .for_operation("GET /api/files/{bucket}")
        .into_iter()
        .find(|e| e.event() == Some(events::START))
        .unwrap();
    let args = start.field("args").unwrap();
    assert!(args.starts_with("[GET, /api/files/any, prefix=x, 203.0.113.7, curl/8.4.0, "));
    assert!(!args.contains("10.0.0.1"));

    server.stop().await;
}

#[tokio::test]
async fn test_route_span_parents_storage_span() {
    let (logs, _guard) = common::capture_logs();
    let (server, t) = gateway().await;

    reqwest::Client::new()
        .put(server.url("/api/files/nest/leaf.txt"))
        .body("leaf")
        .send()
        .await
        .unwrap();
    server.stop().await;

    let route = &t.spans.named("PUT /api/files/{bucket}/{key}")[0];
    let storage = &t.spans.named("storage.upload")[0];
    assert_eq!(storage.parent, Some(route.id));
    assert_eq!(route.status, SpanStatus::Success);
    assert_eq!(route.tag("http.status_code"), Some("200"));
    assert_eq!(storage.tag("storage.bucket"), Some("nest"));

    let route_start = &logs.for_operation("PUT /api/files/{bucket}/{key}")[0];
    let storage_start = &logs.for_operation("storage.upload")[0];
    assert_eq!(
        storage_start.field("parent_correlation_id"),
        route_start.field("correlation_id")
    );
}

#[tokio::test]
async fn test_error_response_reported_as_failure() {
    let (logs, _guard) = common::capture_logs();
    let (server, t) = gateway().await;

    let res = reqwest::Client::new()
        .delete(server.url("/api/files/ghost/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    server.stop().await;

    let route = &t.spans.named("DELETE /api/files/{bucket}/{key}")[0];
    assert_eq!(route.status, SpanStatus::Error);
    assert_eq!(route.tag("error.type"), Some("NotFound"));

    let error = logs
        .for_operation("DELETE /api/files/{bucket}/{key}")
        .into_iter()
        .find(|e| e.event() == Some(events::ERROR))
        .unwrap();
    assert_eq!(error.field("error_kind"), Some("NotFound"));
    assert!(error.field("error").unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_exists_route() {
    let (server, t) = gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/api/files/album/cover.jpg/exists"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!res.json::<bool>().await.unwrap());

    client
        .put(server.url("/api/files/album/cover.jpg"))
        .body("jpeg")
        .send()
        .await
        .unwrap();
    let exists: bool = client
        .get(server.url("/api/files/album/cover.jpg/exists"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(exists);
    server.stop().await;

    let routes = t.spans.named("GET /api/files/{bucket}/{key}/exists");
    assert_eq!(routes.len(), 2);
    assert!(routes.iter().all(|s| s.status == SpanStatus::Success));
    let storage = t.spans.named("storage.exists");
    assert_eq!(storage.len(), 2);
    assert_eq!(storage[1].parent, Some(routes[1].id));
}

#[tokio::test]
async fn test_route_span_carries_caller_and_entity() {
    let (server, t) = gateway().await;

    reqwest::Client::new()
        .put(server.url("/api/files/ledger/q3.csv"))
        .header("x-user-id", "u-19")
        .header("x-tenant-id", "acme")
        .header("x-request-id", "req-900")
        .body("a,b")
        .send()
        .await
        .unwrap();
    reqwest::Client::new()
        .get(server.url("/api/files/ledger"))
        .send()
        .await
        .unwrap();
    server.stop().await;

    let upload = &t.spans.named("PUT /api/files/{bucket}/{key}")[0];
    assert_eq!(upload.tag("user.id"), Some("u-19"));
    assert_eq!(upload.tag("tenant.id"), Some("acme"));
    assert_eq!(upload.tag("request.id"), Some("req-900"));
    assert_eq!(upload.tag("entity.type"), Some("file"));
    assert_eq!(upload.tag("entity.id"), Some("ledger/q3.csv"));

    let list = &t.spans.named("GET /api/files/{bucket}")[0];
    assert!(list.tag("user.id").is_none());
    assert!(list.tag("request.id").is_some());
    assert_eq!(list.tag("entity.type"), Some("bucket"));
    assert_eq!(list.tag("entity.id"), Some("ledger"));

    let storage = &t.spans.named("storage.upload")[0];
    assert_eq!(storage.tag("service.name"), Some("memory"));
    assert_eq!(storage.tag("span.kind"), Some("client"));
}

#[tokio::test]
async fn test_business_events_follow_successful_routes() {
    let (server, t) = gateway().await;
    let client = reqwest::Client::new();

    client.put(server.url("/api/files/inbox/a")).body("1").send().await.unwrap();
    client.get(server.url("/api/files/inbox/a")).send().await.unwrap();
    client.get(server.url("/api/files/inbox/missing")).send().await.unwrap();
    client.delete(server.url("/api/files/inbox/a")).send().await.unwrap();
    client.delete(server.url("/api/files/inbox/a")).send().await.unwrap();
    server.stop().await;

    let count = |event| {
        t.metrics.counter(
            BUSINESS_EVENTS_TOTAL,
            &[("event_type", event), ("category", "files")],
        )
    };
    assert_eq!(count("file_uploaded"), 1);
    assert_eq!(count("file_downloaded"), 1);
    assert_eq!(count("file_deleted"), 1);
}
