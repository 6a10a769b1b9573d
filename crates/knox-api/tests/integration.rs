//! Integration tests: policies, supersede, selector, logs, summaries, ingest.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use knox_api::server::{self, AppState};
use knox_db::SqliteBackend;
use knox_ingest::QueueIngestor;
use knox_store::StoreRouter;
use knox_types::Backend;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn app_with(store: StoreRouter) -> axum::Router {
    let store = Arc::new(store);
    store.ensure_schema().await;
    let ingestor = Arc::new(QueueIngestor::new(Arc::clone(&store)));
    server::router(Arc::new(AppState { store, ingestor }))
}

async fn test_app() -> axum::Router {
    let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
    app_with(StoreRouter::new(Some(backend))).await
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> Value {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn network_policy(name: &str, app_label: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "KnoxNetworkPolicy",
        "flow_ids": [1],
        "metadata": {
            "name": name,
            "namespace": "ns1",
            "cluster_name": "c1",
            "type": "egress",
            "status": "latest"
        },
        "spec": {
            "selector": { "matchLabels": { "app": app_label } },
            "egress": [],
            "ingress": [],
            "action": "allow"
        },
        "generatedTime": 1700000000
    })
}

fn system_policy(name: &str, app_label: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "KubeArmorPolicy",
        "metadata": {
            "name": name,
            "namespace": "ns1",
            "cluster_name": "c1",
            "type": "system",
            "status": "latest"
        },
        "spec": {
            "severity": 5,
            "selector": { "matchLabels": { "app": app_label } },
            "file": { "matchPaths": [{ "path": "/etc/shadow" }] },
            "action": "Block"
        },
        "generatedTime": 1700000000
    })
}

#[tokio::test]
async fn health() {
    let app = test_app().await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn insert_then_supersede_then_filter_by_status() {
    let app = test_app().await;
    let j = call(
        &app,
        "POST",
        "/policies/network",
        Some(json!([network_policy("p1", "web"), network_policy("p2", "web")])),
    )
    .await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["outcomes"].as_array().unwrap().len(), 2);
    assert_eq!(j["data"]["outcomes"][0]["outcome"], "written");

    let j = call(
        &app,
        "POST",
        "/policies/supersede",
        Some(json!({
            "kind": "network",
            "outdated": { "cluster": "c1", "namespace": "ns1", "name": "p1" },
            "latest": { "cluster": "c1", "namespace": "ns1", "name": "p2" }
        })),
    )
    .await;
    assert_eq!(j["code"], 200);

    let j = call(&app, "GET", "/policies/network?status=latest", None).await;
    let latest = j["data"].as_array().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["metadata"]["name"], "p2");

    let j = call(&app, "GET", "/policies/network?status=outdated", None).await;
    let outdated = j["data"].as_array().unwrap();
    assert_eq!(outdated.len(), 1);
    assert_eq!(outdated[0]["metadata"]["name"], "p1");
    assert_eq!(outdated[0]["outdated"], "p2");
}

#[tokio::test]
async fn supersede_missing_policy_is_not_found() {
    let app = test_app().await;
    let j = call(
        &app,
        "POST",
        "/policies/supersede",
        Some(json!({
            "kind": "system",
            "outdated": { "cluster": "c1", "namespace": "ns1", "name": "a" },
            "latest": { "cluster": "c1", "namespace": "ns1", "name": "b" }
        })),
    )
    .await;
    assert_eq!(j["code"], 404);
}

#[tokio::test]
async fn duplicate_insert_is_reported_per_item() {
    let app = test_app().await;
    let j = call(
        &app,
        "POST",
        "/policies/network",
        Some(json!([network_policy("p1", "web"), network_policy("p1", "web")])),
    )
    .await;
    assert_eq!(j["data"]["outcomes"][0]["outcome"], "written");
    assert_eq!(j["data"]["outcomes"][1]["outcome"], "failed");
    assert_eq!(j["data"]["outcomes"][1]["key"]["name"], "p1");
}

#[tokio::test]
async fn selector_filters_network_policies() {
    let app = test_app().await;
    call(
        &app,
        "POST",
        "/policies/network",
        Some(json!([network_policy("web", "web"), network_policy("db", "db")])),
    )
    .await;
    let j = call(
        &app,
        "POST",
        "/policies/network/selector",
        Some(json!({ "selector": { "app": "db" } })),
    )
    .await;
    let data = j["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["metadata"]["name"], "db");
}

#[tokio::test]
async fn ingest_flows_then_query_logs_and_cursors() {
    let app = test_app().await;
    let j = call(
        &app,
        "POST",
        "/ingest",
        Some(json!({
            "kind": "flows",
            "records": [
                { "id": 1, "cluster_name": "c1", "source_namespace": "ns1", "source_pod_name": "client", "verdict": "FORWARDED" },
                { "id": 2, "cluster_name": "c1", "source_namespace": "ns1", "source_pod_name": "client", "verdict": "FORWARDED" },
                { "id": 3, "cluster_name": "c1", "source_namespace": "ns1", "source_pod_name": "client", "verdict": "DROPPED" }
            ]
        })),
    )
    .await;
    assert_eq!(j["code"], 200);
    let job_id = j["data"]["job_id"].as_str().unwrap().to_string();

    let mut status = Value::Null;
    for _ in 0..200 {
        let j = call(&app, "GET", &format!("/ingest/status?job_id={}", job_id), None).await;
        status = j["data"]["status"].clone();
        if status == "done" || status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, "done");

    let j = call(&app, "GET", "/ingest/cursors", None).await;
    assert_eq!(j["data"]["last_flow_id"], 3);

    let j = call(
        &app,
        "POST",
        "/logs/network",
        Some(json!({ "filter": { "verdict": "FORWARDED" }, "page": { "offset": 0, "limit": 10 } })),
    )
    .await;
    assert_eq!(j["data"]["total"], 1);
    assert_eq!(j["data"]["events"][0]["count"], 2);

    let j = call(&app, "POST", "/logs/pods", Some(json!({ "kind": "network" }))).await;
    assert_eq!(j["data"], json!(["client"]));
}

#[tokio::test]
async fn ingest_status_requires_known_job() {
    let app = test_app().await;
    let j = call(&app, "GET", "/ingest/status", None).await;
    assert_eq!(j["code"], 400);
    let j = call(&app, "GET", "/ingest/status?job_id=missing", None).await;
    assert_eq!(j["code"], 404);
}

#[tokio::test]
async fn unconfigured_store_reads_empty() {
    let app = app_with(StoreRouter::unconfigured()).await;
    let j = call(&app, "GET", "/policies/system", None).await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"], json!([]));

    let j = call(&app, "POST", "/summary", Some(json!({}))).await;
    assert_eq!(j["data"], json!([]));

    let j = call(&app, "POST", "/logs/system", Some(json!({}))).await;
    assert_eq!(j["data"]["total"], 0);
}

#[tokio::test]
async fn system_policies_insert_select_and_supersede() {
    let app = test_app().await;
    let j = call(
        &app,
        "POST",
        "/policies/system",
        Some(json!([system_policy("s1", "web"), system_policy("s2", "db")])),
    )
    .await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["outcomes"][1]["outcome"], "written");

    let j = call(&app, "GET", "/policies/system?cluster=c1", None).await;
    assert_eq!(j["data"].as_array().unwrap().len(), 2);

    let j = call(
        &app,
        "POST",
        "/policies/system/selector",
        Some(json!({ "selector": { "app": "db" } })),
    )
    .await;
    let data = j["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["metadata"]["name"], "s2");
    assert_eq!(data[0]["spec"]["action"], "Block");

    let j = call(
        &app,
        "POST",
        "/policies/supersede",
        Some(json!({
            "kind": "system",
            "outdated": { "cluster": "c1", "namespace": "ns1", "name": "s1" },
            "latest": { "cluster": "c1", "namespace": "ns1", "name": "s2" }
        })),
    )
    .await;
    assert_eq!(j["code"], 200);

    let j = call(&app, "GET", "/policies/system?status=outdated", None).await;
    let outdated = j["data"].as_array().unwrap();
    assert_eq!(outdated.len(), 1);
    assert_eq!(outdated[0]["metadata"]["name"], "s1");
    assert_eq!(outdated[0]["outdated"], "s2");

    let j = call(&app, "GET", "/policies/network", None).await;
    assert_eq!(j["data"], json!([]));
}
