//! HTTP API tests over a seeded store

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

use aoi_review::build_router;
use common::{row, seeded_store};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(body: Body) -> Vec<u8> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body")
        .to_vec()
}

async fn extract_json(body: Body) -> Value {
    serde_json::from_slice(&body_bytes(body).await).expect("Should parse JSON")
}

fn count_for(summary: &Value, outcome: &str) -> i64 {
    summary
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["outcome"] == outcome)
        .and_then(|c| c["count"].as_i64())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "aoi-review");
    assert_eq!(body["generation"], 2);
}

#[tokio::test]
async fn test_list_defects_with_filter() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .oneshot(get("/api/defects?outcome=Real,fixed&component_pn=CAP-0402&page=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total_results"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 100);
    let serials: Vec<&str> = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"]["serial_number"].as_str().unwrap())
        .collect();
    assert_eq!(serials, vec!["SN1", "SN3"]);
}

#[tokio::test]
async fn test_bad_filter_is_400() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .oneshot(get("/api/defects?from=July"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_get_defect_by_key() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .clone()
        .oneshot(get("/api/defects/SN1/R205.1?defect_code=Tombstone"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["outcome"], "Real");
    assert_eq!(body["pass_count"], 2);

    let response = app
        .oneshot(get("/api/defects/SN1/R205.1?defect_code=Missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_summaries() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app.clone().oneshot(get("/api/summary/outcomes")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 4);
    assert_eq!(count_for(&body, "Fixed from previously caught"), 2);
    assert_eq!(count_for(&body, "Suspect"), 0);

    let response = app
        .clone()
        .oneshot(get("/api/summary/top-refs?limit=2"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["limit"], 2);
    assert_eq!(
        body["items"],
        json!([{"label": "C100", "count": 3}, {"label": "R205", "count": 1}])
    );

    let response = app
        .clone()
        .oneshot(get("/api/summary/top-components?outcome=False"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(
        body["items"],
        json!([{"label": "CAP-0402", "count": 1}, {"label": "IC-SOIC8", "count": 1}])
    );

    let response = app
        .oneshot(get("/api/summary/pivot?rows=ref_base&column=outcome&top_components=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["row_dimensions"], json!(["ref_base"]));
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_pivot_dimension_is_400() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .oneshot(get("/api/summary/pivot?rows=colour"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_defects_tsv_and_json() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .clone()
        .oneshot(get("/api/export/defects?serial=SN2&format=tsv"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("defects.tsv"));
    let text = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("SN2\tC100\tMissing\tFalse\t"));

    let response = app
        .oneshot(get("/api/export/defects?serial=SN2&format=json"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_pivot_tsv() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .oneshot(get("/api/export/pivot?rows=component_pn&column=defect_code"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    assert_eq!(
        text,
        "component_pn\tBridge\tMissing\tTombstone\n\
         CAP-0402\t0\t3\t0\n\
         IC-SOIC8\t1\t0\t0\n\
         RES-0603\t0\t0\t1\n"
    );
}

#[tokio::test]
async fn test_ingest_trigger_refreshes_cached_summaries() {
    let store = seeded_store().await;
    let state = store.state();
    let app = build_router(state.clone());

    let response = app.clone().oneshot(get("/api/summary/outcomes")).await.unwrap();
    let before = extract_json(response.into_body()).await;
    assert_eq!(count_for(&before, "Real"), 2);
    assert!(!state.cache.is_empty());

    let day3 = store.export(
        "Defect RawData - 2025-07-03.json",
        json!([row("SN3", "C100", "Missing", "False call", 3, "CAP-0402")]),
    );
    let response = app
        .clone()
        .oneshot(post_json("/api/ingest", json!({ "files": [day3] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = extract_json(response.into_body()).await;
    assert_eq!(report["files"][0]["status"], "applied");

    let response = app.oneshot(get("/api/summary/outcomes")).await.unwrap();
    let after = extract_json(response.into_body()).await;
    assert_eq!(count_for(&after, "Real"), 1);
    assert_eq!(count_for(&after, "False"), 3);
}

#[tokio::test]
async fn test_ingest_without_body_discovers_files() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ingest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = extract_json(response.into_body()).await;
    let statuses: Vec<&str> = report["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["duplicate", "duplicate"]);
}

#[tokio::test]
async fn test_concurrent_ingest_rejected() {
    let store = seeded_store().await;
    let state = store.state();
    let app = build_router(state.clone());

    let _running = state.ingest_lock.lock().await;
    let response = app
        .oneshot(post_json("/api/ingest", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_issue_lifecycle() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/issues",
            json!({
                "date_reported": "2025-07-03",
                "line_name": "L1",
                "ref_id": "R205",
                "issue_category": "Process-related",
                "what_issue": "Tombstoning on R205",
                "snapshot_from": "2025-07-01",
                "snapshot_to": "2025-07-02",
                "created_by": "Dana",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = extract_json(response.into_body()).await;
    assert_eq!(created["status"], "Open");
    assert_eq!(created["aoi"]["real"], 2);
    assert_eq!(created["aoi"]["false"], 2);
    assert_eq!(created["aoi"]["fixed"], 2);
    let id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(patch_json(
            &format!("/api/issues/{}", id),
            json!({"status": "Closed", "root_cause_final": "Uneven paste", "changed_by": "Sam"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = extract_json(response.into_body()).await;
    assert_eq!(updated["status"], "Closed");
    assert_eq!(updated["what_issue"], "Tombstoning on R205");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/issues/{}/changelog", id)))
        .await
        .unwrap();
    let log = extract_json(response.into_body()).await;
    let log = log.as_array().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log
        .iter()
        .any(|c| c["field_name"] == "status" && c["old_value"] == "Open" && c["new_value"] == "Closed"));
    assert_eq!(log[2]["new_value"], "Created");
    assert_eq!(log[2]["changed_by"], "Dana");

    let response = app
        .oneshot(get("/api/issues?status=Closed&line=L1"))
        .await
        .unwrap();
    let listed = extract_json(response.into_body()).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id);
}

#[tokio::test]
async fn test_unknown_issue_is_404() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app.clone().oneshot(get("/api/issues/999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let response = app
        .oneshot(patch_json("/api/issues/999", json!({"status": "Closed"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_issue_status_filter_is_400() {
    let store = seeded_store().await;
    let app = build_router(store.state());

    let response = app.oneshot(get("/api/issues?status=Pending")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
