//! API integration tests over the in-process router.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;

fn human_campaign_body(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "kind": "human",
        "config": {"service": "prolific"},
        "items": [
            {"dataset": "openweather", "split": "dev", "setup_id": "mistral-7b",
             "example_idx": 0, "batch_idx": 0},
            {"dataset": "openweather", "split": "dev", "setup_id": "mistral-7b",
             "example_idx": 1, "batch_idx": 0},
            {"dataset": "openweather", "split": "dev", "setup_id": "mistral-7b",
             "example_idx": 2, "batch_idx": 1},
        ],
    })
}

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_create_list_and_get_campaign() {
    let fixture = TestFixture::new();

    let response = fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["id"], "crowd-1");
    assert_eq!(response.body["source"], "human");
    assert_eq!(response.body["status"], "idle");

    let response = fixture.get("/api/v1/campaigns").await;
    assert_eq!(response.status, StatusCode::OK);
    let list = response.body.as_array().expect("campaign list");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["stats"]["total"], 2);
    assert_eq!(list[0]["stats"]["free"], 2);

    let response = fixture.get("/api/v1/campaigns/crowd-1").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["stats"]["total"], 2);
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;
    let response = fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_campaign_is_404() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/campaigns/ghost/overview").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_human_assignment_flow() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;

    // First batch goes to the first requester.
    let response = fixture
        .post(
            "/api/v1/campaigns/crowd-1/assign",
            json!({"annotator_id": "annotator-a"}),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["batch"]["batch_idx"], 0);
    assert_eq!(
        response.body["batch"]["examples"].as_array().unwrap().len(),
        2
    );

    // A submission by someone else is rejected without state change.
    let response = fixture
        .post(
            "/api/v1/campaigns/crowd-1/submit",
            json!({"batch_idx": 0, "annotator_id": "annotator-b", "rows": []}),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    // The rightful owner's submission is accepted.
    let response = fixture
        .post(
            "/api/v1/campaigns/crowd-1/submit",
            json!({
                "batch_idx": 0,
                "annotator_id": "annotator-a",
                "rows": [{"example_idx": 0, "annotations": []}],
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["items_finished"], 2);
    assert_eq!(response.body["campaign_finished"], false);

    let response = fixture.get("/api/v1/campaigns/crowd-1/stats").await;
    assert_eq!(response.body["finished"], 1);
    assert_eq!(response.body["free"], 1);

    // Exhaust the pool: second batch, then a closed response.
    let response = fixture
        .post(
            "/api/v1/campaigns/crowd-1/assign",
            json!({"annotator_id": "annotator-b"}),
        )
        .await;
    assert_eq!(response.body["batch"]["batch_idx"], 1);

    let response = fixture
        .post(
            "/api/v1/campaigns/crowd-1/assign",
            json!({"annotator_id": "annotator-c"}),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body["batch"].is_null());
}

#[tokio::test]
async fn test_overview_groups_human_campaign_by_batch() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;

    let response = fixture.get("/api/v1/campaigns/crowd-1/overview").await;
    assert_eq!(response.status, StatusCode::OK);
    let batches = response.body.as_array().expect("batch rows");
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0]["example_cnt"], 2);
    assert_eq!(batches[0]["status"], "free");
}

#[tokio::test]
async fn test_clear_and_delete() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/campaigns", human_campaign_body("crowd-1"))
        .await;
    fixture
        .post(
            "/api/v1/campaigns/crowd-1/assign",
            json!({"annotator_id": "annotator-a"}),
        )
        .await;

    let response = fixture
        .post("/api/v1/campaigns/crowd-1/clear", json!({"idx": 0}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["released"], 2);

    let response = fixture.post("/api/v1/campaigns/crowd-1/clear_all", json!({})).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = fixture.delete("/api/v1/campaigns/crowd-1").await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = fixture.get("/api/v1/campaigns/crowd-1").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_without_model_endpoint_is_rejected() {
    let fixture = TestFixture::new();
    fixture
        .post(
            "/api/v1/campaigns",
            json!({
                "id": "eval-1",
                "kind": "auto_eval",
                "items": [
                    {"dataset": "openweather", "split": "dev",
                     "setup_id": "mistral-7b", "example_idx": 0},
                ],
            }),
        )
        .await;

    // No worker.endpoint in config and no api_url in the campaign config.
    let response = fixture.post("/api/v1/campaigns/eval-1/run", json!({})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pause_without_run_reports_not_live() {
    let fixture = TestFixture::new();
    fixture
        .post(
            "/api/v1/campaigns",
            json!({
                "id": "eval-1",
                "kind": "auto_eval",
                "items": [
                    {"dataset": "openweather", "split": "dev",
                     "setup_id": "mistral-7b", "example_idx": 0},
                ],
            }),
        )
        .await;

    let response = fixture.post("/api/v1/campaigns/eval-1/pause", json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["live"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
}
