use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use financial_coach_orchestrator::agent::CoachServices;
use financial_coach_orchestrator::api::create_router;

fn router() -> (Router, Arc<CoachServices>) {
    let services = Arc::new(CoachServices::deterministic());
    (create_router(services.clone()), services)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_llm_availability() {
    let (router, _) = router();
    let (status, body) = send(&router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["llm_available"], false);
}

#[tokio::test]
async fn run_then_replay() {
    let (router, services) = router();
    let (status, body) = send(
        &router,
        post(
            "/agent/run",
            json!({ "input": { "monthly_income": 5000, "monthly_expenses": 4600 } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    let severities: Vec<(String, String)> = data["analysis"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| {
            (
                a["dimension"].as_str().unwrap().to_string(),
                a["severity"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        severities,
        vec![
            ("Savings".to_string(), "high".to_string()),
            ("ExpenseRatio".to_string(), "high".to_string()),
        ]
    );
    assert_eq!(data["trace"]["tools_executed"][0], "input_validation");
    assert_eq!(data["validation"]["valid"], true);

    let run_id = data["run_id"].as_str().unwrap().to_string();
    let memory = tokio_test::assert_ok!(services.runs.replay(&run_id).await);
    assert_eq!(memory.tool_results.len(), 2);

    let (status, body) = send(&router, get(&format!("/agent/replay/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["run_id"], run_id.as_str());
    assert_eq!(body["data"]["context_snapshot"]["total_expenses"], 4600.0);
}

#[tokio::test]
async fn zero_income_yields_single_invalid_finding() {
    let (router, services) = router();
    let (status, body) = send(
        &router,
        post(
            "/agent/run",
            json!({ "input": { "monthly_income": 0, "monthly_expenses": 3000 } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["run_id"], Value::Null);
    assert_eq!(data["analysis"].as_array().unwrap().len(), 1);
    assert_eq!(data["analysis"][0]["dimension"], "Input");
    assert_eq!(data["analysis"][0]["severity"], "invalid");
    assert_eq!(data["trace"]["tools_executed"], json!(["input_validation"]));
    assert!(services.runs.list().await.is_empty());
}

#[tokio::test]
async fn allocation_must_sum_to_one_hundred() {
    let (router, _) = router();
    let (status, body) = send(
        &router,
        post(
            "/agent/run",
            json!({
                "input": {
                    "monthly_income": 5000,
                    "monthly_expenses": 3000,
                    "asset_allocation": [
                        { "asset_class": "Stocks", "allocation_pct": 70 },
                        { "asset_class": "Bonds", "allocation_pct": 20 }
                    ]
                }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["validation"]["valid"], false);
    assert_eq!(
        body["data"]["errors"][0],
        "Asset allocation must sum to 100% (got 90.0%)"
    );
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let (router, _) = router();
    let (status, body) = send(&router, get("/agent/replay/does-not-exist")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn chat_rejects_empty_message() {
    let (router, _) = router();
    let (status, body) = send(&router, post("/agent/chat", json!({ "message": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn chat_asks_for_categories_first() {
    let (router, _) = router();
    let (status, body) = send(
        &router,
        post("/agent/chat", json!({ "message": "Can you analyze my finances?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["message_type"], "clarifying_question");
    assert_eq!(data["expected_schema"], "expense_categories");
    assert_eq!(data["run_id"], Value::Null);
    assert_eq!(data["ui_blocks"][0]["editorType"], "financial_input");
    assert!(data["conversation_id"].as_str().is_some());

    let conversation_id = data["conversation_id"].as_str().unwrap().to_string();
    let (_, body) = send(
        &router,
        post(
            "/agent/chat",
            json!({
                "conversation_id": conversation_id,
                "message": "here it is",
                "input": {
                    "monthly_income": 5000,
                    "expense_categories": [
                        { "category": "Housing", "amount": 1800 },
                        { "category": "Food", "amount": 1600 },
                        { "category": "Transport", "amount": 1200 }
                    ]
                }
            }),
        ),
    )
    .await;

    let data = &body["data"];
    assert_eq!(data["conversation_id"], conversation_id.as_str());
    assert_eq!(data["message_type"], "assistant");
    assert!(data["run_id"].as_str().is_some());
    assert_eq!(data["analysis"].as_array().unwrap().len(), 2);
    assert_eq!(data["trace"]["clarification_attempt"], 0);
}
