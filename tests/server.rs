mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine};
use common::*;
use ethers::types::Address;
use relayer::server::router;
use relayer::*;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "relayer-test-boundary";

fn multipart_body(parts: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        if *name == "emlFile" {
            body.push_str(
                "Content-Disposition: form-data; name=\"emlFile\"; filename=\"mail.eml\"\r\n\
                 Content-Type: message/rfc822\r\n\r\n",
            );
        } else {
            body.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"));
        }
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn multipart_request(uri: &str, parts: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn send(harness: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(harness.pipeline.clone(), 1024 * 1024)
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn uploaded_email_is_verified() {
    let harness = Harness::happy_path();
    let request =
        multipart_request("/generate-proof/alice@example.com", &[("emlFile", ALICE_EMAIL)]);
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Verification successful");
    assert_eq!(body["receipt"]["confirmations"], 2);
    assert_eq!(body["txHash"], body["receipt"]["txHash"]);
    assert_eq!(body["proofResult"]["schemaVersion"], 1);
    assert_eq!(body["requestId"].as_str().unwrap().len(), 64);
    assert_eq!(harness.ledger.broadcast_count(), 1);
}

#[tokio::test]
async fn uploaded_contract_addresses_are_used() {
    let harness = Harness::happy_path();
    let request = multipart_request(
        "/generate-proof/alice@example.com",
        &[
            ("emlFile", ALICE_EMAIL),
            ("proverAddress", "0x0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b"),
            ("verifierAddress", "0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c"),
        ],
    );
    let (status, _) = send(&harness, request).await;

    assert_eq!(status, StatusCode::OK);
    let calls = harness.prover.calls.lock().unwrap();
    assert_eq!(calls[0].target, Address::repeat_byte(0x0b));
    let broadcasts = harness.ledger.broadcasts.lock().unwrap();
    assert_eq!(broadcasts[0].target, Address::repeat_byte(0x0c));
}

#[tokio::test]
async fn malformed_contract_address_is_rejected() {
    let harness = Harness::happy_path();
    let request = multipart_request(
        "/generate-proof/alice@example.com",
        &[("emlFile", ALICE_EMAIL), ("verifierAddress", "0xnope")],
    );
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
    assert_eq!(harness.prover.submits(), 0);
}

#[tokio::test]
async fn upload_without_email_file_is_rejected() {
    let harness = Harness::happy_path();
    let request = multipart_request(
        "/generate-proof/alice@example.com",
        &[("date", "15 November 2024")],
    );
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
    assert_eq!(harness.prover.submits(), 0);
}

#[tokio::test]
async fn invalid_address_is_a_predicate_error() {
    let harness = Harness::happy_path();
    let request = multipart_request("/generate-proof/not-an-address", &[("emlFile", ALICE_EMAIL)]);
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidPredicateError");
}

#[tokio::test]
async fn prover_rejection_names_the_stage() {
    let harness = Harness::new(
        test_config(),
        MockProver::new(vec![Poll::Fail("predicate not found")]),
        MockLedger::new(vec![Mined::Depth(1)]),
    );
    let request =
        multipart_request("/generate-proof/alice@example.com", &[("emlFile", ALICE_EMAIL)]);
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "ProvingFailedError");
    assert_eq!(body["stage"], "proving");
    assert_eq!(body["resumable"], false);
}

#[tokio::test]
async fn confirmation_timeout_is_resumable() {
    let mut config = test_config();
    config.confirmation_policy = RetryPolicy::fixed(2, Duration::from_millis(1));
    let harness = Harness::new(
        config,
        MockProver::new(vec![Poll::Done(proof(1))]),
        MockLedger::new(vec![Mined::Absent]),
    );
    let request = multipart_request(
        "/generate-proof/alice@example.com",
        &[("emlFile", ALICE_EMAIL), ("requestId", "retry-me")],
    );
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["stage"], "verification");
    assert_eq!(body["resumable"], true);
    let stored = harness.store.get_transaction(&RequestId::new("retry-me")).await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn inline_json_with_body_field() {
    let mut config = test_config();
    config.options.route_style = RouteStyle::BodyField;
    config.options.upload_mode = UploadMode::InlineJson;
    let harness = Harness::new(
        config,
        MockProver::new(vec![Poll::Done(proof(1))]),
        MockLedger::new(vec![Mined::Depth(1)]),
    );
    let payload = json!({
        "emlBase64": STANDARD.encode(ALICE_EMAIL),
        "email": "alice@example.com",
        "date": "15 November 2024",
        "start": "20:33",
        "end": "20:44",
        "verifierAddress": "0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c",
    });
    let request = Request::builder()
        .method("POST")
        .uri("/generate-proof")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(&harness, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Verification successful");
    let calls = harness.prover.calls.lock().unwrap();
    assert_eq!(
        calls[0].selector,
        ethers::utils::id("main((string,string[]),string,string,string,string)")
    );
    assert_eq!(calls[0].target, test_config().prover_address);
    let broadcasts = harness.ledger.broadcasts.lock().unwrap();
    assert_eq!(broadcasts[0].target, Address::repeat_byte(0x0c));
}

#[tokio::test]
async fn half_a_time_window_is_rejected() {
    let mut config = test_config();
    config.options.route_style = RouteStyle::BodyField;
    config.options.upload_mode = UploadMode::InlineJson;
    let harness = Harness::new(
        config,
        MockProver::new(vec![Poll::Done(proof(1))]),
        MockLedger::new(vec![Mined::Depth(1)]),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/generate-proof")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "eml": ALICE_EMAIL, "email": "alice@example.com", "start": "20:33" })
                .to_string(),
        ))
        .unwrap();
    let (status, _) = send(&harness, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_check() {
    let harness = Harness::happy_path();
    let response = router(harness.pipeline.clone(), 1024)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
