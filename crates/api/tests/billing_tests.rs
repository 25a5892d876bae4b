//! Billing route tests. Run with: `cargo test -p api --test billing_tests`

mod common;

use chrono::{Duration, Utc};
use common::{create_test_server, MockBillingService, VALID_SIGNATURE, VALID_TOKEN};
use serde_json::json;
use services::billing::{PlanType, SubscriptionAccess, SubscriptionStatus};
use services::UserId;

fn bearer(token: &str) -> http::HeaderValue {
    http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_checkout_success() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/create-checkout")
        .json(&json!({
            "userId": user_id.to_string(),
            "priceId": "monthly",
            "email": "user@example.com"
        }))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["sessionId"], "cs_test_1");
    assert_eq!(body["url"], "https://checkout.stripe.test/cs_test_1");
}

#[tokio::test]
async fn test_create_checkout_missing_fields() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server.post("/api/create-checkout").json(&json!({})).await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/api/create-checkout")
        .json(&json!({ "userId": UserId::new().to_string() }))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/api/create-checkout")
        .json(&json!({
            "userId": UserId::new().to_string(),
            "email": "user@example.com"
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Missing priceId");
}

#[tokio::test]
async fn test_create_checkout_invalid_user_id() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/create-checkout")
        .json(&json!({ "userId": "not-a-uuid", "email": "user@example.com" }))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_create_checkout_rejects_wrong_method() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server.get("/api/create-checkout").await;

    assert_eq!(response.status_code(), 405);
}

#[tokio::test]
async fn test_customer_portal_success() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/customer-portal")
        .json(&json!({ "userId": user_id.to_string() }))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["url"], "https://billing.stripe.test/session");
}

#[tokio::test]
async fn test_customer_portal_without_customer_is_404() {
    let billing = MockBillingService {
        portal_url: None,
        ..Default::default()
    };
    let server = create_test_server(billing, UserId::new());

    let response = server
        .post("/api/customer-portal")
        .json(&json!({ "userId": UserId::new().to_string() }))
        .await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_create_subscription_requires_auth_header() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/create-subscription")
        .json(&json!({ "user_id": UserId::new().to_string() }))
        .await;

    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_create_subscription_rejects_invalid_token() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            bearer("expired-token"),
        )
        .json(&json!({ "user_id": user_id.to_string() }))
        .await;

    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_create_subscription_rejects_malformed_auth_header() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            http::HeaderValue::from_static("Basic abc123"),
        )
        .json(&json!({ "user_id": user_id.to_string() }))
        .await;

    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_create_subscription_rejects_mismatched_user_id() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            bearer(VALID_TOKEN),
        )
        .json(&json!({ "user_id": UserId::new().to_string() }))
        .await;

    assert_eq!(response.status_code(), 403);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "User ID mismatch");
}

#[tokio::test]
async fn test_create_subscription_new_record_is_201() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            bearer(VALID_TOKEN),
        )
        .json(&json!({
            "user_id": user_id.to_string(),
            "trial_ends_at": (Utc::now() + Duration::days(7)).to_rfc3339()
        }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["subscription"]["status"], "trial");
    assert_eq!(body["subscription"]["user_id"], user_id.to_string());
}

#[tokio::test]
async fn test_create_subscription_existing_record_is_200() {
    let user_id = UserId::new();
    let billing = MockBillingService {
        register_is_new: false,
        ..Default::default()
    };
    let server = create_test_server(billing, user_id);

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            bearer(VALID_TOKEN),
        )
        .json(&json!({ "user_id": user_id.to_string() }))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Subscription already exists");
}

#[tokio::test]
async fn test_create_subscription_rejects_unknown_status() {
    let user_id = UserId::new();
    let server = create_test_server(MockBillingService::default(), user_id);

    let response = server
        .post("/api/create-subscription")
        .add_header(
            http::HeaderName::from_static("authorization"),
            bearer(VALID_TOKEN),
        )
        .json(&json!({ "user_id": user_id.to_string(), "status": "platinum" }))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_check_subscription_requires_user_id() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server.get("/api/check-subscription").await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .get("/api/check-subscription")
        .add_query_param("userId", "not-a-uuid")
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_check_subscription_without_record_reports_none() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .get("/api/check-subscription")
        .add_query_param("userId", UserId::new().to_string())
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "none");
    assert_eq!(body["hasAccess"], false);
    assert!(body["planType"].is_null());
}

#[tokio::test]
async fn test_check_subscription_active_record() {
    let period_end = Utc::now() + Duration::days(30);
    let billing = MockBillingService {
        access: SubscriptionAccess {
            status: Some(SubscriptionStatus::Active),
            has_access: true,
            trial_ends_at: None,
            current_period_end: Some(period_end),
            plan_type: Some(PlanType::Annual),
        },
        ..Default::default()
    };
    let server = create_test_server(billing, UserId::new());

    let response = server
        .get("/api/check-subscription")
        .add_query_param("userId", UserId::new().to_string())
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "active");
    assert_eq!(body["hasAccess"], true);
    assert_eq!(body["planType"], "annual");
    assert!(body["currentPeriodEnd"].is_string());
}

#[tokio::test]
async fn test_webhook_requires_signature_header() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/webhook")
        .text(json!({ "id": "evt_1", "type": "ping" }).to_string())
        .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Missing stripe-signature header");
}

#[tokio::test]
async fn test_webhook_rejects_invalid_signature() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/webhook")
        .add_header(
            http::HeaderName::from_static("stripe-signature"),
            http::HeaderValue::from_static("t=1,v1=wrong"),
        )
        .text(json!({ "id": "evt_1", "type": "ping" }).to_string())
        .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Invalid webhook signature");
}

#[tokio::test]
async fn test_webhook_acknowledges_verified_event() {
    let server = create_test_server(MockBillingService::default(), UserId::new());

    let response = server
        .post("/api/webhook")
        .add_header(
            http::HeaderName::from_static("stripe-signature"),
            http::HeaderValue::from_static(VALID_SIGNATURE),
        )
        .text(json!({ "id": "evt_1", "type": "customer.created" }).to_string())
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
}
