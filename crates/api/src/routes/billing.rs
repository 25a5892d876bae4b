use crate::{error::ApiError, state::AppState};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services::billing::{BillingError, NewSubscription, PlanType, Subscription, SubscriptionStatus};
use services::identity::IdentityError;
use services::UserId;
use utoipa::ToSchema;

/// Request to create a hosted checkout session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    /// Owning user id
    pub user_id: Option<String>,
    /// Plan selector: "annual" maps to the annual price, anything else to monthly
    #[serde(alias = "plan")]
    pub price_id: Option<String>,
    /// Email for the Stripe customer record
    pub email: Option<String>,
}

/// Response containing the checkout session reference
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    /// Opaque checkout session id
    pub session_id: String,
    /// Redirect URL for completing payment
    pub url: String,
}

/// Request to create a customer portal session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPortalRequest {
    pub user_id: Option<String>,
}

/// Response containing the portal URL
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerPortalResponse {
    /// Stripe customer portal URL
    pub url: String,
}

/// Request to register a subscription record for the authenticated user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    pub user_id: Option<String>,
    /// Initial status; defaults to "trial"
    pub status: Option<String>,
    pub plan_type: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Stored subscription record as returned to clients
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub user_id: uuid::Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: String,
    pub plan_type: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            user_id: sub.user_id.into_uuid(),
            stripe_customer_id: sub.stripe_customer_id,
            stripe_subscription_id: sub.stripe_subscription_id,
            status: sub.status.to_string(),
            plan_type: sub.plan_type.map(|p| p.to_string()),
            trial_ends_at: sub.trial_ends_at,
            current_period_end: sub.current_period_end,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Response for subscription registration
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionResponse {
    pub success: bool,
    pub subscription: SubscriptionResponse,
    pub message: String,
}

/// Query parameters for the status check
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscriptionParams {
    pub user_id: Option<String>,
}

/// Subscription status and access report
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscriptionResponse {
    /// Current status, or "none" when the user has no record
    pub status: String,
    pub has_access: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub plan_type: Option<String>,
}

fn parse_user_id(value: Option<&str>, field_name: &str) -> Result<UserId, ApiError> {
    value
        .ok_or_else(|| ApiError::bad_request(format!("Missing {}", field_name)))?
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {}: must be a UUID", field_name)))
}

/// Map billing errors from checkout/portal/status flows onto API errors.
/// Provider and database failures are logged with context and surfaced as a
/// generic 500.
fn billing_error(e: BillingError, operation: &str) -> ApiError {
    match e {
        BillingError::NotConfigured => {
            tracing::error!("Stripe price not configured for {}", operation);
            ApiError::internal_server_error("Stripe is not configured")
        }
        BillingError::NoCustomer => ApiError::not_found("No Stripe customer found for this user"),
        BillingError::WebhookVerificationFailed(_) => {
            ApiError::bad_request("Invalid webhook signature")
        }
        BillingError::StripeError(msg) => {
            tracing::error!(error = ?msg, "Stripe error during {}", operation);
            ApiError::internal_server_error(format!("Failed to {}", operation))
        }
        BillingError::DatabaseError(msg) => {
            tracing::error!(error = ?msg, "Database error during {}", operation);
            ApiError::internal_server_error(format!("Failed to {}", operation))
        }
        BillingError::InternalError(msg) => {
            tracing::error!(error = ?msg, "Internal error during {}", operation);
            ApiError::internal_server_error(format!("Failed to {}", operation))
        }
    }
}

/// Create a checkout session
#[utoipa::path(
    post,
    path = "/api/create-checkout",
    tag = "Billing",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CreateCheckoutResponse),
        (status = 400, description = "Missing or invalid fields", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Provider or database error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn create_checkout(
    State(app_state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let user_id = parse_user_id(req.user_id.as_deref(), "userId")?;
    let email = req
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing email"))?;
    let plan = req
        .price_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing priceId"))?;

    let session = app_state
        .billing_service
        .create_checkout(user_id, plan, email)
        .await
        .map_err(|e| billing_error(e, "create checkout session"))?;

    Ok(Json(CreateCheckoutResponse {
        session_id: session.session_id,
        url: session.url,
    }))
}

/// Create a customer portal session
#[utoipa::path(
    post,
    path = "/api/customer-portal",
    tag = "Billing",
    request_body = CustomerPortalRequest,
    responses(
        (status = 200, description = "Portal session created", body = CustomerPortalResponse),
        (status = 400, description = "Missing or invalid userId", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No Stripe customer on file", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Provider or database error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn customer_portal(
    State(app_state): State<AppState>,
    Json(req): Json<CustomerPortalRequest>,
) -> Result<Json<CustomerPortalResponse>, ApiError> {
    let user_id = parse_user_id(req.user_id.as_deref(), "userId")?;

    let url = app_state
        .billing_service
        .create_portal_session(user_id)
        .await
        .map_err(|e| billing_error(e, "create portal session"))?;

    Ok(Json(CustomerPortalResponse { url }))
}

/// Register a subscription record for the authenticated user
#[utoipa::path(
    post,
    path = "/api/create-subscription",
    tag = "Billing",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = CreateSubscriptionResponse),
        (status = 200, description = "Subscription already exists", body = CreateSubscriptionResponse),
        (status = 400, description = "Missing or invalid fields", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorResponse),
        (status = 403, description = "User ID mismatch", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Database error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("bearer_token" = [])
    )
)]
pub async fn create_subscription(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<CreateSubscriptionResponse>), ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::missing_auth_header)?;
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(ApiError::invalid_auth_header)?;

    let user = app_state
        .identity_verifier
        .verify_token(token)
        .await
        .map_err(|e| match e {
            IdentityError::InvalidToken => ApiError::unauthorized("Invalid or expired token"),
            IdentityError::Upstream(msg) => {
                tracing::error!(error = ?msg, "Auth provider error during token verification");
                ApiError::internal_server_error("Failed to verify token")
            }
        })?;

    let user_id = parse_user_id(req.user_id.as_deref(), "user_id")?;
    if user_id != user.user_id {
        tracing::warn!(
            "Subscription registration rejected: payload user_id={} does not match token",
            user_id
        );
        return Err(ApiError::forbidden("User ID mismatch"));
    }

    let status = match req.status.as_deref() {
        Some(s) => SubscriptionStatus::parse(s)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid status: {}", s)))?,
        None => SubscriptionStatus::Trial,
    };
    let plan_type = req
        .plan_type
        .as_deref()
        .map(|p| {
            PlanType::parse(p).ok_or_else(|| ApiError::bad_request(format!("Invalid plan_type: {}", p)))
        })
        .transpose()?;

    let registered = app_state
        .billing_service
        .register_subscription(NewSubscription {
            user_id,
            status,
            plan_type,
            trial_ends_at: req.trial_ends_at,
            current_period_end: req.current_period_end,
        })
        .await
        .map_err(|e| billing_error(e, "register subscription"))?;

    let (status_code, message) = if registered.is_new {
        (StatusCode::CREATED, "Subscription created")
    } else {
        (StatusCode::OK, "Subscription already exists")
    };

    Ok((
        status_code,
        Json(CreateSubscriptionResponse {
            success: true,
            subscription: registered.subscription.into(),
            message: message.to_string(),
        }),
    ))
}

/// Check subscription status and feature access for a user
#[utoipa::path(
    get,
    path = "/api/check-subscription",
    tag = "Billing",
    params(CheckSubscriptionParams),
    responses(
        (status = 200, description = "Status report", body = CheckSubscriptionResponse),
        (status = 400, description = "Missing or invalid userId", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Database error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn check_subscription(
    State(app_state): State<AppState>,
    Query(params): Query<CheckSubscriptionParams>,
) -> Result<Json<CheckSubscriptionResponse>, ApiError> {
    let user_id = parse_user_id(params.user_id.as_deref(), "userId")?;

    let access = app_state
        .billing_service
        .check_subscription(user_id)
        .await
        .map_err(|e| billing_error(e, "check subscription"))?;

    Ok(Json(CheckSubscriptionResponse {
        status: access
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string()),
        has_access: access.has_access,
        trial_ends_at: access.trial_ends_at,
        current_period_end: access.current_period_end,
        plan_type: access.plan_type.map(|p| p.to_string()),
    }))
}

/// Handle Stripe webhook events
#[utoipa::path(
    post,
    path = "/api/webhook",
    tag = "Billing",
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Processing error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing stripe-signature header"))?;

    app_state
        .billing_service
        .handle_stripe_webhook(&body, signature)
        .await
        .map_err(|e| match e {
            BillingError::WebhookVerificationFailed(msg) => {
                tracing::warn!(error = ?msg, "Webhook rejected: signature verification failed");
                ApiError::bad_request("Invalid webhook signature")
            }
            other => billing_error(other, "process webhook"),
        })?;

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Billing routes, nested under /api
pub fn create_billing_router() -> Router<AppState> {
    Router::new()
        .route("/create-checkout", post(create_checkout))
        .route("/customer-portal", post(customer_portal))
        .route("/create-subscription", post(create_subscription))
        .route("/check-subscription", get(check_subscription))
        .route("/webhook", post(stripe_webhook))
}
