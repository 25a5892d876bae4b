#![allow(dead_code)]

use api::{create_router, AppState};
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use services::billing::{
    BillingError, BillingService, CheckoutSession, NewSubscription, RegisteredSubscription,
    Subscription, SubscriptionAccess,
};
use services::identity::{AuthenticatedUser, IdentityError, IdentityVerifier};
use services::UserId;
use std::sync::Arc;

/// Token the mock verifier accepts
pub const VALID_TOKEN: &str = "valid-token";
/// Signature the mock billing service accepts
pub const VALID_SIGNATURE: &str = "t=1,v1=deadbeef";

/// Billing service double with per-test behavior knobs. Route tests exercise
/// request validation and error mapping; service semantics are covered by the
/// services crate's own tests.
pub struct MockBillingService {
    /// Portal URL to return; None simulates a user with no customer on file
    pub portal_url: Option<String>,
    /// Whether registration reports a newly created record
    pub register_is_new: bool,
    /// Access report returned by check_subscription
    pub access: SubscriptionAccess,
}

impl Default for MockBillingService {
    fn default() -> Self {
        Self {
            portal_url: Some("https://billing.stripe.test/session".to_string()),
            register_is_new: true,
            access: SubscriptionAccess {
                status: None,
                has_access: false,
                trial_ends_at: None,
                current_period_end: None,
                plan_type: None,
            },
        }
    }
}

#[async_trait]
impl BillingService for MockBillingService {
    async fn create_checkout(
        &self,
        _user_id: UserId,
        _plan: &str,
        _email: &str,
    ) -> Result<CheckoutSession, BillingError> {
        Ok(CheckoutSession {
            session_id: "cs_test_1".to_string(),
            url: "https://checkout.stripe.test/cs_test_1".to_string(),
        })
    }

    async fn create_portal_session(&self, _user_id: UserId) -> Result<String, BillingError> {
        self.portal_url.clone().ok_or(BillingError::NoCustomer)
    }

    async fn register_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<RegisteredSubscription, BillingError> {
        let now = Utc::now();
        Ok(RegisteredSubscription {
            subscription: Subscription {
                user_id: subscription.user_id,
                stripe_customer_id: None,
                stripe_subscription_id: None,
                status: subscription.status,
                plan_type: subscription.plan_type,
                trial_ends_at: subscription.trial_ends_at,
                current_period_end: subscription.current_period_end,
                created_at: now,
                updated_at: now,
            },
            is_new: self.register_is_new,
        })
    }

    async fn check_subscription(
        &self,
        _user_id: UserId,
    ) -> Result<SubscriptionAccess, BillingError> {
        Ok(self.access.clone())
    }

    async fn handle_stripe_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> Result<(), BillingError> {
        if signature == VALID_SIGNATURE {
            Ok(())
        } else {
            Err(BillingError::WebhookVerificationFailed(
                "signature mismatch".to_string(),
            ))
        }
    }
}

pub struct MockIdentityVerifier {
    pub user_id: UserId,
}

#[async_trait]
impl IdentityVerifier for MockIdentityVerifier {
    async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, IdentityError> {
        if token == VALID_TOKEN {
            Ok(AuthenticatedUser {
                user_id: self.user_id,
                email: Some("user@example.com".to_string()),
            })
        } else {
            Err(IdentityError::InvalidToken)
        }
    }
}

/// Create a test server over the real router with mock services injected
pub fn create_test_server(billing: MockBillingService, user_id: UserId) -> TestServer {
    let app_state = AppState {
        billing_service: Arc::new(billing),
        identity_verifier: Arc::new(MockIdentityVerifier { user_id }),
    };
    TestServer::new(create_router(app_state)).expect("Failed to create test server")
}
