use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::UserId;

/// Stored billing state of a subscription record.
///
/// Transitions come from explicit user action (trial registration) or from
/// signature-verified payment-provider events, never from raw client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Canceled,
    Expired,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Pending => "pending",
        }
    }

    /// Parse a stored status value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial" => Some(Self::Trial),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Map Stripe's subscription status vocabulary onto ours.
    pub fn from_stripe(s: &str) -> Self {
        match s {
            "trialing" => Self::Trial,
            "active" => Self::Active,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "incomplete_expired" => Self::Canceled,
            _ => Self::Pending,
        }
    }

    /// Premium features are reachable only while trialing or paid up.
    pub fn has_access(&self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Annual,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "annual" => Some(Self::Annual),
            _ => None,
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database model for a subscription record (one row per user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_type: Option<PlanType>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for first-time subscription registration
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub plan_type: Option<PlanType>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Result of a registration attempt, with idempotency flag
#[derive(Debug, Clone)]
pub struct RegisteredSubscription {
    pub subscription: Subscription,
    /// True if the record was newly inserted; false if it already existed
    pub is_new: bool,
}

/// Full record state synced from a verified checkout-completion event
#[derive(Debug, Clone)]
pub struct SubscriptionSync {
    pub user_id: UserId,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: String,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Hosted checkout flow reference returned to the extension
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Access report for a user, after lazy trial expiry has been applied.
/// `status` is None when the user has no subscription record at all.
#[derive(Debug, Clone)]
pub struct SubscriptionAccess {
    pub status: Option<SubscriptionStatus>,
    pub has_access: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub plan_type: Option<PlanType>,
}

/// Subscription details fetched from the payment provider
#[derive(Debug, Clone)]
pub struct GatewaySubscription {
    pub subscription_id: String,
    pub customer_id: String,
    pub price_id: String,
    pub status: String,
    pub current_period_end: i64,
    pub trial_end: Option<i64>,
}

/// Error types for billing operations
#[derive(Debug)]
pub enum BillingError {
    /// Required Stripe price identifier is not configured
    NotConfigured,
    /// User has no Stripe customer record on file
    NoCustomer,
    /// Stripe API error
    StripeError(String),
    /// Database error
    DatabaseError(String),
    /// Webhook verification failed
    WebhookVerificationFailed(String),
    /// Internal error
    InternalError(String),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "Stripe price is not configured"),
            Self::NoCustomer => write!(f, "User has no Stripe customer record"),
            Self::StripeError(msg) => write!(f, "Stripe error: {}", msg),
            Self::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            Self::WebhookVerificationFailed(msg) => {
                write!(f, "Webhook verification failed: {}", msg)
            }
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

/// Repository trait for subscription records.
///
/// Contract: the store enforces at most one record per user id. All writes go
/// through upserts or conflict-guarded inserts on that key, so concurrent
/// registrations cannot produce duplicate rows; there is no read-then-write
/// path. Rows are never deleted — `canceled` is a terminal status value.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Get the subscription record for a user
    async fn get_by_user(&self, user_id: UserId) -> anyhow::Result<Option<Subscription>>;

    /// Insert a record unless one already exists for the user.
    /// Returns the stored record and whether it was newly inserted (true)
    /// or already existed (false).
    async fn insert_if_absent(
        &self,
        subscription: NewSubscription,
    ) -> anyhow::Result<RegisteredSubscription>;

    /// Persist the Stripe customer reference for a user, creating a pending
    /// record when none exists yet (upsert)
    async fn set_customer_id(&self, user_id: UserId, customer_id: &str) -> anyhow::Result<()>;

    /// Insert or update the record for a user from provider-synced state (upsert)
    async fn upsert_synced(&self, sync: SubscriptionSync) -> anyhow::Result<Subscription>;

    /// Update status and period/trial timestamps on the record matching a
    /// Stripe subscription reference. Returns the number of rows affected.
    async fn update_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
        current_period_end: Option<DateTime<Utc>>,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<u64>;

    /// Update only the status on the record matching a Stripe subscription
    /// reference. Returns the number of rows affected.
    async fn update_status_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<u64>;

    /// Update only the status on a user's record. Returns rows affected.
    async fn update_status_by_user(
        &self,
        user_id: UserId,
        status: SubscriptionStatus,
    ) -> anyhow::Result<u64>;
}

/// Gateway trait over the payment provider's hosted-session and subscription
/// APIs, injected so handlers and tests can substitute a double.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer record at the provider, tagged with the user id.
    /// Returns the provider's customer reference.
    async fn create_customer(&self, email: &str, user_id: UserId)
        -> Result<String, BillingError>;

    /// Create a subscription-mode checkout session carrying the user id in
    /// session and subscription metadata
    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: UserId,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, BillingError>;

    /// Create a billing portal session. Returns the portal URL.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError>;

    /// Fetch current subscription details from the provider
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, BillingError>;
}

/// Service trait for the billing flow
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Create a checkout session for a user and plan selector
    /// ("annual" maps to the annual price, anything else to monthly).
    /// Creates and persists a Stripe customer first when none is on file.
    async fn create_checkout(
        &self,
        user_id: UserId,
        plan: &str,
        email: &str,
    ) -> Result<CheckoutSession, BillingError>;

    /// Create a customer portal session for managing the subscription.
    /// Returns the portal URL; NoCustomer when no reference is on file.
    async fn create_portal_session(&self, user_id: UserId) -> Result<String, BillingError>;

    /// Idempotently register a subscription record for an authenticated user.
    /// A second call for a user with an existing record returns that record
    /// unchanged rather than erroring.
    async fn register_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<RegisteredSubscription, BillingError>;

    /// Report subscription status and access for a user, lazily marking
    /// expired trials in storage before responding
    async fn check_subscription(&self, user_id: UserId)
        -> Result<SubscriptionAccess, BillingError>;

    /// Handle an incoming webhook event from the payment provider.
    /// WebhookVerificationFailed means the caller must respond 400; any other
    /// error is a processing failure the provider should retry.
    async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), BillingError>;
}
