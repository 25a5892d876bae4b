use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stripe::{Webhook, WebhookError};

use super::gateway::USER_ID_METADATA_KEY;
use super::ports::{
    BillingError, BillingService, CheckoutSession, NewSubscription, PaymentGateway,
    PlanType, RegisteredSubscription, SubscriptionAccess, SubscriptionRepository,
    SubscriptionStatus, SubscriptionSync,
};
use crate::UserId;

/// Configuration for BillingServiceImpl
pub struct BillingServiceConfig {
    pub subscription_repo: Arc<dyn SubscriptionRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub stripe_webhook_secret: String,
    pub monthly_price_id: String,
    pub annual_price_id: String,
    pub site_url: String,
}

pub struct BillingServiceImpl {
    subscription_repo: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    stripe_webhook_secret: String,
    monthly_price_id: String,
    annual_price_id: String,
    site_url: String,
}

/// Extract the id from a Stripe expandable reference in raw event JSON:
/// either a plain id string or an expanded object carrying an `id` field.
fn expandable_id(value: Option<&serde_json::Value>) -> Option<&str> {
    let value = value?;
    value
        .as_str()
        .or_else(|| value.get("id").and_then(|id| id.as_str()))
}

/// Read the owning user id from an event object's metadata
fn metadata_user_id(object: &serde_json::Value) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|m| m.get(USER_ID_METADATA_KEY))
        .and_then(|v| v.as_str())
}

fn timestamp_from_epoch(secs: i64) -> Result<DateTime<Utc>, BillingError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| BillingError::InternalError(format!("Invalid timestamp: {}", secs)))
}

impl BillingServiceImpl {
    pub fn new(config: BillingServiceConfig) -> Self {
        Self {
            subscription_repo: config.subscription_repo,
            gateway: config.gateway,
            stripe_webhook_secret: config.stripe_webhook_secret,
            monthly_price_id: config.monthly_price_id,
            annual_price_id: config.annual_price_id,
            site_url: config.site_url,
        }
    }

    /// Resolve a plan selector to the configured Stripe price id.
    /// "annual" maps to the annual price; anything else falls back to monthly.
    fn resolve_price_id(&self, plan: &str) -> Result<&str, BillingError> {
        let price_id = if plan == "annual" {
            &self.annual_price_id
        } else {
            &self.monthly_price_id
        };
        if price_id.is_empty() {
            return Err(BillingError::NotConfigured);
        }
        Ok(price_id)
    }

    fn resolve_plan_type(&self, price_id: &str) -> PlanType {
        if price_id == self.annual_price_id {
            PlanType::Annual
        } else {
            PlanType::Monthly
        }
    }

    /// Checkout completed: the session metadata names the owner and the
    /// session references the new subscription. Fetch the subscription from
    /// Stripe and sync the full record with status=active.
    async fn handle_checkout_completed(
        &self,
        object: &serde_json::Value,
    ) -> Result<(), BillingError> {
        let user_id_str = metadata_user_id(object);
        let subscription_id = expandable_id(object.get("subscription"));

        let (Some(user_id_str), Some(subscription_id)) = (user_id_str, subscription_id) else {
            tracing::info!(
                "checkout.session.completed without user metadata or subscription reference, ignoring"
            );
            return Ok(());
        };

        // Malformed metadata is permanent; erroring here would make Stripe
        // redeliver the same event forever.
        let user_id: UserId = match user_id_str.parse() {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!(
                    "checkout.session.completed with malformed user metadata, ignoring: user_id={}, error={}",
                    user_id_str,
                    e
                );
                return Ok(());
            }
        };

        let details = self.gateway.retrieve_subscription(subscription_id).await?;

        let plan_type = self.resolve_plan_type(&details.price_id);
        let customer_id = expandable_id(object.get("customer"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| details.customer_id.clone());

        let current_period_end = timestamp_from_epoch(details.current_period_end)?;
        let trial_ends_at = details
            .trial_end
            .map(timestamp_from_epoch)
            .transpose()?;

        self.subscription_repo
            .upsert_synced(SubscriptionSync {
                user_id,
                stripe_customer_id: Some(customer_id),
                stripe_subscription_id: subscription_id.to_string(),
                status: SubscriptionStatus::Active,
                plan_type,
                trial_ends_at,
                current_period_end: Some(current_period_end),
            })
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        tracing::info!(
            "Subscription created: user_id={}, subscription_id={}, plan={}",
            user_id,
            subscription_id,
            plan_type
        );

        Ok(())
    }

    /// Subscription updated: refresh status and period/trial timestamps on
    /// the record matched by subscription reference. Silently no-ops when the
    /// event carries no user metadata.
    async fn handle_subscription_updated(
        &self,
        object: &serde_json::Value,
    ) -> Result<(), BillingError> {
        if metadata_user_id(object).is_none() {
            tracing::debug!("customer.subscription.updated without user metadata, ignoring");
            return Ok(());
        }

        let Some(subscription_id) = object.get("id").and_then(|id| id.as_str()) else {
            tracing::warn!("customer.subscription.updated without subscription id, ignoring");
            return Ok(());
        };
        let Some(stripe_status) = object.get("status").and_then(|s| s.as_str()) else {
            tracing::warn!("customer.subscription.updated without status, ignoring");
            return Ok(());
        };

        let status = SubscriptionStatus::from_stripe(stripe_status);
        let current_period_end = object
            .get("current_period_end")
            .and_then(|v| v.as_i64())
            .map(timestamp_from_epoch)
            .transpose()?;
        let trial_ends_at = object
            .get("trial_end")
            .and_then(|v| v.as_i64())
            .map(timestamp_from_epoch)
            .transpose()?;

        let rows = self
            .subscription_repo
            .update_by_subscription_id(subscription_id, status, current_period_end, trial_ends_at)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        if rows == 0 {
            tracing::debug!(
                "No subscription record matched subscription_id={}, nothing to update",
                subscription_id
            );
        } else {
            tracing::info!(
                "Subscription updated: subscription_id={}, status={}",
                subscription_id,
                status
            );
        }

        Ok(())
    }

    async fn handle_subscription_deleted(
        &self,
        object: &serde_json::Value,
    ) -> Result<(), BillingError> {
        let Some(subscription_id) = object.get("id").and_then(|id| id.as_str()) else {
            tracing::warn!("customer.subscription.deleted without subscription id, ignoring");
            return Ok(());
        };

        self.subscription_repo
            .update_status_by_subscription_id(subscription_id, SubscriptionStatus::Canceled)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        tracing::info!("Subscription canceled: subscription_id={}", subscription_id);

        Ok(())
    }

    async fn handle_payment_failed(
        &self,
        object: &serde_json::Value,
    ) -> Result<(), BillingError> {
        let Some(subscription_id) = expandable_id(object.get("subscription")) else {
            tracing::debug!("invoice.payment_failed without subscription reference, ignoring");
            return Ok(());
        };

        self.subscription_repo
            .update_status_by_subscription_id(subscription_id, SubscriptionStatus::PastDue)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        tracing::info!(
            "Payment failed for subscription: subscription_id={}",
            subscription_id
        );

        Ok(())
    }
}

#[async_trait]
impl BillingService for BillingServiceImpl {
    async fn create_checkout(
        &self,
        user_id: UserId,
        plan: &str,
        email: &str,
    ) -> Result<CheckoutSession, BillingError> {
        tracing::info!(
            "Creating checkout session for user_id={}, plan={}",
            user_id,
            plan
        );

        let price_id = self.resolve_price_id(plan)?.to_string();

        // Reuse the stored customer reference; create and persist one first
        // when none is on file. The mapping must be durable before the
        // session request so a completed checkout can be correlated.
        let existing_customer = self
            .subscription_repo
            .get_by_user(user_id)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?
            .and_then(|s| s.stripe_customer_id);

        let customer_id = match existing_customer {
            Some(customer_id) => {
                tracing::debug!(
                    "Stripe customer already exists: user_id={}, customer_id={}",
                    user_id,
                    customer_id
                );
                customer_id
            }
            None => {
                let customer_id = self.gateway.create_customer(email, user_id).await?;
                self.subscription_repo
                    .set_customer_id(user_id, &customer_id)
                    .await
                    .map_err(|e| BillingError::DatabaseError(e.to_string()))?;
                tracing::info!(
                    "Stripe customer created: user_id={}, customer_id={}",
                    user_id,
                    customer_id
                );
                customer_id
            }
        };

        let success_url = format!(
            "{}/auth/success.html?session_id={{CHECKOUT_SESSION_ID}}",
            self.site_url
        );
        let cancel_url = format!("{}/pricing.html", self.site_url);

        let session = self
            .gateway
            .create_checkout_session(&customer_id, &price_id, user_id, &success_url, &cancel_url)
            .await?;

        tracing::info!(
            "Checkout session created: user_id={}, session_id={}",
            user_id,
            session.session_id
        );

        Ok(session)
    }

    async fn create_portal_session(&self, user_id: UserId) -> Result<String, BillingError> {
        tracing::info!("Creating portal session for user_id={}", user_id);

        let customer_id = self
            .subscription_repo
            .get_by_user(user_id)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?
            .and_then(|s| s.stripe_customer_id)
            .ok_or(BillingError::NoCustomer)?;

        self.gateway
            .create_portal_session(&customer_id, &self.site_url)
            .await
    }

    async fn register_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<RegisteredSubscription, BillingError> {
        tracing::info!(
            "Registering subscription for user_id={}, status={}",
            subscription.user_id,
            subscription.status
        );

        let registered = self
            .subscription_repo
            .insert_if_absent(subscription)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        if registered.is_new {
            tracing::info!(
                "Subscription created: user_id={}",
                registered.subscription.user_id
            );
        } else {
            tracing::debug!(
                "Subscription already exists: user_id={}, returning existing record",
                registered.subscription.user_id
            );
        }

        Ok(registered)
    }

    async fn check_subscription(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionAccess, BillingError> {
        tracing::debug!("Checking subscription for user_id={}", user_id);

        let Some(subscription) = self
            .subscription_repo
            .get_by_user(user_id)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?
        else {
            // Never registered
            return Ok(SubscriptionAccess {
                status: None,
                has_access: false,
                trial_ends_at: None,
                current_period_end: None,
                plan_type: None,
            });
        };

        // Lazy expiry: a trial past its deadline is marked expired on read
        // rather than by a background sweep.
        let mut status = subscription.status;
        if status == SubscriptionStatus::Trial {
            if let Some(trial_ends_at) = subscription.trial_ends_at {
                if trial_ends_at < Utc::now() {
                    self.subscription_repo
                        .update_status_by_user(user_id, SubscriptionStatus::Expired)
                        .await
                        .map_err(|e| BillingError::DatabaseError(e.to_string()))?;
                    status = SubscriptionStatus::Expired;
                    tracing::info!("Trial expired for user_id={}", user_id);
                }
            }
        }

        Ok(SubscriptionAccess {
            status: Some(status),
            has_access: status.has_access(),
            trial_ends_at: subscription.trial_ends_at,
            current_period_end: subscription.current_period_end,
            plan_type: subscription.plan_type,
        })
    }

    async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), BillingError> {
        tracing::info!("Processing Stripe webhook");

        let payload_str = std::str::from_utf8(payload).map_err(|e| {
            BillingError::WebhookVerificationFailed(format!("Invalid UTF-8: {}", e))
        })?;

        // Verify the signature FIRST; nothing below runs for unauthenticated
        // payloads. construct_event does both verification and typed event
        // parsing — only the verification outcome matters here, dispatch
        // works on the raw JSON.
        if let Err(e) =
            Webhook::construct_event(payload_str, signature, &self.stripe_webhook_secret)
        {
            match e {
                WebhookError::BadKey
                | WebhookError::BadSignature
                | WebhookError::BadTimestamp(_)
                | WebhookError::BadHeader(_) => {
                    tracing::error!("Webhook signature verification failed: error={}", e);
                    return Err(BillingError::WebhookVerificationFailed(e.to_string()));
                }
                WebhookError::BadParse(_) => {
                    tracing::debug!("Webhook event parsing failed (signature OK): error={}", e);
                }
            }
        }

        let payload_json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::InternalError(format!("Invalid JSON: {}", e)))?;

        let event_id = payload_json
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let event_type = payload_json
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        tracing::info!(
            "Processing verified webhook: event_id={}, type={}",
            event_id,
            event_type
        );

        let object = payload_json
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or_else(|| {
                BillingError::InternalError(format!(
                    "Webhook event has no data.object: event_id={}",
                    event_id
                ))
            })?;

        match event_type {
            "checkout.session.completed" => self.handle_checkout_completed(object).await?,
            "customer.subscription.updated" => self.handle_subscription_updated(object).await?,
            "customer.subscription.deleted" => self.handle_subscription_deleted(object).await?,
            "invoice.payment_failed" => self.handle_payment_failed(object).await?,
            other => {
                tracing::debug!("Unhandled event type: {}", other);
            }
        }

        tracing::info!(
            "Webhook processed successfully: event_id={}, type={}",
            event_id,
            event_type
        );

        Ok(())
    }
}
