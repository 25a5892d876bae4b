use async_trait::async_trait;
use stripe::{
    BillingPortalSession, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateBillingPortalSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CreateCustomer, Customer, CustomerId,
    Subscription as StripeSubscription, SubscriptionId,
};

use super::ports::{BillingError, CheckoutSession, GatewaySubscription, PaymentGateway};
use crate::UserId;

/// Metadata key carrying the owning user id on customers, checkout sessions
/// and subscriptions. Webhook dispatch reads it back from event payloads.
pub const USER_ID_METADATA_KEY: &str = "user_id";

/// Payment gateway backed by the Stripe API
pub struct StripeGateway {
    secret_key: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Self {
        Self { secret_key }
    }

    fn client(&self) -> Client {
        Client::new(&self.secret_key)
    }

    fn user_metadata(user_id: UserId) -> stripe::Metadata {
        vec![(USER_ID_METADATA_KEY.to_string(), user_id.to_string())]
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        email: &str,
        user_id: UserId,
    ) -> Result<String, BillingError> {
        tracing::info!("Creating Stripe customer for user_id={}", user_id);

        let client = self.client();
        let customer = Customer::create(
            &client,
            CreateCustomer {
                email: Some(email),
                metadata: Some(Self::user_metadata(user_id)),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| BillingError::StripeError(e.to_string()))?;

        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: UserId,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, BillingError> {
        tracing::info!(
            "Creating checkout session: user_id={}, customer_id={}",
            user_id,
            customer_id
        );

        let client = self.client();

        let customer: CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::StripeError("Invalid customer ID".to_string()))?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        // Tag both the session and the subscription it creates, so that both
        // checkout.session.completed and customer.subscription.* events carry
        // the owning user id in metadata.
        params.metadata = Some(Self::user_metadata(user_id));
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(Self::user_metadata(user_id)),
            ..Default::default()
        });

        let session = StripeCheckoutSession::create(&client, params)
            .await
            .map_err(|e| BillingError::StripeError(e.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeError("No checkout URL returned".into()))?;

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError> {
        tracing::info!("Creating portal session for customer_id={}", customer_id);

        let client = self.client();

        let customer: CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::StripeError("Invalid customer ID".to_string()))?;

        let mut params = CreateBillingPortalSession::new(customer);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&client, params)
            .await
            .map_err(|e| BillingError::StripeError(e.to_string()))?;

        Ok(session.url)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, BillingError> {
        tracing::debug!("Retrieving Stripe subscription: {}", subscription_id);

        let client = self.client();

        let id: SubscriptionId = subscription_id
            .parse()
            .map_err(|_| BillingError::StripeError("Invalid subscription ID".to_string()))?;

        let subscription = StripeSubscription::retrieve(&client, &id, &[])
            .await
            .map_err(|e| BillingError::StripeError(e.to_string()))?;

        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string())
            .ok_or_else(|| BillingError::StripeError("No price found in subscription".into()))?;

        let customer_id = match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(customer) => customer.id.to_string(),
        };

        Ok(GatewaySubscription {
            subscription_id: subscription.id.to_string(),
            customer_id,
            price_id,
            status: subscription.status.to_string(),
            current_period_end: subscription.current_period_end,
            trial_end: subscription.trial_end,
        })
    }
}
