pub mod gateway;
pub mod ports;
pub mod service;

// Re-export commonly used types
pub use gateway::StripeGateway;
pub use ports::{
    BillingError, BillingService, CheckoutSession, GatewaySubscription, NewSubscription,
    PaymentGateway, PlanType, RegisteredSubscription, Subscription, SubscriptionAccess,
    SubscriptionRepository, SubscriptionStatus, SubscriptionSync,
};
pub use service::{BillingServiceConfig, BillingServiceImpl};
