use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub billing_service: Arc<dyn services::billing::BillingService>,
    pub identity_verifier: Arc<dyn services::identity::IdentityVerifier>,
}
