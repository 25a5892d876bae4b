use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Extension Billing API",
        description = "Subscription billing backend for the browser extension.",
        version = "1.0.0",
        license(name = "MIT",)
    ),
    paths(
        crate::routes::billing::create_checkout,
        crate::routes::billing::customer_portal,
        crate::routes::billing::create_subscription,
        crate::routes::billing::check_subscription,
        crate::routes::billing::stripe_webhook,
    ),
    components(schemas(
        crate::routes::billing::CreateCheckoutRequest,
        crate::routes::billing::CreateCheckoutResponse,
        crate::routes::billing::CustomerPortalRequest,
        crate::routes::billing::CustomerPortalResponse,
        crate::routes::billing::CreateSubscriptionRequest,
        crate::routes::billing::CreateSubscriptionResponse,
        crate::routes::billing::SubscriptionResponse,
        crate::routes::billing::CheckSubscriptionResponse,
        crate::error::ApiErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Billing", description = "Checkout, portal, registration, status and webhook endpoints"),
        (name = "Health", description = "Service health endpoints")
    )
)]
pub struct ApiDoc;

/// Security scheme addon for Bearer token authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token issued by the auth provider"))
                        .build(),
                ),
            )
        }
    }
}
