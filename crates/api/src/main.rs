use api::{create_router, ApiDoc, AppState};
use services::billing::{BillingServiceConfig, BillingServiceImpl, StripeGateway};
use services::identity::GoTrueVerifier;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api=debug,services=debug,database=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting billing API server...");

    // Load configuration from environment
    let config = config::Config::from_env();

    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host,
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);

    // Create database and run migrations
    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database).await?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;

    let subscription_repo = db.subscription_repository();

    // Create services
    tracing::info!("Initializing services...");
    let gateway = Arc::new(StripeGateway::new(config.stripe.secret_key.clone()));
    let billing_service = Arc::new(BillingServiceImpl::new(BillingServiceConfig {
        subscription_repo,
        gateway,
        stripe_webhook_secret: config.stripe.webhook_secret.clone(),
        monthly_price_id: config.stripe.monthly_price_id.clone(),
        annual_price_id: config.stripe.annual_price_id.clone(),
        site_url: config.site_url.clone(),
    }));
    let identity_verifier = Arc::new(GoTrueVerifier::new(
        config.auth.base_url.clone(),
        config.auth.anon_key.clone(),
    ));

    // Create application state
    let app_state = AppState {
        billing_service: billing_service as Arc<dyn services::billing::BillingService>,
        identity_verifier: identity_verifier as Arc<dyn services::identity::IdentityVerifier>,
    };

    // Create router
    let app = create_router(app_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
