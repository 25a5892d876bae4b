use anyhow::Result;
use tracing::info;

use crate::pool::DbPool;

/// Apply the schema. Statements are idempotent so startup can run them
/// unconditionally.
pub async fn run(pool: &DbPool) -> Result<()> {
    info!("Running database migrations");

    let client = pool.get().await?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL UNIQUE,
                stripe_customer_id TEXT,
                stripe_subscription_id TEXT,
                status TEXT NOT NULL,
                plan_type TEXT,
                trial_ends_at TIMESTAMPTZ,
                current_period_end TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_stripe_subscription_id
                ON subscriptions (stripe_subscription_id);

            CREATE INDEX IF NOT EXISTS idx_subscriptions_stripe_customer_id
                ON subscriptions (stripe_customer_id);",
        )
        .await?;

    info!("Database migrations completed");

    Ok(())
}
