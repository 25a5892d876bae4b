use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

use crate::pool::DbPool;
use services::billing::{
    NewSubscription, PlanType, RegisteredSubscription, Subscription, SubscriptionRepository,
    SubscriptionStatus, SubscriptionSync,
};
use services::UserId;

pub struct PostgresSubscriptionRepository {
    pool: DbPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "user_id, stripe_customer_id, stripe_subscription_id, status, \
     plan_type, trial_ends_at, current_period_end, created_at, updated_at";

fn map_row(row: &Row) -> anyhow::Result<Subscription> {
    let status_str: String = row.get("status");
    let status = SubscriptionStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown subscription status in database: {}", status_str))?;

    let plan_type = row
        .get::<_, Option<String>>("plan_type")
        .map(|s| {
            PlanType::parse(&s)
                .ok_or_else(|| anyhow::anyhow!("Unknown plan type in database: {}", s))
        })
        .transpose()?;

    Ok(Subscription {
        user_id: UserId(row.get("user_id")),
        stripe_customer_id: row.get("stripe_customer_id"),
        stripe_subscription_id: row.get("stripe_subscription_id"),
        status,
        plan_type,
        trial_ends_at: row.get("trial_ends_at"),
        current_period_end: row.get("current_period_end"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn get_by_user(&self, user_id: UserId) -> anyhow::Result<Option<Subscription>> {
        tracing::debug!("Repository: Fetching subscription for user_id={}", user_id);

        let client = self.pool.get().await?;

        let statement = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = client.query_opt(statement.as_str(), &[&user_id.0]).await?;

        row.as_ref().map(map_row).transpose()
    }

    async fn insert_if_absent(
        &self,
        subscription: NewSubscription,
    ) -> anyhow::Result<RegisteredSubscription> {
        tracing::info!(
            "Repository: Registering subscription for user_id={}",
            subscription.user_id
        );

        let client = self.pool.get().await?;

        // Conflict-guarded insert. RETURNING yields a row only when the
        // insert actually happened, which doubles as the is_new flag.
        let statement = format!(
            "INSERT INTO subscriptions (
                user_id, status, plan_type, trial_ends_at, current_period_end
             )
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );
        let inserted = client
            .query_opt(
                statement.as_str(),
                &[
                    &subscription.user_id.0,
                    &subscription.status.as_str(),
                    &subscription.plan_type.map(|p| p.as_str()),
                    &subscription.trial_ends_at,
                    &subscription.current_period_end,
                ],
            )
            .await?;

        if let Some(row) = inserted {
            return Ok(RegisteredSubscription {
                subscription: map_row(&row)?,
                is_new: true,
            });
        }

        let existing = self
            .get_by_user(subscription.user_id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Subscription insert conflicted but no record found for user_id={}",
                    subscription.user_id
                )
            })?;

        Ok(RegisteredSubscription {
            subscription: existing,
            is_new: false,
        })
    }

    async fn set_customer_id(&self, user_id: UserId, customer_id: &str) -> anyhow::Result<()> {
        tracing::info!(
            "Repository: Storing Stripe customer - user_id={}, customer_id={}",
            user_id,
            customer_id
        );

        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO subscriptions (user_id, stripe_customer_id, status)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (user_id)
                 DO UPDATE SET
                     stripe_customer_id = EXCLUDED.stripe_customer_id,
                     updated_at = NOW()",
                &[
                    &user_id.0,
                    &customer_id,
                    &SubscriptionStatus::Pending.as_str(),
                ],
            )
            .await?;

        Ok(())
    }

    async fn upsert_synced(&self, sync: SubscriptionSync) -> anyhow::Result<Subscription> {
        tracing::info!(
            "Repository: Syncing subscription - user_id={}, subscription_id={}",
            sync.user_id,
            sync.stripe_subscription_id
        );

        let client = self.pool.get().await?;

        let statement = format!(
            "INSERT INTO subscriptions (
                user_id, stripe_customer_id, stripe_subscription_id,
                status, plan_type, trial_ends_at, current_period_end
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id)
             DO UPDATE SET
                 stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                 stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                 status = EXCLUDED.status,
                 plan_type = EXCLUDED.plan_type,
                 trial_ends_at = EXCLUDED.trial_ends_at,
                 current_period_end = EXCLUDED.current_period_end,
                 updated_at = NOW()
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );
        let row = client
            .query_one(
                statement.as_str(),
                &[
                    &sync.user_id.0,
                    &sync.stripe_customer_id,
                    &sync.stripe_subscription_id,
                    &sync.status.as_str(),
                    &sync.plan_type.as_str(),
                    &sync.trial_ends_at,
                    &sync.current_period_end,
                ],
            )
            .await?;

        map_row(&row)
    }

    async fn update_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
        current_period_end: Option<DateTime<Utc>>,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<u64> {
        tracing::info!(
            "Repository: Updating subscription - subscription_id={}, status={}",
            stripe_subscription_id,
            status
        );

        let client = self.pool.get().await?;

        let rows = client
            .execute(
                "UPDATE subscriptions
                 SET status = $2,
                     current_period_end = $3,
                     trial_ends_at = $4,
                     updated_at = NOW()
                 WHERE stripe_subscription_id = $1",
                &[
                    &stripe_subscription_id,
                    &status.as_str(),
                    &current_period_end,
                    &trial_ends_at,
                ],
            )
            .await?;

        Ok(rows)
    }

    async fn update_status_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<u64> {
        tracing::info!(
            "Repository: Updating subscription status - subscription_id={}, status={}",
            stripe_subscription_id,
            status
        );

        let client = self.pool.get().await?;

        let rows = client
            .execute(
                "UPDATE subscriptions
                 SET status = $2, updated_at = NOW()
                 WHERE stripe_subscription_id = $1",
                &[&stripe_subscription_id, &status.as_str()],
            )
            .await?;

        Ok(rows)
    }

    async fn update_status_by_user(
        &self,
        user_id: UserId,
        status: SubscriptionStatus,
    ) -> anyhow::Result<u64> {
        tracing::info!(
            "Repository: Updating subscription status - user_id={}, status={}",
            user_id,
            status
        );

        let client = self.pool.get().await?;

        let rows = client
            .execute(
                "UPDATE subscriptions
                 SET status = $2, updated_at = NOW()
                 WHERE user_id = $1",
                &[&user_id.0, &status.as_str()],
            )
            .await?;

        Ok(rows)
    }
}
