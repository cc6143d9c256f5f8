use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{SyncLogRepository, TokenRepository};
use crate::models::product::{ProductRow, ProductUpdate};
use crate::models::sync_log::{NewSyncLogEntry, SyncLogRow, SyncLogSummary};
use crate::models::token::Token;

/// Row id of the single marketplace token.
const TOKEN_ROW_ID: i32 = 1;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Pool that connects on first use. Lets the router be built without a live database.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Product Operations --

    pub async fn get_product(&self, id: i64) -> anyhow::Result<Option<ProductRow>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"SELECT id, name, description, price, current_stock, category, images,
                      attributes, meli_item_id, updated_at
               FROM products WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Apply a partial update and return the committed row.
    pub async fn update_product(
        &self,
        id: i64,
        update: &ProductUpdate,
    ) -> anyhow::Result<Option<ProductRow>> {
        let images = update
            .images
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query_as::<_, ProductRow>(
            r#"UPDATE products SET
                   name = COALESCE($2, name),
                   description = COALESCE($3, description),
                   price = COALESCE($4, price),
                   current_stock = COALESCE($5, current_stock),
                   category = COALESCE($6, category),
                   images = COALESCE($7, images),
                   attributes = COALESCE($8, attributes),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING id, name, description, price, current_stock, category, images,
                         attributes, meli_item_id, updated_at"#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.price)
        .bind(update.current_stock)
        .bind(&update.category)
        .bind(images)
        .bind(&update.attributes)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // -- Sync Log Operations --

    pub async fn list_sync_logs(
        &self,
        product_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<SyncLogRow>> {
        let rows = sqlx::query_as::<_, SyncLogRow>(
            r#"SELECT id, product_id, meli_item_id AS remote_item_id, success,
                      error_details, created_at
               FROM meli_sync_log
               WHERE ($1::BIGINT IS NULL OR product_id = $1)
               ORDER BY created_at DESC, id DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(product_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn sync_log_summary_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<SyncLogSummary> {
        let (succeeded, failed) = sqlx::query_as::<_, (i64, i64)>(
            r#"SELECT COUNT(*) FILTER (WHERE success),
                      COUNT(*) FILTER (WHERE NOT success)
               FROM meli_sync_log
               WHERE created_at >= $1"#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(SyncLogSummary { succeeded, failed })
    }

    /// Delete sync log rows older than `cutoff`. Retention only; never called by the sync path.
    pub async fn prune_sync_logs(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM meli_sync_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn load_token(&self) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, Token>(
            "SELECT access_token, refresh_token, expires_at FROM meli_tokens WHERE id = $1",
        )
        .bind(TOKEN_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn save_token(&self, token: &Token) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meli_tokens (id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(TOKEN_ROW_ID)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SyncLogRepository for PgStore {
    async fn insert_sync_log(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meli_sync_log (product_id, meli_item_id, success, error_details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.product_id)
        .bind(&entry.remote_item_id)
        .bind(entry.success)
        .bind(&entry.error_details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
