use chrono::{DateTime, Utc};
use sqlx::Row;

use paylink_core::domain::deal::DealId;
use paylink_core::domain::payment::PaymentDealRelation;

use super::{RelationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRelationRepository {
    pool: DbPool,
}

impl SqlRelationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_relation(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentDealRelation, RepositoryError> {
    let payment_id: String =
        row.try_get("payment_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deal_id: i64 =
        row.try_get("deal_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(PaymentDealRelation { payment_id, deal_id: DealId(deal_id), created_at })
}

#[async_trait::async_trait]
impl RelationRepository for SqlRelationRepository {
    async fn insert(&self, relation: PaymentDealRelation) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO payment_deal_relations (payment_id, deal_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(&relation.payment_id)
        .bind(relation.deal_id.0)
        .bind(relation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "payment `{}` is already mapped to a deal",
                    relation.payment_id
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentDealRelation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT payment_id, deal_id, created_at
             FROM payment_deal_relations WHERE payment_id = ?",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_relation(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_deal_id(
        &self,
        deal_id: DealId,
    ) -> Result<Vec<PaymentDealRelation>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT payment_id, deal_id, created_at
             FROM payment_deal_relations WHERE deal_id = ? ORDER BY created_at DESC",
        )
        .bind(deal_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_relation).collect::<Result<Vec<_>, _>>()
    }
}
