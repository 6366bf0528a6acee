use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use paylink_core::domain::deal::DealId;

use super::{ArchivedWebhook, RepositoryError, WebhookArchiveRepository};
use crate::DbPool;

pub struct SqlWebhookArchiveRepository {
    pool: DbPool,
}

impl SqlWebhookArchiveRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ArchivedWebhook, RepositoryError> {
    let received_at_str: String =
        row.try_get("received_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content_type: Option<String> =
        row.try_get("content_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let headers_str: String =
        row.try_get("headers").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let payload_str: String =
        row.try_get("payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let raw_body: String =
        row.try_get("raw_body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deal_id: Option<i64> =
        row.try_get("deal_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let malformed: i64 =
        row.try_get("malformed").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let received_at = DateTime::parse_from_rfc3339(&received_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let headers = serde_json::from_str::<Value>(&headers_str)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let payload = serde_json::from_str::<Value>(&payload_str)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ArchivedWebhook {
        received_at,
        content_type,
        headers,
        payload,
        raw_body,
        deal_id: deal_id.map(DealId),
        malformed: malformed != 0,
    })
}

#[async_trait::async_trait]
impl WebhookArchiveRepository for SqlWebhookArchiveRepository {
    async fn archive(&self, entry: ArchivedWebhook) -> Result<(), RepositoryError> {
        let headers = serde_json::to_string(&entry.headers)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO webhook_archive
                 (received_at, content_type, headers, payload, raw_body, deal_id, malformed)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.received_at.to_rfc3339())
        .bind(&entry.content_type)
        .bind(headers)
        .bind(payload)
        .bind(&entry.raw_body)
        .bind(entry.deal_id.map(|id| id.0))
        .bind(i64::from(entry.malformed))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ArchivedWebhook>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT received_at, content_type, headers, payload, raw_body, deal_id, malformed
             FROM webhook_archive ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{SubsecRound, Utc};
    use serde_json::json;

    use paylink_core::domain::deal::DealId;

    use crate::connect;
    use crate::connection::memory_config;
    use crate::migrations::run_pending;
    use crate::repositories::{
        ArchivedWebhook, SqlWebhookArchiveRepository, WebhookArchiveRepository,
    };

    async fn test_repo() -> SqlWebhookArchiveRepository {
        let pool = connect(&memory_config()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        SqlWebhookArchiveRepository::new(pool)
    }

    #[tokio::test]
    async fn archives_and_reads_back_payloads() {
        let repo = test_repo().await;
        let entry = ArchivedWebhook {
            received_at: Utc::now().trunc_subsecs(3),
            content_type: Some("application/json".to_string()),
            headers: json!({"content-type": "application/json"}),
            payload: json!({"leads": {"add": [{"id": 777}]}}),
            raw_body: r#"{"leads":{"add":[{"id":777}]}}"#.to_string(),
            deal_id: Some(DealId(777)),
            malformed: false,
        };
        repo.archive(entry.clone()).await.expect("archive");

        let recent = repo.recent(10).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], entry);
    }

    #[tokio::test]
    async fn raw_form_body_survives_archival_byte_for_byte() {
        let repo = test_repo().await;
        let raw = "leads%5Badd%5D%5B0%5D%5Bid%5D=777&leads%5Badd%5D%5B0%5D%5Bstatus_id%5D=57";
        let entry = ArchivedWebhook {
            received_at: Utc::now().trunc_subsecs(3),
            content_type: Some("application/x-www-form-urlencoded".to_string()),
            headers: json!({
                "content-type": "application/x-www-form-urlencoded",
                "user-agent": "amoCRM-Webhooks/3.0",
            }),
            payload: json!({"leads": {"add": [{"id": "777", "status_id": "57"}]}}),
            raw_body: raw.to_string(),
            deal_id: Some(DealId(777)),
            malformed: false,
        };
        repo.archive(entry).await.expect("archive");

        let recent = repo.recent(1).await.expect("recent");
        assert_eq!(recent[0].raw_body, raw);
        assert_eq!(recent[0].headers["user-agent"], json!("amoCRM-Webhooks/3.0"));
    }

    #[tokio::test]
    async fn malformed_entries_are_kept_with_the_flag_set() {
        let repo = test_repo().await;
        let entry = ArchivedWebhook {
            received_at: Utc::now().trunc_subsecs(3),
            content_type: None,
            headers: json!({}),
            payload: json!({"error": "malformed_body", "reason": "bad"}),
            raw_body: "{oops".to_string(),
            deal_id: None,
            malformed: true,
        };
        repo.archive(entry).await.expect("archive");

        let recent = repo.recent(10).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert!(recent[0].malformed);
        assert_eq!(recent[0].raw_body, "{oops");
        assert_eq!(recent[0].deal_id, None);
    }

    #[tokio::test]
    async fn recent_returns_newest_first_and_respects_limit() {
        let repo = test_repo().await;
        for n in 1..=3 {
            let entry = ArchivedWebhook {
                received_at: Utc::now().trunc_subsecs(3),
                content_type: Some("application/json".to_string()),
                headers: json!({"content-type": "application/json"}),
                payload: json!({"n": n}),
                raw_body: format!(r#"{{"n":{n}}}"#),
                deal_id: None,
                malformed: false,
            };
            repo.archive(entry).await.expect("archive");
        }

        let recent = repo.recent(2).await.expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, json!({"n": 3}));
        assert_eq!(recent[1].payload, json!({"n": 2}));
    }
}
