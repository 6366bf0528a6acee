use std::collections::HashMap;

use tokio::sync::RwLock;

use paylink_core::domain::deal::DealId;
use paylink_core::domain::payment::PaymentDealRelation;

use super::{ArchivedWebhook, RelationRepository, RepositoryError, WebhookArchiveRepository};

#[derive(Default)]
pub struct InMemoryRelationRepository {
    relations: RwLock<HashMap<String, PaymentDealRelation>>,
}

#[async_trait::async_trait]
impl RelationRepository for InMemoryRelationRepository {
    async fn insert(&self, relation: PaymentDealRelation) -> Result<(), RepositoryError> {
        let mut relations = self.relations.write().await;
        if relations.contains_key(&relation.payment_id) {
            return Err(RepositoryError::Conflict(format!(
                "payment `{}` is already mapped to a deal",
                relation.payment_id
            )));
        }
        relations.insert(relation.payment_id.clone(), relation);
        Ok(())
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentDealRelation>, RepositoryError> {
        let relations = self.relations.read().await;
        Ok(relations.get(payment_id).cloned())
    }

    async fn find_by_deal_id(
        &self,
        deal_id: DealId,
    ) -> Result<Vec<PaymentDealRelation>, RepositoryError> {
        let relations = self.relations.read().await;
        let mut matching: Vec<PaymentDealRelation> =
            relations.values().filter(|relation| relation.deal_id == deal_id).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryWebhookArchiveRepository {
    entries: RwLock<Vec<ArchivedWebhook>>,
}

impl InMemoryWebhookArchiveRepository {
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl WebhookArchiveRepository for InMemoryWebhookArchiveRepository {
    async fn archive(&self, entry: ArchivedWebhook) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ArchivedWebhook>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use paylink_core::domain::deal::DealId;
    use paylink_core::domain::payment::PaymentDealRelation;

    use crate::repositories::{
        ArchivedWebhook, InMemoryRelationRepository, InMemoryWebhookArchiveRepository,
        RelationRepository, RepositoryError, WebhookArchiveRepository,
    };

    #[tokio::test]
    async fn in_memory_relation_repo_round_trip() {
        let repo = InMemoryRelationRepository::default();
        let relation = PaymentDealRelation::new("pay_1".to_string(), DealId(5));
        repo.insert(relation.clone()).await.expect("insert");

        assert_eq!(repo.find_by_payment_id("pay_1").await.expect("query"), Some(relation));
        assert_eq!(repo.find_by_deal_id(DealId(5)).await.expect("query").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_relation_repo_rejects_duplicates() {
        let repo = InMemoryRelationRepository::default();
        repo.insert(PaymentDealRelation::new("pay_1".to_string(), DealId(1)))
            .await
            .expect("insert");

        let error = repo
            .insert(PaymentDealRelation::new("pay_1".to_string(), DealId(2)))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn in_memory_archive_keeps_every_entry() {
        let repo = InMemoryWebhookArchiveRepository::default();
        for n in 1..=3 {
            repo.archive(ArchivedWebhook {
                received_at: Utc::now(),
                content_type: None,
                headers: json!({}),
                payload: json!({"n": n}),
                raw_body: format!(r#"{{"n":{n}}}"#),
                deal_id: None,
                malformed: n == 2,
            })
            .await
            .expect("archive");
        }

        assert_eq!(repo.len().await, 3);
        let recent = repo.recent(2).await.expect("recent");
        assert_eq!(recent[0].payload, json!({"n": 3}));
        assert_eq!(recent[1].payload, json!({"n": 2}));
    }
}
