use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use paylink_core::domain::deal::DealId;
use paylink_core::domain::payment::PaymentDealRelation;

pub mod archive;
pub mod memory;
pub mod relation;

pub use archive::SqlWebhookArchiveRepository;
pub use memory::{InMemoryRelationRepository, InMemoryWebhookArchiveRepository};
pub use relation::SqlRelationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Payment-to-deal relation rows. `insert` fails with
/// [`RepositoryError::Conflict`] when the payment id is already mapped:
/// a relation is written exactly once, at link-creation time.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    async fn insert(&self, relation: PaymentDealRelation) -> Result<(), RepositoryError>;

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentDealRelation>, RepositoryError>;

    async fn find_by_deal_id(
        &self,
        deal_id: DealId,
    ) -> Result<Vec<PaymentDealRelation>, RepositoryError>;
}

/// A webhook request captured before any processing. Archival happens first
/// so a failure later in the pipeline never loses the inbound event. The raw
/// body and request headers are kept verbatim alongside the parsed payload,
/// so every request stays byte-recoverable after decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchivedWebhook {
    pub received_at: DateTime<Utc>,
    pub content_type: Option<String>,
    /// Request headers as a JSON object of name → value.
    pub headers: Value,
    pub payload: Value,
    /// The body exactly as received, before any decoding.
    pub raw_body: String,
    pub deal_id: Option<DealId>,
    pub malformed: bool,
}

#[async_trait]
pub trait WebhookArchiveRepository: Send + Sync {
    async fn archive(&self, entry: ArchivedWebhook) -> Result<(), RepositoryError>;

    async fn recent(&self, limit: u32) -> Result<Vec<ArchivedWebhook>, RepositoryError>;
}
