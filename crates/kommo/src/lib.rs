//! Kommo CRM REST client.
//!
//! The engine talks to Kommo through the [`CrmApi`] trait so tests can swap
//! in doubles; [`KommoClient`] is the production implementation over the
//! v4 REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use paylink_core::domain::deal::{Deal, DealId};

pub mod client;

pub use client::KommoClient;

#[derive(Debug, Error)]
pub enum KommoError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("kommo api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Company {
    /// Trimmed non-empty company name.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }
}

/// A deal with its related entities, for the diagnostic endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealBundle {
    pub lead: Deal,
    pub contacts: Vec<Contact>,
    pub companies: Vec<Company>,
}

#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn get_lead(&self, id: DealId) -> Result<Deal, KommoError>;

    async fn get_contact(&self, id: i64) -> Result<Contact, KommoError>;

    async fn get_company(&self, id: i64) -> Result<Company, KommoError>;

    /// Companies related to the lead; individual fetch failures are skipped.
    async fn get_lead_companies(&self, id: DealId) -> Result<Vec<Company>, KommoError>;

    async fn create_note(&self, lead_id: DealId, text: &str) -> Result<(), KommoError>;

    async fn update_lead_custom_field(
        &self,
        lead_id: DealId,
        field_id: i64,
        value: &str,
    ) -> Result<(), KommoError>;

    async fn update_lead_status(&self, lead_id: DealId, status_id: i64)
        -> Result<(), KommoError>;

    /// First lead whose custom field `field_id` equals `value`, via the
    /// full-text query endpoint.
    async fn find_lead_by_custom_field(
        &self,
        field_id: i64,
        value: &str,
    ) -> Result<Option<Deal>, KommoError>;

    async fn get_deal_bundle(&self, lead_id: DealId) -> Result<DealBundle, KommoError>;
}
