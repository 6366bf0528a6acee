use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::deal::DealId;

/// Request for a hosted checkout link. Amounts are integer minor currency
/// units (tetri for GEL).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLinkRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub order_id: String,
    pub callback_url: String,
}

/// Gateway response for a created payment link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub checkout_url: String,
    pub payment_id: String,
}

/// Persisted payment → deal mapping, written once per issued link and
/// consulted during callback reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDealRelation {
    pub payment_id: String,
    pub deal_id: DealId,
    pub created_at: DateTime<Utc>,
}

impl PaymentDealRelation {
    pub fn new(payment_id: impl Into<String>, deal_id: DealId) -> Self {
        Self { payment_id: payment_id.into(), deal_id, created_at: Utc::now() }
    }
}

/// Builds the gateway order id. The deal id is embedded so callbacks remain
/// reconcilable without the relation store, and a random suffix keeps
/// duplicate webhook deliveries from colliding on the gateway side.
pub fn build_order_id(deal_id: Option<DealId>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];
    match deal_id {
        Some(deal_id) => format!("deal_{deal_id}_{suffix}"),
        None => format!("deal_unknown_{suffix}"),
    }
}

/// Parses the `deal_<id>` prefix back out of an order id.
pub fn parse_order_id(order_id: &str) -> Option<DealId> {
    let rest = order_id.strip_prefix("deal_")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(DealId)
}
