pub mod config;
pub mod domain;
pub mod fields;
pub mod pricing;
pub mod retry;
pub mod webhook;

pub use domain::deal::{CustomFieldValue, Deal, DealId, EmbeddedCompany, EmbeddedEntities};
pub use domain::payment::{
    build_order_id, parse_order_id, PaymentDealRelation, PaymentLink, PaymentLinkRequest,
};
pub use pricing::deal_amount_minor;
pub use retry::{run_with_retry, RetryPolicy};
pub use webhook::extract::extract_deal_id;
pub use webhook::normalize::{normalize_body, NormalizedBody};
