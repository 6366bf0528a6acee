//! Kommo account-specific identifiers used by the payment pipeline.
//!
//! The field ids are fixed per the connected Kommo account configuration and
//! are referenced from the pricing formula, the payment-id write-back, and
//! the company-name fallback.

/// Flat surcharge added on top of the deal price.
pub const SALE_EXTRA_FIELD_ID: i64 = 985_221;

/// Per-unit price multiplied with [`UNIT_COUNT_FIELD_ID`].
pub const UNIT_PRICE_FIELD_ID: i64 = 888_918;

/// Unit count multiplied with [`UNIT_PRICE_FIELD_ID`].
pub const UNIT_COUNT_FIELD_ID: i64 = 985_181;

/// Custom field on the deal that receives the gateway payment id after a
/// payment link is issued. Consulted again during callback reconciliation.
pub const PAYMENT_ID_FIELD_ID: i64 = 985_229;

/// Name-bearing custom fields tried when no related or embedded company is
/// available, in order.
pub const COMPANY_NAME_FIELD_IDS: &[i64] = &[985_193, 985_199];

/// Kommo's built-in "closed - won" pipeline status.
pub const WON_STATUS_ID: i64 = 142;

/// Tax markup applied to the unit-price × unit-count product term.
pub const TAX_MARKUP_PERCENT: i64 = 118;

/// Settlement currency for issued payment links.
pub const CURRENCY: &str = "GEL";
