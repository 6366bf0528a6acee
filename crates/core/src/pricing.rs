//! Payable-amount computation for a deal.
//!
//! The amount is a fixed formula over the deal price and three numeric
//! custom fields:
//!
//! `total = price + extra + (unit_price * unit_count) * 1.18`
//!
//! where the 1.18 markup applies to the product term only. Missing or
//! unparseable fields contribute zero; the computation itself never fails.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::deal::Deal;
use crate::fields::{SALE_EXTRA_FIELD_ID, TAX_MARKUP_PERCENT, UNIT_COUNT_FIELD_ID, UNIT_PRICE_FIELD_ID};

/// Payable amount in minor currency units, rounded to the nearest unit.
pub fn deal_amount_minor(deal: &Deal) -> i64 {
    let major = deal_amount_major(deal);
    let minor = (major * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    minor.try_into().unwrap_or(0)
}

/// Payable amount in major units, rounded to two decimal places.
pub fn deal_amount_major(deal: &Deal) -> Decimal {
    let extra = deal.custom_field_decimal(SALE_EXTRA_FIELD_ID).unwrap_or_default();
    let unit_price = deal.custom_field_decimal(UNIT_PRICE_FIELD_ID).unwrap_or_default();
    let unit_count = deal.custom_field_decimal(UNIT_COUNT_FIELD_ID).unwrap_or_default();
    let markup = Decimal::new(TAX_MARKUP_PERCENT, 2);

    let total = deal.price_decimal() + extra + unit_price * unit_count * markup;
    total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{deal_amount_major, deal_amount_minor};
    use crate::domain::deal::Deal;
    use crate::fields::{SALE_EXTRA_FIELD_ID, UNIT_COUNT_FIELD_ID, UNIT_PRICE_FIELD_ID};

    fn deal(price: i64, extra: &str, unit_price: &str, unit_count: &str) -> Deal {
        serde_json::from_value(json!({
            "id": 1,
            "price": price,
            "custom_fields_values": [
                {"field_id": SALE_EXTRA_FIELD_ID, "values": [{"value": extra}]},
                {"field_id": UNIT_PRICE_FIELD_ID, "values": [{"value": unit_price}]},
                {"field_id": UNIT_COUNT_FIELD_ID, "values": [{"value": unit_count}]}
            ]
        }))
        .expect("deal fixture")
    }

    #[test]
    fn computes_reference_amount() {
        // 100 + 20 + (10 * 2) * 1.18 = 143.60
        let deal = deal(100, "20", "10", "2");
        assert_eq!(deal_amount_major(&deal), Decimal::new(14360, 2));
        assert_eq!(deal_amount_minor(&deal), 14360);
    }

    #[test]
    fn is_pure_and_repeatable() {
        let deal = deal(100, "20", "10", "2");
        assert_eq!(deal_amount_minor(&deal), deal_amount_minor(&deal));
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let deal: Deal = serde_json::from_value(json!({"id": 1, "price": 250})).expect("deal");
        assert_eq!(deal_amount_minor(&deal), 25_000);
    }

    #[test]
    fn unparseable_fields_default_to_zero() {
        let deal = deal(100, "n/a", "10", "oops");
        // product term collapses to zero, extra is unparseable
        assert_eq!(deal_amount_minor(&deal), 10_000);
    }

    #[test]
    fn markup_applies_to_product_term_only() {
        let deal = deal(0, "100", "50", "1");
        // 100 + 50 * 1.18 = 159.00
        assert_eq!(deal_amount_minor(&deal), 15_900);
    }
}
