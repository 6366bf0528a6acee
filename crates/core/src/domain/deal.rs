use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kommo lead identifier. Kommo calls the record a "lead"; the business
/// process calls it a deal. Both names refer to the same integer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DealId(pub i64);

impl std::fmt::Display for DealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One value slot of a Kommo custom field. Kommo serializes numbers either
/// as JSON numbers or as strings depending on the field type, so the raw
/// value is kept as [`Value`] and coerced on access.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub field_id: i64,
    #[serde(default)]
    pub values: Vec<CustomFieldValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedCompany {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedContact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedEntities {
    #[serde(default)]
    pub companies: Vec<EmbeddedCompany>,
    #[serde(default)]
    pub contacts: Vec<EmbeddedContact>,
}

/// A Kommo deal record as returned by `GET /api/v4/leads/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub status_id: Option<i64>,
    #[serde(default)]
    pub custom_fields_values: Option<Vec<CustomField>>,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<EmbeddedEntities>,
}

impl Deal {
    /// First value of the given custom field, if present.
    pub fn custom_field_value(&self, field_id: i64) -> Option<&Value> {
        self.custom_fields_values
            .as_deref()?
            .iter()
            .find(|field| field.field_id == field_id)?
            .values
            .first()
            .map(|slot| &slot.value)
    }

    /// Custom field coerced to text; numbers are rendered, empty strings
    /// count as absent.
    pub fn custom_field_text(&self, field_id: i64) -> Option<String> {
        match self.custom_field_value(field_id)? {
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    /// Custom field coerced to a decimal, `None` when absent or unparseable.
    pub fn custom_field_decimal(&self, field_id: i64) -> Option<Decimal> {
        match self.custom_field_value(field_id)? {
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Some(Decimal::from(int))
                } else {
                    number.as_f64().and_then(Decimal::from_f64_retain)
                }
            }
            Value::String(text) => text.trim().parse::<Decimal>().ok(),
            _ => None,
        }
    }

    pub fn price_decimal(&self) -> Decimal {
        self.price.and_then(Decimal::from_f64_retain).unwrap_or_default()
    }

    pub fn embedded_company_name(&self) -> Option<String> {
        self.embedded
            .as_ref()?
            .companies
            .iter()
            .find_map(|company| company.name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}
