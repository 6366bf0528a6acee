//! Webhook reconciliation engine.
//!
//! Ties the pipeline together: archive the inbound webhook, extract the deal,
//! price it, issue a hosted checkout link, record the payment → deal relation,
//! and later reconcile the gateway callback back onto the deal. The engine
//! talks to Kommo and the gateway through traits so tests can run against
//! doubles.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use paylink_core::config::{AppConfig, GatewayConfig};
use paylink_core::domain::deal::{Deal, DealId};
use paylink_core::domain::payment::{
    build_order_id, parse_order_id, PaymentDealRelation, PaymentLink, PaymentLinkRequest,
};
use paylink_core::fields::{COMPANY_NAME_FIELD_IDS, CURRENCY, PAYMENT_ID_FIELD_ID, WON_STATUS_ID};
use paylink_core::pricing::deal_amount_minor;
use paylink_core::retry::{run_with_retry, RetryPolicy};
use paylink_core::webhook::extract::extract_deal_id;
use paylink_core::webhook::normalize::normalize_body;
use paylink_db::repositories::{
    ArchivedWebhook, RelationRepository, RepositoryError, WebhookArchiveRepository,
};
use paylink_gateway::{GatewayError, PaymentGateway};
use paylink_kommo::{CrmApi, DealBundle, KommoError};

/// Callback fields that may carry the payment outcome.
const STATUS_KEYS: &[&str] = &["status", "response_status", "order_status"];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("company name could not be resolved for deal {0}")]
    CompanyNameUnresolved(DealId),
    #[error("no deal found for payment `{payment_id}`")]
    DealUnresolved { payment_id: String },
    #[error("payment id field write could not be verified for deal {0}")]
    FieldWriteUnverified(DealId),
    #[error("payment gateway is not configured")]
    GatewayUnavailable,
    #[error(transparent)]
    Crm(#[from] KommoError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub currency: String,
    pub callback_url: String,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_gateway_config(&config.gateway)
    }

    pub fn from_gateway_config(gateway: &GatewayConfig) -> Self {
        Self {
            currency: CURRENCY.to_string(),
            callback_url: gateway.callback_url(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum WebhookOutcome {
    /// Body could not be decoded; it is archived and the receipt acknowledged.
    MalformedArchived,
    /// No gateway credentials; webhook archived, nothing else attempted.
    Degraded,
    /// No deal id found; a zero-amount, deal-less link was issued anyway.
    LinkWithoutDeal { payment: PaymentLink },
    Linked { deal_id: DealId, payment: PaymentLink, amount_minor: i64, field_verified: bool },
}

#[derive(Debug, PartialEq)]
pub enum CallbackOutcome {
    /// Non-success callback: recorded and acknowledged, deal untouched.
    Ignored { status: Option<String> },
    Reconciled { deal_id: DealId, payment_id: String, status_updated: bool },
}

pub struct ReconcileEngine {
    crm: Arc<dyn CrmApi>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    relations: Arc<dyn RelationRepository>,
    archive: Arc<dyn WebhookArchiveRepository>,
    settings: EngineSettings,
}

impl ReconcileEngine {
    pub fn new(
        crm: Arc<dyn CrmApi>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        relations: Arc<dyn RelationRepository>,
        archive: Arc<dyn WebhookArchiveRepository>,
        settings: EngineSettings,
    ) -> Self {
        Self { crm, gateway, relations, archive, settings }
    }

    pub fn gateway_available(&self) -> bool {
        self.gateway.is_some()
    }

    /// Full webhook pipeline. The archive write happens before any network
    /// call so a downstream failure never loses the inbound event, and it
    /// keeps the request headers and the undecoded body next to the parsed
    /// payload.
    pub async fn process_webhook(
        &self,
        content_type: Option<&str>,
        headers: Value,
        body: &[u8],
    ) -> Result<WebhookOutcome, EngineError> {
        let raw = String::from_utf8_lossy(body).into_owned();
        let normalized = normalize_body(content_type, body);
        let deal_id = normalized
            .payload()
            .and_then(|payload| extract_deal_id(payload, Some(&raw)))
            .map(DealId);

        self.archive
            .archive(ArchivedWebhook {
                received_at: Utc::now(),
                content_type: content_type.map(str::to_string),
                headers,
                payload: normalized.archive_value(),
                raw_body: raw,
                deal_id,
                malformed: normalized.is_malformed(),
            })
            .await?;

        if normalized.is_malformed() {
            warn!(event_name = "webhook.malformed", "undecodable webhook body archived");
            return Ok(WebhookOutcome::MalformedArchived);
        }

        let Some(gateway) = self.gateway.as_deref() else {
            warn!(
                event_name = "webhook.degraded",
                "gateway credentials missing; webhook archived only"
            );
            return Ok(WebhookOutcome::Degraded);
        };

        let Some(deal_id) = deal_id else {
            info!(event_name = "webhook.no_deal_id", "issuing deal-less payment link");
            let request = PaymentLinkRequest {
                amount_minor: 0,
                currency: self.settings.currency.clone(),
                description: "Unknown deal".to_string(),
                order_id: build_order_id(None),
                callback_url: self.settings.callback_url.clone(),
            };
            let payment = gateway.create_payment_link(&request).await?;
            return Ok(WebhookOutcome::LinkWithoutDeal { payment });
        };

        let deal = self.crm.get_lead(deal_id).await?;
        let amount_minor = deal_amount_minor(&deal);
        let company_name = self.resolve_company_name(&deal).await?;

        let request = PaymentLinkRequest {
            amount_minor,
            currency: self.settings.currency.clone(),
            description: company_name,
            order_id: build_order_id(Some(deal_id)),
            callback_url: self.settings.callback_url.clone(),
        };
        let payment = gateway.create_payment_link(&request).await?;

        self.relations
            .insert(PaymentDealRelation::new(payment.payment_id.clone(), deal_id))
            .await?;

        let note = format!(
            "Payment link created: {}\nPayment id: {}",
            payment.checkout_url, payment.payment_id
        );
        self.crm.create_note(deal_id, &note).await?;

        let field_verified = self.write_payment_id_field(deal_id, &payment.payment_id).await;

        info!(
            event_name = "webhook.linked",
            %deal_id,
            payment_id = %payment.payment_id,
            amount_minor,
            field_verified,
            "payment link issued"
        );
        Ok(WebhookOutcome::Linked { deal_id, payment, amount_minor, field_verified })
    }

    /// Company name for the checkout description, tried in order: related
    /// companies, embedded company, name-bearing custom fields. Nothing
    /// resolvable means no payment request is issued at all.
    async fn resolve_company_name(&self, deal: &Deal) -> Result<String, EngineError> {
        match self.crm.get_lead_companies(deal.id).await {
            Ok(companies) => {
                if let Some(name) = companies.iter().find_map(|company| company.display_name()) {
                    return Ok(name.to_string());
                }
            }
            Err(error) => {
                warn!(deal_id = %deal.id, %error, "company relation lookup failed");
            }
        }

        if let Some(name) = deal.embedded_company_name() {
            return Ok(name);
        }

        for field_id in COMPANY_NAME_FIELD_IDS {
            if let Some(name) = deal.custom_field_text(*field_id) {
                return Ok(name);
            }
        }

        Err(EngineError::CompanyNameUnresolved(deal.id))
    }

    /// Writes the payment id custom field and verifies by re-reading the
    /// deal. Retried once after the policy delay; a persistent mismatch is
    /// logged and tolerated, the payment itself stays created.
    async fn write_payment_id_field(&self, deal_id: DealId, payment_id: &str) -> bool {
        let result = run_with_retry(self.settings.retry, || {
            self.attempt_field_write(deal_id, payment_id)
        })
        .await;

        match result {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    event_name = "webhook.field_write_unverified",
                    %deal_id,
                    %error,
                    "payment id field write unverified; continuing"
                );
                false
            }
        }
    }

    async fn attempt_field_write(
        &self,
        deal_id: DealId,
        payment_id: &str,
    ) -> Result<(), EngineError> {
        self.crm.update_lead_custom_field(deal_id, PAYMENT_ID_FIELD_ID, payment_id).await?;

        let reread = self.crm.get_lead(deal_id).await?;
        if reread.custom_field_text(PAYMENT_ID_FIELD_ID).as_deref() == Some(payment_id) {
            Ok(())
        } else {
            Err(EngineError::FieldWriteUnverified(deal_id))
        }
    }

    /// Gateway callback reconciliation.
    pub async fn process_callback(&self, payload: &Value) -> Result<CallbackOutcome, EngineError> {
        let payment_id = string_field(payload, "payment_id");
        let order_id = string_field(payload, "order_id");

        if !is_success_callback(payload) {
            let status = callback_status(payload);
            info!(event_name = "callback.ignored", ?status, "non-success callback acknowledged");
            return Ok(CallbackOutcome::Ignored { status });
        }

        let deal_id =
            self.resolve_callback_deal(payment_id.as_deref(), order_id.as_deref()).await?;

        let status_updated = match self.crm.update_lead_status(deal_id, WON_STATUS_ID).await {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    event_name = "callback.status_update_failed",
                    %deal_id,
                    %error,
                    "won-status update failed; callback still acknowledged"
                );
                false
            }
        };

        let payment_ref = payment_id
            .clone()
            .or_else(|| order_id.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let amount = string_field(payload, "amount").unwrap_or_else(|| "?".to_string());
        let currency = string_field(payload, "currency")
            .unwrap_or_else(|| self.settings.currency.clone());
        let note =
            format!("Payment received.\nAmount: {amount} {currency}\nTransaction: {payment_ref}");

        let note_result =
            run_with_retry(self.settings.retry, || self.crm.create_note(deal_id, &note)).await;
        if let Err(error) = note_result {
            warn!(event_name = "callback.note_failed", %deal_id, %error, "note creation failed");
        }

        info!(
            event_name = "callback.reconciled",
            %deal_id,
            payment_id = %payment_ref,
            status_updated,
            "payment callback reconciled"
        );
        Ok(CallbackOutcome::Reconciled { deal_id, payment_id: payment_ref, status_updated })
    }

    /// Relation store first, then CRM custom-field search, then the
    /// `deal_<id>` prefix of the order id. The only hard failure path.
    async fn resolve_callback_deal(
        &self,
        payment_id: Option<&str>,
        order_id: Option<&str>,
    ) -> Result<DealId, EngineError> {
        if let Some(payment_id) = payment_id {
            match self.relations.find_by_payment_id(payment_id).await {
                Ok(Some(relation)) => return Ok(relation.deal_id),
                Ok(None) => {}
                Err(error) => warn!(%payment_id, %error, "relation lookup failed"),
            }

            match self.crm.find_lead_by_custom_field(PAYMENT_ID_FIELD_ID, payment_id).await {
                Ok(Some(lead)) => return Ok(lead.id),
                Ok(None) => {}
                Err(error) => warn!(%payment_id, %error, "crm payment-id search failed"),
            }
        }

        if let Some(order_id) = order_id {
            if let Some(deal_id) = parse_order_id(order_id) {
                return Ok(deal_id);
            }
        }

        Err(EngineError::DealUnresolved {
            payment_id: payment_id.or(order_id).unwrap_or("unknown").to_string(),
        })
    }

    pub async fn deal_bundle(&self, deal_id: DealId) -> Result<DealBundle, EngineError> {
        Ok(self.crm.get_deal_bundle(deal_id).await?)
    }

    pub async fn payment_status(&self, payment_id: &str) -> Result<Value, EngineError> {
        let gateway = self.gateway.as_deref().ok_or(EngineError::GatewayUnavailable)?;
        Ok(gateway.payment_status(payment_id).await?)
    }

    pub async fn cancel_payment(&self, payment_id: &str) -> Result<Value, EngineError> {
        let gateway = self.gateway.as_deref().ok_or(EngineError::GatewayUnavailable)?;
        Ok(gateway.cancel_payment(payment_id).await?)
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn is_success_callback(payload: &Value) -> bool {
    STATUS_KEYS
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .any(|status| matches!(status.to_ascii_lowercase().as_str(), "success" | "approved"))
}

fn callback_status(payload: &Value) -> Option<String> {
    STATUS_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
