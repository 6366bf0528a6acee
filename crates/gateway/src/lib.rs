//! Flitt payment-gateway REST client.
//!
//! Hosted-checkout link creation with SHA-1 request signing, plus status and
//! cancellation lookups. The engine depends on the [`PaymentGateway`] trait;
//! [`FlittClient`] is the production implementation.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use paylink_core::domain::payment::{PaymentLink, PaymentLinkRequest};

pub mod client;
pub mod sign;

pub use client::FlittClient;
pub use sign::sign_request;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError>;

    async fn payment_status(&self, payment_id: &str) -> Result<Value, GatewayError>;

    async fn cancel_payment(&self, payment_id: &str) -> Result<Value, GatewayError>;
}
