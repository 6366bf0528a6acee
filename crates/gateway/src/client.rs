use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, error};

use paylink_core::config::{GatewayConfig, GatewayCredentials};
use paylink_core::domain::payment::{PaymentLink, PaymentLinkRequest};

use crate::sign::sign_request;
use crate::{GatewayError, PaymentGateway};

const PROTOCOL_VERSION: &str = "1.0";

pub struct FlittClient {
    client: Client,
    api_base_url: String,
    checkout_base_url: String,
    credentials: GatewayCredentials,
}

impl FlittClient {
    pub fn new(config: &GatewayConfig, credentials: GatewayCredentials) -> Self {
        Self {
            client: Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            checkout_base_url: config.checkout_base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Hosted checkout page for an already-created payment.
    pub fn pay_page_url(&self, payment_id: &str) -> String {
        format!("{}/pay/{payment_id}", self.checkout_base_url)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}/{}", self.api_base_url, path.trim_start_matches('/'));
        debug!(%method, %url, "gateway request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(self.credentials.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!(%method, %url, status = status.as_u16(), body = %text, "gateway api error");
            return Err(GatewayError::Api { status: status.as_u16(), body: text });
        }

        serde_json::from_str::<Value>(&text)
            .map_err(|e| GatewayError::Decode(format!("{url}: {e}")))
    }
}

/// Payment ids arrive either as JSON strings or numbers.
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for FlittClient {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        let amount = request.amount_minor.to_string();
        let params: Vec<(&str, String)> = vec![
            ("amount", amount.clone()),
            ("currency", request.currency.clone()),
            ("merchant_id", self.credentials.merchant_id.clone()),
            ("order_desc", request.description.clone()),
            ("order_id", request.order_id.clone()),
            ("response_url", request.callback_url.clone()),
            ("server_callback_url", request.callback_url.clone()),
            ("version", PROTOCOL_VERSION.to_string()),
        ];
        let signature =
            sign_request(self.credentials.merchant_secret.expose_secret(), params);

        let body = json!({
            "request": {
                "amount": amount,
                "currency": request.currency,
                "merchant_id": self.credentials.merchant_id,
                "order_desc": request.description,
                "order_id": request.order_id,
                "response_url": request.callback_url,
                "server_callback_url": request.callback_url,
                "version": PROTOCOL_VERSION,
                "signature": signature,
            }
        });

        let payload = self.request(Method::POST, "checkout/url", Some(body)).await?;
        let response = &payload["response"];

        if response["response_status"].as_str() == Some("failure") {
            let detail = response["error_message"]
                .as_str()
                .unwrap_or("gateway reported failure without detail")
                .to_string();
            error!(order_id = %request.order_id, %detail, "checkout link rejected");
            return Err(GatewayError::Rejected(detail));
        }

        let checkout_url = response["checkout_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode("response.checkout_url missing".to_string()))?;
        let payment_id = value_as_string(&response["payment_id"])
            .ok_or_else(|| GatewayError::Decode("response.payment_id missing".to_string()))?;

        Ok(PaymentLink { checkout_url, payment_id })
    }

    async fn payment_status(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.request(Method::GET, &format!("payments/{payment_id}"), None).await
    }

    async fn cancel_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.request(Method::POST, &format!("payments/{payment_id}/cancel"), Some(json!({})))
            .await
    }
}
