//! External HTTP surface: webhook intake, callback reconciliation, and the
//! payment diagnostic endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::error;

use paylink_core::domain::deal::DealId;
use paylink_core::webhook::normalize::normalize_body;
use paylink_kommo::KommoError;

use crate::reconcile::{CallbackOutcome, EngineError, ReconcileEngine, WebhookOutcome};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconcileEngine>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    status: &'static str,
    error: String,
}

fn api_error(error: impl ToString) -> Json<ApiError> {
    Json(ApiError { status: "error", error: error.to_string() })
}

pub fn router(engine: Arc<ReconcileEngine>) -> Router {
    Router::new()
        .route("/kommo-webhooks", post(kommo_webhook))
        .route("/payment-callback", post(payment_callback))
        .route("/test-deal/{id}", get(test_deal))
        .route("/payment-status/{id}", get(payment_status))
        .route("/cancel-payment/{id}", post(cancel_payment))
        .with_state(AppState { engine })
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok())
}

/// Header map as a JSON object for the webhook archive. Non-UTF-8 values
/// are skipped; repeated headers keep the last value.
fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            map.insert(name.as_str().to_string(), Value::String(text.to_string()));
        }
    }
    Value::Object(map)
}

/// Webhook intake. The CRM retries aggressively on non-2xx, so receipt is
/// acknowledged with 200 whenever the event has been archived, even if
/// processing failed after that point. Only an archive failure is a 500.
async fn kommo_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    match state.engine.process_webhook(content_type(&headers), headers_json(&headers), &body).await
    {
        Ok(WebhookOutcome::Linked { deal_id, payment, amount_minor, .. }) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "lead_id": deal_id.0,
                "payment_id": payment.payment_id,
                "checkout_url": payment.checkout_url,
                "amount": amount_minor,
            })),
        ),
        Ok(WebhookOutcome::LinkWithoutDeal { payment }) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "lead_id": Value::Null,
                "payment_id": payment.payment_id,
                "checkout_url": payment.checkout_url,
            })),
        ),
        Ok(WebhookOutcome::MalformedArchived) => {
            (StatusCode::OK, Json(json!({"status": "accepted", "archived": true})))
        }
        Ok(WebhookOutcome::Degraded) => (
            StatusCode::OK,
            Json(json!({"status": "accepted", "archived": true, "mode": "degraded"})),
        ),
        Err(EngineError::Repository(error)) => {
            error!(%error, "webhook archive failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": "archive failed"})),
            )
        }
        Err(error) => {
            error!(%error, "webhook processing failed after archive");
            (StatusCode::OK, Json(json!({"status": "error", "error": error.to_string()})))
        }
    }
}

async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let normalized = normalize_body(content_type(&headers), &body);
    let Some(payload) = normalized.payload() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": "undecodable callback body"})),
        );
    };

    match state.engine.process_callback(payload).await {
        Ok(CallbackOutcome::Reconciled { deal_id, payment_id, .. }) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "payment_id": payment_id,
                "lead_id": deal_id.0,
            })),
        ),
        Ok(CallbackOutcome::Ignored { status }) => {
            (StatusCode::OK, Json(json!({"status": "ignored", "payment_status": status})))
        }
        Err(error @ EngineError::DealUnresolved { .. }) => {
            (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "error": error.to_string()})))
        }
        Err(error) => {
            error!(%error, "callback processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": error.to_string()})),
            )
        }
    }
}

async fn test_deal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    match state.engine.deal_bundle(DealId(id)).await {
        Ok(bundle) => Ok(Json(json!({
            "lead": bundle.lead,
            "contacts": bundle.contacts,
            "companies": bundle.companies,
        }))),
        Err(EngineError::Crm(KommoError::Api { status: 404, .. })) => {
            Err((StatusCode::NOT_FOUND, api_error(format!("deal {id} not found"))))
        }
        Err(error) => {
            error!(%error, deal_id = id, "deal diagnostic failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, api_error(error)))
        }
    }
}

async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    match state.engine.payment_status(&id).await {
        Ok(status) => Ok(Json(status)),
        Err(error) => Err(payment_endpoint_error(error)),
    }
}

async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    match state.engine.cancel_payment(&id).await {
        Ok(result) => Ok(Json(result)),
        Err(error) => Err(payment_endpoint_error(error)),
    }
}

fn payment_endpoint_error(error: EngineError) -> (StatusCode, Json<ApiError>) {
    match error {
        EngineError::GatewayUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            api_error("payment service unavailable"),
        ),
        error => {
            error!(%error, "payment endpoint failed");
            (StatusCode::BAD_GATEWAY, api_error(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use paylink_core::domain::deal::{Deal, DealId};
    use paylink_core::domain::payment::{PaymentLink, PaymentLinkRequest};
    use paylink_core::retry::RetryPolicy;
    use paylink_db::repositories::{InMemoryRelationRepository, InMemoryWebhookArchiveRepository};
    use paylink_gateway::{GatewayError, PaymentGateway};
    use paylink_kommo::{Company, Contact, CrmApi, DealBundle, KommoError};

    use crate::reconcile::{EngineSettings, ReconcileEngine};
    use crate::routes::router;

    struct StubCrm;

    #[async_trait]
    impl CrmApi for StubCrm {
        async fn get_lead(&self, id: DealId) -> Result<Deal, KommoError> {
            Ok(serde_json::from_value(json!({
                "id": id.0,
                "price": 100,
                "custom_fields_values": [
                    {"field_id": 985_221, "values": [{"value": "20"}]},
                    {"field_id": 888_918, "values": [{"value": "10"}]},
                    {"field_id": 985_181, "values": [{"value": "2"}]}
                ],
                "_embedded": {"companies": [{"id": 5, "name": "Acme LLC"}]}
            }))
            .expect("deal fixture"))
        }

        async fn get_contact(&self, id: i64) -> Result<Contact, KommoError> {
            Ok(Contact { id, name: None })
        }

        async fn get_company(&self, id: i64) -> Result<Company, KommoError> {
            Ok(Company { id, name: Some("Acme LLC".to_string()) })
        }

        async fn get_lead_companies(&self, _id: DealId) -> Result<Vec<Company>, KommoError> {
            Ok(vec![Company { id: 5, name: Some("Acme LLC".to_string()) }])
        }

        async fn create_note(&self, _lead_id: DealId, _text: &str) -> Result<(), KommoError> {
            Ok(())
        }

        async fn update_lead_custom_field(
            &self,
            _lead_id: DealId,
            _field_id: i64,
            _value: &str,
        ) -> Result<(), KommoError> {
            Ok(())
        }

        async fn update_lead_status(
            &self,
            _lead_id: DealId,
            _status_id: i64,
        ) -> Result<(), KommoError> {
            Ok(())
        }

        async fn find_lead_by_custom_field(
            &self,
            _field_id: i64,
            _value: &str,
        ) -> Result<Option<Deal>, KommoError> {
            Ok(None)
        }

        async fn get_deal_bundle(&self, lead_id: DealId) -> Result<DealBundle, KommoError> {
            Ok(DealBundle {
                lead: self.get_lead(lead_id).await?,
                contacts: Vec::new(),
                companies: vec![Company { id: 5, name: Some("Acme LLC".to_string()) }],
            })
        }
    }

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_payment_link(
            &self,
            request: &PaymentLinkRequest,
        ) -> Result<PaymentLink, GatewayError> {
            Ok(PaymentLink {
                checkout_url: format!("https://pay.test/checkout/{}", request.order_id),
                payment_id: "pay_1".to_string(),
            })
        }

        async fn payment_status(&self, payment_id: &str) -> Result<Value, GatewayError> {
            Ok(json!({"payment_id": payment_id, "status": "created"}))
        }

        async fn cancel_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
            Ok(json!({"payment_id": payment_id, "status": "cancelled"}))
        }
    }

    fn test_router(with_gateway: bool) -> axum::Router {
        let engine = ReconcileEngine::new(
            Arc::new(StubCrm),
            with_gateway.then(|| Arc::new(StubGateway) as Arc<dyn PaymentGateway>),
            Arc::new(InMemoryRelationRepository::default()),
            Arc::new(InMemoryWebhookArchiveRepository::default()),
            EngineSettings {
                currency: "GEL".to_string(),
                callback_url: "https://example.test/payment-callback".to_string(),
                retry: RetryPolicy { max_attempts: 1, delay: Duration::ZERO },
            },
        );
        router(Arc::new(engine))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn webhook_endpoint_acknowledges_and_links() {
        let response = test_router(true)
            .oneshot(
                Request::post("/kommo-webhooks")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"leads":{"add":[{"id":777}]}}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], json!("success"));
        assert_eq!(payload["lead_id"], json!(777));
        assert_eq!(payload["amount"], json!(14_360));
    }

    #[tokio::test]
    async fn webhook_endpoint_accepts_form_encoded_bodies() {
        let response = test_router(true)
            .oneshot(
                Request::post("/kommo-webhooks")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("leads%5Badd%5D%5B0%5D%5Bid%5D=777"))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], json!("success"));
        assert_eq!(payload["lead_id"], json!(777));
    }

    #[tokio::test]
    async fn malformed_webhook_body_still_gets_200() {
        let response = test_router(true)
            .oneshot(
                Request::post("/kommo-webhooks")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{oops"))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], json!("accepted"));
        assert_eq!(payload["archived"], json!(true));
    }

    #[tokio::test]
    async fn callback_endpoint_rejects_unresolvable_payments() {
        let response = test_router(true)
            .oneshot(
                Request::post("/payment-callback")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"status":"success","payment_id":"nope"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], json!("error"));
    }

    #[tokio::test]
    async fn callback_endpoint_resolves_order_id_prefix() {
        let response = test_router(true)
            .oneshot(
                Request::post("/payment-callback")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"status":"success","order_id":"deal_555_AB"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], json!("success"));
        assert_eq!(payload["lead_id"], json!(555));
    }

    #[tokio::test]
    async fn payment_endpoints_return_503_without_credentials() {
        let response = test_router(false)
            .oneshot(
                Request::get("/payment-status/pay_1").body(Body::empty()).expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let payload = body_json(response).await;
        assert_eq!(payload["error"], json!("payment service unavailable"));
    }

    #[tokio::test]
    async fn test_deal_endpoint_returns_the_bundle() {
        let response = test_router(true)
            .oneshot(Request::get("/test-deal/777").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["lead"]["id"], json!(777));
        assert_eq!(payload["companies"][0]["name"], json!("Acme LLC"));
    }
}
