use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use paylink_core::config::KommoConfig;
use paylink_core::domain::deal::{Deal, DealId};

use crate::{Company, Contact, CrmApi, DealBundle, KommoError};

pub struct KommoClient {
    client: Client,
    base_url: String,
    api_token: SecretString,
}

impl KommoClient {
    pub fn new(config: &KommoConfig) -> Self {
        Self::with_base_url(
            format!("https://{}.kommo.com/api/v4", config.subdomain),
            config.api_token.clone(),
        )
    }

    /// Client against an explicit base url, used by tests and local stubs.
    pub fn with_base_url(base_url: impl Into<String>, api_token: SecretString) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, KommoError> {
        let url = self.url(path);
        debug!(%method, %url, "kommo request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(self.api_token.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!(%method, %url, status = status.as_u16(), body = %text, "kommo api error");
            return Err(KommoError::Api { status: status.as_u16(), body: text });
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str::<T>(&text)
            .map(Some)
            .map_err(|e| KommoError::Decode(format!("{url}: {e}")))
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, KommoError> {
        self.request::<T>(Method::GET, path, None)
            .await?
            .ok_or_else(|| KommoError::Decode(format!("empty response from {path}")))
    }
}

#[derive(serde::Deserialize)]
struct LeadSearchPage {
    #[serde(rename = "_embedded", default)]
    embedded: Option<LeadSearchEmbedded>,
}

#[derive(Default, serde::Deserialize)]
struct LeadSearchEmbedded {
    #[serde(default)]
    leads: Vec<Deal>,
}

#[async_trait]
impl CrmApi for KommoClient {
    async fn get_lead(&self, id: DealId) -> Result<Deal, KommoError> {
        self.fetch(&format!("leads/{id}?with=contacts,companies")).await
    }

    async fn get_contact(&self, id: i64) -> Result<Contact, KommoError> {
        self.fetch(&format!("contacts/{id}")).await
    }

    async fn get_company(&self, id: i64) -> Result<Company, KommoError> {
        self.fetch(&format!("companies/{id}")).await
    }

    async fn get_lead_companies(&self, id: DealId) -> Result<Vec<Company>, KommoError> {
        let lead = self.get_lead(id).await?;
        let refs = lead.embedded.map(|embedded| embedded.companies).unwrap_or_default();

        let mut companies = Vec::with_capacity(refs.len());
        for reference in refs {
            match self.get_company(reference.id).await {
                Ok(company) => companies.push(company),
                Err(error) => {
                    warn!(lead_id = %id, company_id = reference.id, %error, "skipping company");
                }
            }
        }
        Ok(companies)
    }

    async fn create_note(&self, lead_id: DealId, text: &str) -> Result<(), KommoError> {
        let body = json!([{"note_type": "common", "params": {"text": text}}]);
        self.request::<Value>(Method::POST, &format!("leads/{lead_id}/notes"), Some(body))
            .await?;
        Ok(())
    }

    async fn update_lead_custom_field(
        &self,
        lead_id: DealId,
        field_id: i64,
        value: &str,
    ) -> Result<(), KommoError> {
        let body = json!({
            "custom_fields_values": [
                {"field_id": field_id, "values": [{"value": value}]}
            ]
        });
        self.request::<Value>(Method::PATCH, &format!("leads/{lead_id}"), Some(body)).await?;
        Ok(())
    }

    async fn update_lead_status(
        &self,
        lead_id: DealId,
        status_id: i64,
    ) -> Result<(), KommoError> {
        let body = json!({"status_id": status_id});
        self.request::<Value>(Method::PATCH, &format!("leads/{lead_id}"), Some(body)).await?;
        Ok(())
    }

    async fn find_lead_by_custom_field(
        &self,
        field_id: i64,
        value: &str,
    ) -> Result<Option<Deal>, KommoError> {
        let query: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        let page = self
            .request::<LeadSearchPage>(Method::GET, &format!("leads?query={query}"), None)
            .await?;

        let leads = page.and_then(|page| page.embedded).map(|e| e.leads).unwrap_or_default();
        Ok(leads
            .into_iter()
            .find(|lead| lead.custom_field_text(field_id).as_deref() == Some(value)))
    }

    async fn get_deal_bundle(&self, lead_id: DealId) -> Result<DealBundle, KommoError> {
        let lead = self.get_lead(lead_id).await?;
        let embedded = lead.embedded.clone().unwrap_or_default();

        let mut contacts = Vec::with_capacity(embedded.contacts.len());
        for reference in embedded.contacts {
            match self.get_contact(reference.id).await {
                Ok(contact) => contacts.push(contact),
                Err(error) => {
                    warn!(%lead_id, contact_id = reference.id, %error, "skipping contact");
                }
            }
        }

        let mut companies = Vec::with_capacity(embedded.companies.len());
        for reference in embedded.companies {
            match self.get_company(reference.id).await {
                Ok(company) => companies.push(company),
                Err(error) => {
                    warn!(%lead_id, company_id = reference.id, %error, "skipping company");
                }
            }
        }

        Ok(DealBundle { lead, contacts, companies })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use paylink_core::config::KommoConfig;

    use super::KommoClient;

    #[test]
    fn builds_base_url_from_subdomain() {
        let config = KommoConfig {
            subdomain: "acme".to_string(),
            api_token: SecretString::from("token".to_string()),
        };
        let client = KommoClient::new(&config);
        assert_eq!(client.url("leads/7"), "https://acme.kommo.com/api/v4/leads/7");
    }

    #[test]
    fn joins_paths_without_duplicate_slashes() {
        let client = KommoClient::with_base_url(
            "http://localhost:9000/api/v4/",
            SecretString::from("token".to_string()),
        );
        assert_eq!(client.url("/leads/1"), "http://localhost:9000/api/v4/leads/1");
    }
}
