//! Xendit invoice provider client.
//!
//! Creates hosted payment invoices through the v2 Invoices API.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::InvoiceConfig;
use crate::settlement::gateways::InvoiceGateway;
use crate::settlement::invoice::{InvoiceRef, InvoiceRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct XenditClient {
    client: Client,
    config: InvoiceConfig,
}

/// Response from invoice creation.
#[derive(Debug, Deserialize)]
pub struct XenditInvoice {
    pub id: String,
    pub external_id: String,
    pub status: String,
    pub amount: f64,
    pub invoice_url: String,
    pub expiry_date: Option<String>,
}

/// Xendit API error response.
#[derive(Debug, Deserialize)]
pub struct XenditError {
    pub error_code: String,
    pub message: String,
}

impl XenditClient {
    pub fn new(config: InvoiceConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    /// Check if the provider is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    pub async fn create_invoice(&self, request: &InvoiceRequest) -> Result<XenditInvoice> {
        if !self.is_configured() {
            return Err(anyhow!("Invoice provider credentials not configured"));
        }

        let url = format!("{}/v2/invoices", self.config.api_base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Xendit create_invoice response");

        if status.is_success() {
            let invoice: XenditInvoice = serde_json::from_str(&body)?;
            tracing::info!(
                invoice_id = %invoice.id,
                external_id = %invoice.external_id,
                status = %invoice.status,
                "Xendit invoice created"
            );
            Ok(invoice)
        } else {
            let error: XenditError = serde_json::from_str(&body).unwrap_or_else(|_| XenditError {
                error_code: "UNKNOWN".to_string(),
                message: body.clone(),
            });
            tracing::error!(
                status = %status,
                error_code = %error.error_code,
                message = %error.message,
                "Xendit create_invoice failed"
            );
            Err(anyhow!(
                "Xendit error {} ({}): {}",
                status.as_u16(),
                error.error_code,
                error.message
            ))
        }
    }
}

#[async_trait]
impl InvoiceGateway for XenditClient {
    async fn generate_invoice(&self, request: &InvoiceRequest) -> Result<InvoiceRef> {
        let invoice = self.create_invoice(request).await?;
        Ok(InvoiceRef {
            invoice_id: invoice.id,
            invoice_url: invoice.invoice_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::invoice::{build_request, InvoiceSettings};
    use crate::settlement::test_support::{order_with_details, Brand};
    use secrecy::Secret;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, secret: &str) -> InvoiceConfig {
        InvoiceConfig {
            api_base_url: base_url.to_string(),
            secret_key: Secret::new(secret.to_string()),
            callback_token: Secret::new("callback".to_string()),
            currency: "IDR".to_string(),
            duration_seconds: 86400,
            country: "Indonesia".to_string(),
        }
    }

    fn request() -> InvoiceRequest {
        let mut order = order_with_details(&[Brand(Uuid::new_v4(), &[1000, 2000])]);
        order.subtotal = 3000;
        order.total = 3000;
        build_request(&order, &InvoiceSettings::default())
    }

    #[tokio::test]
    async fn posts_invoice_and_returns_reference() {
        let server = MockServer::start().await;
        let request = request();

        Mock::given(method("POST"))
            .and(path("/v2/invoices"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "external_id": request.external_id,
                "amount": 3000,
                "currency": "IDR"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "inv_123",
                "external_id": request.external_id,
                "status": "PENDING",
                "amount": 3000.0,
                "invoice_url": "https://checkout.xendit.co/web/inv_123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XenditClient::new(config(&server.uri(), "xnd_secret")).unwrap();
        let invoice = client.generate_invoice(&request).await.unwrap();

        assert_eq!(invoice.invoice_id, "inv_123");
        assert_eq!(invoice.invoice_url, "https://checkout.xendit.co/web/inv_123");
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/invoices"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_code": "API_VALIDATION_ERROR",
                "message": "amount must be positive"
            })))
            .mount(&server)
            .await;

        let client = XenditClient::new(config(&server.uri(), "xnd_secret")).unwrap();
        let err = client.generate_invoice(&request()).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("API_VALIDATION_ERROR"));
        assert!(message.contains("amount must be positive"));
    }

    #[tokio::test]
    async fn missing_secret_fails_without_calling_out() {
        let client = XenditClient::new(config("http://127.0.0.1:9", "")).unwrap();
        assert!(!client.is_configured());
        assert!(client.generate_invoice(&request()).await.is_err());
    }
}
