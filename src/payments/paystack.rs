//! Paystack status adapter
//!
//! `GET {base_url}/transaction/verify/{reference}` with the secret key as a
//! bearer token. Only the transaction status is read from the response.

use crate::config::GatewaySettings;
use crate::middleware::logging::log_external_call;
use crate::payments::gateway::{GatewayError, GatewayStatus, PaymentStatusGateway};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct VerifyEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

pub struct PaystackGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    timeout_secs: u64,
}

impl PaystackGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
            timeout_secs: settings.timeout_secs,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl PaymentStatusGateway for PaystackGateway {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn check_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::Configuration(
                "gateway.secret_key is not set".to_string(),
            ));
        }
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        log_external_call("paystack", "GET /transaction/verify", async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.secret_key)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            let http_status = response.status().as_u16();
            let body = response.text().await.map_err(|e| self.transport_error(e))?;
            classify_response(http_status, &body)
        })
        .await
    }
}

/// Map a Paystack transaction status to the provider-neutral status
pub fn map_transaction_status(status: &str) -> GatewayStatus {
    match status.to_ascii_lowercase().as_str() {
        "success" => GatewayStatus::Succeeded,
        "failed" | "abandoned" | "reversed" => GatewayStatus::Failed,
        // ongoing, pending, processing, queued and anything new
        _ => GatewayStatus::Pending,
    }
}

/// Interpret a verify response
pub fn classify_response(http_status: u16, body: &str) -> Result<GatewayStatus, GatewayError> {
    if http_status == 404 {
        return Ok(GatewayStatus::NotFound);
    }
    if http_status >= 500 {
        return Err(GatewayError::Http {
            status: http_status,
        });
    }

    let envelope: VerifyEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&http_status) => {
            return Err(GatewayError::Http {
                status: http_status,
            })
        }
        Err(e) => return Err(GatewayError::Decode(e.to_string())),
    };

    if !envelope.status {
        if envelope.message.to_ascii_lowercase().contains("not found") {
            return Ok(GatewayStatus::NotFound);
        }
        return Err(GatewayError::Http {
            status: http_status,
        });
    }

    envelope
        .data
        .map(|data| map_transaction_status(&data.status))
        .ok_or_else(|| GatewayError::Decode("verify response has no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transaction_status() {
        assert_eq!(map_transaction_status("success"), GatewayStatus::Succeeded);
        assert_eq!(map_transaction_status("abandoned"), GatewayStatus::Failed);
        assert_eq!(map_transaction_status("REVERSED"), GatewayStatus::Failed);
        assert_eq!(map_transaction_status("ongoing"), GatewayStatus::Pending);
        assert_eq!(map_transaction_status("queued"), GatewayStatus::Pending);
    }

    #[test]
    fn test_classify_success_body() {
        let body = r#"{"status":true,"message":"Verification successful","data":{"status":"success","reference":"TXN-1","amount":500000}}"#;
        assert_eq!(classify_response(200, body).unwrap(), GatewayStatus::Succeeded);
    }

    #[test]
    fn test_classify_not_found() {
        let body = r#"{"status":false,"message":"Transaction reference not found"}"#;
        assert_eq!(classify_response(400, body).unwrap(), GatewayStatus::NotFound);
        assert_eq!(classify_response(404, "").unwrap(), GatewayStatus::NotFound);
    }

    #[test]
    fn test_classify_errors_are_not_failures() {
        assert!(matches!(
            classify_response(502, "<html>Bad Gateway</html>"),
            Err(GatewayError::Http { status: 502 })
        ));
        assert!(matches!(
            classify_response(401, r#"{"status":false,"message":"Invalid key"}"#),
            Err(GatewayError::Http { status: 401 })
        ));
        assert!(matches!(
            classify_response(200, "not json"),
            Err(GatewayError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_secret_is_configuration_error() {
        let gateway = PaystackGateway::new(&GatewaySettings {
            base_url: "https://api.paystack.co/".to_string(),
            secret_key: String::new(),
            timeout_secs: 5,
        })
        .unwrap();
        assert!(matches!(
            gateway.check_status("TXN-1").await,
            Err(GatewayError::Configuration(_))
        ));
    }
}
