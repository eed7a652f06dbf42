//! M-Pesa Daraja STK Push client
//!
//! The [`PaymentGateway`] trait is the seam between the order flow and the
//! provider: production wires [`DarajaClient`], tests substitute a mock.
//!
//! Daraja flow: fetch an OAuth bearer token with the consumer key/secret,
//! then POST the STK push with the shortcode password
//! `base64(shortcode + passkey + timestamp)`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Daraja environment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MpesaEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl std::str::FromStr for MpesaEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(MpesaEnvironment::Sandbox),
            "production" => Ok(MpesaEnvironment::Production),
            other => Err(format!("unknown M-Pesa environment: {other}")),
        }
    }
}

/// Gateway credentials and endpoints, injected at startup.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub environment: MpesaEnvironment,
    /// Paybill / till number
    pub shortcode: String,
    pub passkey: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Public URL the gateway posts callbacks to
    pub callback_url: String,
}

/// Gateway-side failures during initiation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway authentication failed: {0}")]
    Auth(String),

    #[error("Gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected gateway response: {0}")]
    Response(String),
}

/// An STK push to send.
#[derive(Debug, Clone)]
pub struct StkPushRequest {
    /// Canonical `254XXXXXXXXX` number
    pub phone_number: String,
    /// Order total (whole KSh are sent to the gateway)
    pub amount: Decimal,
    /// Order number, echoed back on statements
    pub account_reference: String,
    pub transaction_desc: String,
}

/// Gateway acceptance of an STK push.
///
/// Acceptance means the prompt was queued to the handset, not that payment
/// happened; the outcome arrives later on the callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushAcceptance {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushAcceptance, GatewayError>;
}

// ── Daraja wire types ───────────────────────────────────────────────

#[derive(Deserialize)]
struct OauthResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushPayload<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
    // Error shape
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// HTTP client for the Daraja API.
pub struct DarajaClient {
    http: reqwest::Client,
    config: MpesaConfig,
}

impl DarajaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.environment.base_url()
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body: OauthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Response(e.to_string()))?;
        Ok(body.access_token)
    }

    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{timestamp}",
            self.config.shortcode, self.config.passkey
        ))
    }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushAcceptance, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        // Daraja takes whole shillings.
        let amount = request
            .amount
            .round()
            .to_u64()
            .ok_or_else(|| GatewayError::Response(format!("amount {} not representable", request.amount)))?;

        let payload = StkPushPayload {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: &request.phone_number,
            party_b: &self.config.shortcode,
            phone_number: &request.phone_number,
            call_back_url: &self.config.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.transaction_desc,
        };

        debug!(
            account = %request.account_reference,
            amount,
            "sending STK push"
        );

        let response = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.environment.base_url()
            ))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Response(e.to_string()))?;

        if let Some(code) = body.error_code {
            warn!(code = %code, "STK push rejected");
            return Err(GatewayError::Rejected {
                code,
                message: body.error_message.unwrap_or_default(),
            });
        }
        match body.response_code.as_deref() {
            Some("0") => {}
            Some(code) => {
                return Err(GatewayError::Rejected {
                    code: code.to_string(),
                    message: body.response_description.unwrap_or_default(),
                });
            }
            None => {
                return Err(GatewayError::Response(format!(
                    "missing response code (HTTP {status})"
                )));
            }
        }

        let merchant_request_id = body
            .merchant_request_id
            .ok_or_else(|| GatewayError::Response("missing MerchantRequestID".to_string()))?;
        let checkout_request_id = body
            .checkout_request_id
            .ok_or_else(|| GatewayError::Response("missing CheckoutRequestID".to_string()))?;

        Ok(StkPushAcceptance {
            merchant_request_id,
            checkout_request_id,
            customer_message: body.customer_message.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_base_urls() {
        assert!(MpesaEnvironment::Sandbox.base_url().contains("sandbox"));
        assert!(!MpesaEnvironment::Production.base_url().contains("sandbox"));
        assert_eq!("sandbox".parse::<MpesaEnvironment>().unwrap(), MpesaEnvironment::Sandbox);
        assert!("staging".parse::<MpesaEnvironment>().is_err());
    }

    #[test]
    fn test_password_is_base64_of_shortcode_passkey_timestamp() {
        let client = DarajaClient::new(MpesaConfig {
            environment: MpesaEnvironment::Sandbox,
            shortcode: "174379".to_string(),
            passkey: "key".to_string(),
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            callback_url: "https://example.com/api/payments/callback".to_string(),
        });
        let password = client.password("20260101120000");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379key20260101120000");
    }
}
