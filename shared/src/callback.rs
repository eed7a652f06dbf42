//! M-Pesa STK push callback envelope
//!
//! Wire format as delivered by the Daraja gateway:
//!
//! ```json
//! {
//!   "Body": {
//!     "stkCallback": {
//!       "MerchantRequestID": "29115-34620561-1",
//!       "CheckoutRequestID": "ws_CO_191220191020363925",
//!       "ResultCode": 0,
//!       "ResultDesc": "The service request is processed successfully.",
//!       "CallbackMetadata": {
//!         "Item": [
//!           { "Name": "Amount", "Value": 5700.00 },
//!           { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
//!           { "Name": "PhoneNumber", "Value": 254712345678 }
//!         ]
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Metadata is only present on success. `Value` may be a number or a string
//! depending on the field, so items carry a raw JSON value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money;

/// Result codes the gateway uses for a customer-dismissed prompt.
const USER_CANCEL_CODES: &[i64] = &[1, 1032];

/// Outer callback envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

/// The STK callback payload proper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", skip_serializing_if = "Option::is_none")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    pub fn is_user_cancelled(&self) -> bool {
        USER_CANCEL_CODES.contains(&self.result_code)
    }

    fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|i| i.name == name)?
            .value
            .as_ref()
    }

    /// Confirmed amount from the callback metadata (success only).
    pub fn amount(&self) -> Option<Decimal> {
        match self.metadata_value("Amount")? {
            serde_json::Value::Number(n) => money::from_f64(n.as_f64()?),
            serde_json::Value::String(s) => s.parse().ok().map(money::round2),
            _ => None,
        }
    }

    /// M-Pesa receipt reference (success only).
    pub fn receipt_number(&self) -> Option<String> {
        match self.metadata_value("MpesaReceiptNumber")? {
            serde_json::Value::String(s) => Some(s.clone()),
            v => Some(v.to_string()),
        }
    }

    /// Payer phone number as reported by the gateway.
    pub fn phone_number(&self) -> Option<String> {
        match self.metadata_value("PhoneNumber")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_json() -> serde_json::Value {
        serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 5700.00 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "TransactionDate", "Value": 20191219102115u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_success_callback() {
        let env: CallbackEnvelope = serde_json::from_value(success_json()).unwrap();
        let cb = &env.body.stk_callback;
        assert!(cb.is_success());
        assert_eq!(cb.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(cb.amount(), Some(Decimal::new(570000, 2)));
        assert_eq!(cb.receipt_number().as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(cb.phone_number().as_deref(), Some("254712345678"));
    }

    #[test]
    fn test_parse_cancel_callback_without_metadata() {
        let json = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-2",
                    "CheckoutRequestID": "ws_CO_cancel",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let env: CallbackEnvelope = serde_json::from_value(json).unwrap();
        let cb = &env.body.stk_callback;
        assert!(!cb.is_success());
        assert!(cb.is_user_cancelled());
        assert!(cb.amount().is_none());
        assert!(cb.receipt_number().is_none());
    }

    #[test]
    fn test_legacy_cancel_code() {
        let json = serde_json::json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "m", "CheckoutRequestID": "c",
                "ResultCode": 1, "ResultDesc": "Insufficient funds / cancel"
            }}
        });
        let env: CallbackEnvelope = serde_json::from_value(json).unwrap();
        assert!(env.body.stk_callback.is_user_cancelled());
    }
}
