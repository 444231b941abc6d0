//! The telecom provider seam.
//!
//! Action handlers never talk to the network directly; they go through
//! [`TelecomProvider`], so the backend can be swapped and tests can
//! inject a [`MockTelecomProvider`](mock::MockTelecomProvider).

pub mod africastalking;
pub mod mock;

pub use africastalking::{AfricasTalkingClient, AfricasTalkingConfig, Environment};
pub use mock::{MockTelecomProvider, RecordedCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::NodeError;

/// Failure from the remote provider, prior to taxonomy mapping.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Map into the caller-facing taxonomy. Network failures keep the
    /// stable `network_error` code; API failures take the action's own
    /// code with the kind derived from the HTTP status.
    pub fn into_node_error(self, action_code: &str) -> NodeError {
        match self {
            ProviderError::Network(msg) | ProviderError::Timeout(msg) => {
                NodeError::transient("network_error", msg)
            }
            ProviderError::RateLimited { retry_after_secs } => {
                let mut err = NodeError::rate_limit("provider rate limit");
                if let Some(secs) = retry_after_secs {
                    err = err.with_details(serde_json::json!({ "retry_after_secs": secs }));
                }
                err
            }
            ProviderError::Api { status, message } if status == 429 => {
                NodeError::rate_limit(message)
                    .with_details(serde_json::json!({ "http_status": status }))
            }
            ProviderError::Api { status, message } if status >= 500 => {
                NodeError::transient(action_code, message)
                    .with_details(serde_json::json!({ "http_status": status }))
            }
            ProviderError::Api { status, message } => {
                NodeError::permanent(action_code, message)
                    .with_details(serde_json::json!({ "http_status": status }))
            }
            ProviderError::InvalidRequest(msg) => NodeError::permanent(action_code, msg),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequest {
    pub to: String,
    pub message: String,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsReceipt {
    pub message_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UssdReply {
    pub session_id: String,
    pub message: String,
    /// `true` keeps the session open (a `CON` reply); `false` closes it.
    pub expect_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub session_id: String,
    pub to: String,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReceipt {
    pub call_session_id: String,
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvrPrompt {
    pub call_session_id: String,
    pub text: Option<String>,
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmfRequest {
    pub call_session_id: String,
    pub prompt: Option<String>,
    pub num_digits: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub finish_on_key: Option<String>,
}

/// Digits captured from the keypad; `None` means the caller timed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmfCapture {
    pub digits: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub transaction_type: String,
    pub amount: f64,
    pub currency: String,
    pub phone_number: String,
    pub product_name: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub transaction_id: String,
    pub status: String,
}

/// One provider backend: SMS, USSD replies, voice and mobile money.
#[async_trait]
pub trait TelecomProvider: Send + Sync {
    async fn send_sms(&self, request: SmsRequest) -> Result<SmsReceipt, ProviderError>;

    async fn send_ussd_response(&self, reply: UssdReply) -> Result<(), ProviderError>;

    async fn initiate_call(&self, request: CallRequest) -> Result<CallReceipt, ProviderError>;

    async fn play_ivr(&self, prompt: IvrPrompt) -> Result<(), ProviderError>;

    async fn collect_dtmf(&self, request: DtmfRequest) -> Result<DtmfCapture, ProviderError>;

    async fn request_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, ProviderError>;

    async fn refund_payment(&self, request: RefundRequest)
        -> Result<RefundReceipt, ProviderError>;
}
