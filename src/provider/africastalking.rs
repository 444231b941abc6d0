//! Africa's Talking HTTP client.
//!
//! SMS, voice and mobile-money calls go out over the REST API. USSD
//! replies and in-call IVR actions are different: the gateway consumes
//! them as the body of the webhook response, so this client queues them
//! in a per-session outbox for the transport layer to drain.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    CallReceipt, CallRequest, DtmfCapture, DtmfRequest, IvrPrompt, PaymentReceipt, PaymentRequest,
    ProviderError, RefundReceipt, RefundRequest, SmsReceipt, SmsRequest, TelecomProvider,
    UssdReply,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

#[derive(Debug, Clone)]
pub struct AfricasTalkingConfig {
    pub username: String,
    pub api_key: String,
    pub environment: Environment,
    pub request_timeout: Duration,
}

impl AfricasTalkingConfig {
    pub fn new(username: String, api_key: String, environment: Environment) -> Self {
        AfricasTalkingConfig {
            username,
            api_key,
            environment,
            request_timeout: Duration::from_secs(30),
        }
    }

    fn sms_url(&self) -> &'static str {
        match self.environment {
            Environment::Sandbox => "https://api.sandbox.africastalking.com/version1/messaging",
            Environment::Production => "https://api.africastalking.com/version1/messaging",
        }
    }

    fn voice_url(&self) -> &'static str {
        "https://voice.africastalking.com/call"
    }

    fn payments_base(&self) -> &'static str {
        match self.environment {
            Environment::Sandbox => "https://payments.sandbox.africastalking.com",
            Environment::Production => "https://payments.africastalking.com",
        }
    }
}

pub struct AfricasTalkingClient {
    config: AfricasTalkingConfig,
    client: reqwest::Client,
    /// Replies awaiting pickup by the USSD/voice webhook transport,
    /// keyed by gateway session id.
    outbox: Mutex<HashMap<String, VecDeque<String>>>,
}

impl AfricasTalkingClient {
    pub fn new(config: AfricasTalkingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        AfricasTalkingClient {
            config,
            client,
            outbox: Mutex::new(HashMap::new()),
        }
    }

    /// Drain the next queued gateway reply for a session, if any.
    pub fn take_reply(&self, session_id: &str) -> Option<String> {
        self.outbox.lock().get_mut(session_id)?.pop_front()
    }

    fn queue_reply(&self, session_id: &str, body: String) {
        self.outbox
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push_back(body);
    }

    fn map_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<Value, ProviderError> {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Api {
                status: status.as_u16(),
                message: format!("unparseable response body: {e}"),
            })
    }
}

#[async_trait]
impl TelecomProvider for AfricasTalkingClient {
    async fn send_sms(&self, request: SmsRequest) -> Result<SmsReceipt, ProviderError> {
        let mut form = vec![
            ("username", self.config.username.clone()),
            ("to", request.to),
            ("message", request.message),
        ];
        if let Some(from) = request.from {
            form.push(("from", from));
        }
        let response = self
            .client
            .post(self.config.sms_url())
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body = Self::check_status(response).await?;

        let recipient = body["SMSMessageData"]["Recipients"]
            .as_array()
            .and_then(|r| r.first())
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 200,
                message: "no recipients in response".into(),
            })?;
        Ok(SmsReceipt {
            message_id: recipient["messageId"].as_str().unwrap_or_default().to_string(),
            status: recipient["status"].as_str().unwrap_or("Unknown").to_string(),
            cost: recipient["cost"].as_str().map(str::to_string),
        })
    }

    async fn send_ussd_response(&self, reply: UssdReply) -> Result<(), ProviderError> {
        // The gateway expects "CON " to keep the menu open, "END " to close.
        let prefix = if reply.expect_input { "CON" } else { "END" };
        self.queue_reply(&reply.session_id, format!("{} {}", prefix, reply.message));
        Ok(())
    }

    async fn initiate_call(&self, request: CallRequest) -> Result<CallReceipt, ProviderError> {
        let mut form = vec![
            ("username", self.config.username.clone()),
            ("to", request.to),
        ];
        if let Some(from) = request.from {
            form.push(("from", from));
        }
        let response = self
            .client
            .post(self.config.voice_url())
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body = Self::check_status(response).await?;

        let entry = body["entries"].as_array().and_then(|e| e.first()).cloned();
        let status = entry
            .as_ref()
            .and_then(|e| e["status"].as_str())
            .unwrap_or("Queued")
            .to_string();
        let call_session_id = entry
            .and_then(|e| e["sessionId"].as_str().map(str::to_string))
            .unwrap_or(request.session_id);
        Ok(CallReceipt {
            call_session_id,
            answered: status != "NoAnswer",
        })
    }

    async fn play_ivr(&self, prompt: IvrPrompt) -> Result<(), ProviderError> {
        let action = match (&prompt.text, &prompt.audio_url) {
            (Some(text), _) => format!("<Say>{}</Say>", text),
            (None, Some(url)) => format!("<Play url=\"{}\"/>", url),
            (None, None) => {
                return Err(ProviderError::InvalidRequest(
                    "play_ivr needs text or audio_url".into(),
                ))
            }
        };
        self.queue_reply(
            &prompt.call_session_id,
            format!("<?xml version=\"1.0\"?><Response>{}</Response>", action),
        );
        Ok(())
    }

    async fn collect_dtmf(&self, request: DtmfRequest) -> Result<DtmfCapture, ProviderError> {
        let mut attrs = String::new();
        if let Some(n) = request.num_digits {
            attrs.push_str(&format!(" numDigits=\"{}\"", n));
        }
        if let Some(t) = request.timeout_ms {
            attrs.push_str(&format!(" timeout=\"{}\"", t / 1_000));
        }
        if let Some(key) = &request.finish_on_key {
            attrs.push_str(&format!(" finishOnKey=\"{}\"", key));
        }
        let inner = request
            .prompt
            .as_deref()
            .map(|p| format!("<Say>{}</Say>", p))
            .unwrap_or_default();
        self.queue_reply(
            &request.call_session_id,
            format!(
                "<?xml version=\"1.0\"?><Response><GetDigits{}>{}</GetDigits></Response>",
                attrs, inner
            ),
        );
        // Digits arrive on the gateway's next callback invocation, not on
        // this call; an in-process wait would hold the invocation open for
        // the whole voice round-trip.
        Ok(DtmfCapture { digits: None })
    }

    async fn request_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, ProviderError> {
        let path = match request.transaction_type.as_str() {
            "checkout" => "/mobile/checkout/request",
            "b2c" => "/mobile/b2c/request",
            "b2b" => "/mobile/b2b/request",
            other => {
                return Err(ProviderError::InvalidRequest(format!(
                    "unsupported transaction type: {other}"
                )))
            }
        };
        let payload = serde_json::json!({
            "username": self.config.username,
            "productName": request.product_name,
            "phoneNumber": request.phone_number,
            "currencyCode": request.currency,
            "amount": request.amount,
            "metadata": Value::Object(request.metadata),
        });
        let response = self
            .client
            .post(format!("{}{}", self.config.payments_base(), path))
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body = Self::check_status(response).await?;
        Ok(PaymentReceipt {
            transaction_id: body["transactionId"].as_str().unwrap_or_default().to_string(),
            status: body["status"].as_str().unwrap_or("PendingConfirmation").to_string(),
        })
    }

    async fn refund_payment(
        &self,
        request: RefundRequest,
    ) -> Result<RefundReceipt, ProviderError> {
        let payload = serde_json::json!({
            "username": self.config.username,
            "transactionId": request.transaction_id,
            "amount": request.amount,
        });
        let response = self
            .client
            .post(format!("{}/transaction/refund", self.config.payments_base()))
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body = Self::check_status(response).await?;
        Ok(RefundReceipt {
            transaction_id: request.transaction_id,
            status: body["status"].as_str().unwrap_or("Pending").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AfricasTalkingClient {
        AfricasTalkingClient::new(AfricasTalkingConfig::new(
            "sandbox".into(),
            "key".into(),
            Environment::Sandbox,
        ))
    }

    #[test]
    fn environment_selects_base_urls() {
        let sandbox = AfricasTalkingConfig::new("u".into(), "k".into(), Environment::Sandbox);
        assert!(sandbox.sms_url().contains("sandbox"));
        assert!(sandbox.payments_base().contains("sandbox"));
        let prod = AfricasTalkingConfig::new("u".into(), "k".into(), Environment::Production);
        assert!(!prod.sms_url().contains("sandbox"));
    }

    #[tokio::test]
    async fn ussd_replies_queue_with_con_end_prefix() {
        let at = client();
        at.send_ussd_response(UssdReply {
            session_id: "s1".into(),
            message: "Pick an option".into(),
            expect_input: true,
        })
        .await
        .unwrap();
        at.send_ussd_response(UssdReply {
            session_id: "s1".into(),
            message: "Bye".into(),
            expect_input: false,
        })
        .await
        .unwrap();
        assert_eq!(at.take_reply("s1").unwrap(), "CON Pick an option");
        assert_eq!(at.take_reply("s1").unwrap(), "END Bye");
        assert!(at.take_reply("s1").is_none());
    }

    #[tokio::test]
    async fn ivr_actions_render_voice_xml() {
        let at = client();
        at.play_ivr(IvrPrompt {
            call_session_id: "c1".into(),
            text: Some("Karibu".into()),
            audio_url: None,
        })
        .await
        .unwrap();
        let xml = at.take_reply("c1").unwrap();
        assert!(xml.contains("<Say>Karibu</Say>"));

        at.collect_dtmf(DtmfRequest {
            call_session_id: "c1".into(),
            prompt: Some("Enter PIN".into()),
            num_digits: Some(4),
            timeout_ms: Some(5_000),
            finish_on_key: Some("#".into()),
        })
        .await
        .unwrap();
        let xml = at.take_reply("c1").unwrap();
        assert!(xml.contains("numDigits=\"4\""));
        assert!(xml.contains("timeout=\"5\""));
        assert!(xml.contains("<Say>Enter PIN</Say>"));
    }

    #[tokio::test]
    async fn unsupported_transaction_type_rejected() {
        let at = client();
        let err = at
            .request_payment(PaymentRequest {
                transaction_type: "c2c".into(),
                amount: 10.0,
                currency: "KES".into(),
                phone_number: "+254700".into(),
                product_name: "p".into(),
                metadata: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
