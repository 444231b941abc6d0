//! Recording mock provider for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    CallReceipt, CallRequest, DtmfCapture, DtmfRequest, IvrPrompt, PaymentReceipt, PaymentRequest,
    ProviderError, RefundReceipt, RefundRequest, SmsReceipt, SmsRequest, TelecomProvider,
    UssdReply,
};

/// One captured provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub action: String,
    pub payload: Value,
}

/// Records every call and returns deterministic receipts. Failures can
/// be scripted per action with [`fail_next`](Self::fail_next).
#[derive(Default)]
pub struct MockTelecomProvider {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    dtmf_digits: Mutex<VecDeque<String>>,
    counter: AtomicU64,
}

impl MockTelecomProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `times` failures for `action`; subsequent calls succeed.
    pub fn fail_next(&self, action: &str, error: ProviderError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(action.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Script the digits returned by the next `collect_dtmf` calls.
    pub fn enqueue_dtmf(&self, digits: &str) {
        self.dtmf_digits.lock().push_back(digits.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, action: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.action == action)
            .cloned()
            .collect()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }

    fn check(&self, action: &str, payload: Value) -> Result<(), ProviderError> {
        if let Some(err) = self
            .failures
            .lock()
            .get_mut(action)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        self.calls.lock().push(RecordedCall {
            action: action.to_string(),
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl TelecomProvider for MockTelecomProvider {
    async fn send_sms(&self, request: SmsRequest) -> Result<SmsReceipt, ProviderError> {
        self.check("send_sms", serde_json::to_value(&request)?)?;
        Ok(SmsReceipt {
            message_id: self.next_id("msg"),
            status: "Success".into(),
            cost: Some("KES 0.80".into()),
        })
    }

    async fn send_ussd_response(&self, reply: UssdReply) -> Result<(), ProviderError> {
        self.check("send_ussd_response", serde_json::to_value(&reply)?)
    }

    async fn initiate_call(&self, request: CallRequest) -> Result<CallReceipt, ProviderError> {
        self.check("initiate_call", serde_json::to_value(&request)?)?;
        Ok(CallReceipt {
            call_session_id: request.session_id,
            answered: true,
        })
    }

    async fn play_ivr(&self, prompt: IvrPrompt) -> Result<(), ProviderError> {
        self.check("play_ivr", serde_json::to_value(&prompt)?)
    }

    async fn collect_dtmf(&self, request: DtmfRequest) -> Result<DtmfCapture, ProviderError> {
        self.check("collect_dtmf", serde_json::to_value(&request)?)?;
        Ok(DtmfCapture {
            digits: self.dtmf_digits.lock().pop_front(),
        })
    }

    async fn request_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, ProviderError> {
        self.check("request_payment", serde_json::to_value(&request)?)?;
        Ok(PaymentReceipt {
            transaction_id: self.next_id("txn"),
            status: "PendingConfirmation".into(),
        })
    }

    async fn refund_payment(
        &self,
        request: RefundRequest,
    ) -> Result<RefundReceipt, ProviderError> {
        self.check("refund_payment", serde_json::to_value(&request)?)?;
        Ok(RefundReceipt {
            transaction_id: request.transaction_id,
            status: "Refunded".into(),
        })
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::InvalidRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_returns_ids() {
        let mock = MockTelecomProvider::new();
        let receipt = mock
            .send_sms(SmsRequest {
                to: "+254700000001".into(),
                message: "hi".into(),
                from: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "msg-1");
        let calls = mock.calls_for("send_sms");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].payload["to"], "+254700000001");
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let mock = MockTelecomProvider::new();
        mock.fail_next("send_sms", ProviderError::Network("reset".into()), 2);
        for _ in 0..2 {
            assert!(mock
                .send_sms(SmsRequest {
                    to: "x".into(),
                    message: "y".into(),
                    from: None
                })
                .await
                .is_err());
        }
        assert!(mock
            .send_sms(SmsRequest {
                to: "x".into(),
                message: "y".into(),
                from: None
            })
            .await
            .is_ok());
        // Failed attempts are not recorded as deliveries.
        assert_eq!(mock.calls_for("send_sms").len(), 1);
    }

    #[tokio::test]
    async fn dtmf_digits_are_scriptable() {
        let mock = MockTelecomProvider::new();
        mock.enqueue_dtmf("1234");
        let captured = mock
            .collect_dtmf(DtmfRequest {
                call_session_id: "c1".into(),
                prompt: None,
                num_digits: Some(4),
                timeout_ms: None,
                finish_on_key: None,
            })
            .await
            .unwrap();
        assert_eq!(captured.digits.as_deref(), Some("1234"));
        let timed_out = mock
            .collect_dtmf(DtmfRequest {
                call_session_id: "c1".into(),
                prompt: None,
                num_digits: None,
                timeout_ms: None,
                finish_on_key: None,
            })
            .await
            .unwrap();
        assert!(timed_out.digits.is_none());
    }
}
