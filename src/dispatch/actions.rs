//! Builtin action handlers delegating to the telecom provider, plus the
//! generic HTTP request node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ActionHandler, DispatcherRegistry, HandlerContext, HandlerOutput};
use crate::error::{NodeError, NodeResult};
use crate::provider::{
    CallRequest, DtmfRequest, IvrPrompt, PaymentRequest, RefundRequest, SmsRequest,
    TelecomProvider, UssdReply,
};
use crate::template;

pub(super) fn register(registry: &mut DispatcherRegistry, provider: Arc<dyn TelecomProvider>) {
    registry
        .register(
            "send_sms",
            Arc::new(SendSmsHandler {
                provider: provider.clone(),
            }),
        )
        .expect("builtin types are registered once");
    registry
        .register(
            "send_ussd_response",
            Arc::new(SendUssdResponseHandler {
                provider: provider.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "initiate_call",
            Arc::new(InitiateCallHandler {
                provider: provider.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "play_ivr",
            Arc::new(PlayIvrHandler {
                provider: provider.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "collect_dtmf",
            Arc::new(CollectDtmfHandler {
                provider: provider.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "request_payment",
            Arc::new(RequestPaymentHandler {
                provider: provider.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "refund_payment",
            Arc::new(RefundPaymentHandler { provider }),
        )
        .expect("once");
    registry
        .register("http_request", Arc::new(HttpRequestHandler::new()))
        .expect("once");
}

fn rendered(ctx: &HandlerContext<'_>, key: &str) -> NodeResult<String> {
    let raw = ctx.node.config.get(key).and_then(Value::as_str).ok_or_else(|| {
        NodeError::validation(
            "node_config_validation_error",
            format!("missing string field: {key}"),
        )
    })?;
    Ok(template::render(raw, ctx.scope))
}

fn rendered_opt(ctx: &HandlerContext<'_>, key: &str) -> Option<String> {
    ctx.node
        .config
        .get(key)
        .and_then(Value::as_str)
        .map(|raw| template::render(raw, ctx.scope))
}

fn rendered_number(ctx: &HandlerContext<'_>, key: &str, code: &str) -> NodeResult<f64> {
    match ctx.node.config.get(key) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            NodeError::validation(code, format!("{key} is not a finite number"))
        }),
        Some(Value::String(raw)) => {
            let text = template::render(raw, ctx.scope);
            text.trim().parse().map_err(|_| {
                NodeError::validation(code, format!("{key} did not render to a number: {text}"))
            })
        }
        _ => Err(NodeError::validation(code, format!("missing field: {key}"))),
    }
}

pub struct SendSmsHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for SendSmsHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let request = SmsRequest {
            to: rendered(&ctx, "to")?,
            message: rendered(&ctx, "message")?,
            from: rendered_opt(&ctx, "from"),
        };
        let to = request.to.clone();
        let receipt = self
            .provider
            .send_sms(request)
            .await
            .map_err(|e| e.into_node_error("sms_send_error"))?;
        let mut output = serde_json::to_value(&receipt)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        output.insert("to".to_string(), Value::String(to));
        Ok(HandlerOutput::success(output))
    }
}

pub struct SendUssdResponseHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for SendUssdResponseHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session = ctx.require_session()?;
        let reply = UssdReply {
            session_id: session.session_id.clone(),
            message: rendered(&ctx, "message")?,
            expect_input: ctx
                .node
                .config
                .get("expect_input")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        let mut output = Map::new();
        output.insert("message".to_string(), Value::String(reply.message.clone()));
        output.insert("expect_input".to_string(), Value::Bool(reply.expect_input));
        self.provider
            .send_ussd_response(reply)
            .await
            .map_err(|e| e.into_node_error("ussd_response_error"))?;
        Ok(HandlerOutput::success(output))
    }
}

pub struct InitiateCallHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for InitiateCallHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session = ctx.require_voice_session()?;
        let request = CallRequest {
            session_id: session.session_id.clone(),
            to: rendered(&ctx, "to")?,
            from: rendered_opt(&ctx, "from"),
        };
        let receipt = self
            .provider
            .initiate_call(request)
            .await
            .map_err(|e| e.into_node_error("call_initiation_error"))?;
        let handle = if receipt.answered { "success" } else { "no_answer" };
        let output = serde_json::to_value(&receipt)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        Ok(HandlerOutput::with_handle(output, handle))
    }
}

pub struct PlayIvrHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for PlayIvrHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session = ctx.require_voice_session()?;
        let prompt = IvrPrompt {
            call_session_id: session.session_id.clone(),
            text: rendered_opt(&ctx, "text"),
            audio_url: rendered_opt(&ctx, "audio_url"),
        };
        self.provider
            .play_ivr(prompt)
            .await
            .map_err(|e| e.into_node_error("ivr_play_error"))?;
        Ok(HandlerOutput::success(ctx.input.clone()))
    }
}

pub struct CollectDtmfHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for CollectDtmfHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session = ctx.require_voice_session()?;
        let config = &ctx.node.config;
        let request = DtmfRequest {
            call_session_id: session.session_id.clone(),
            prompt: rendered_opt(&ctx, "prompt"),
            num_digits: config.get("num_digits").and_then(Value::as_u64).map(|n| n as u32),
            timeout_ms: config.get("timeout_ms").and_then(Value::as_u64),
            finish_on_key: config
                .get("finish_on_key")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let captured = self
            .provider
            .collect_dtmf(request)
            .await
            .map_err(|e| e.into_node_error("dtmf_collection_error"))?;
        match captured.digits {
            Some(digits) => {
                let mut output = Map::new();
                output.insert("digits".to_string(), Value::String(digits));
                Ok(HandlerOutput::success(output))
            }
            None => Ok(HandlerOutput::with_handle(Map::new(), "timeout")),
        }
    }
}

pub struct RequestPaymentHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for RequestPaymentHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let metadata = ctx
            .node
            .config
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| template::render_map(m, ctx.scope))
            .unwrap_or_default();
        let request = PaymentRequest {
            transaction_type: rendered(&ctx, "transaction_type")?,
            amount: rendered_number(&ctx, "amount", "payment_request_error")?,
            currency: rendered(&ctx, "currency")?,
            phone_number: rendered(&ctx, "phone_number")?,
            product_name: rendered(&ctx, "product_name")?,
            metadata,
        };
        let receipt = self
            .provider
            .request_payment(request)
            .await
            .map_err(|e| e.into_node_error("payment_request_error"))?;
        let output = serde_json::to_value(&receipt)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        Ok(HandlerOutput::success(output))
    }
}

pub struct RefundPaymentHandler {
    provider: Arc<dyn TelecomProvider>,
}

#[async_trait]
impl ActionHandler for RefundPaymentHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let amount = match ctx.node.config.get("amount") {
            Some(_) => Some(rendered_number(&ctx, "amount", "payment_refund_error")?),
            None => None,
        };
        let request = RefundRequest {
            transaction_id: rendered(&ctx, "transaction_id")?,
            amount,
        };
        let receipt = self
            .provider
            .refund_payment(request)
            .await
            .map_err(|e| e.into_node_error("payment_refund_error"))?;
        let output = serde_json::to_value(&receipt)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        Ok(HandlerOutput::success(output))
    }
}

/// Generic outbound HTTP call with its own per-request timeout.
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        HttpRequestHandler {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpRequestHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let method: reqwest::Method = rendered(&ctx, "method")?
            .parse()
            .map_err(|_| NodeError::validation("http_request_error", "invalid method"))?;
        let url = rendered(&ctx, "url")?;
        let timeout_ms = ctx
            .node
            .config
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(10_000);

        let mut request = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms));
        if let Some(headers) = ctx.node.config.get("headers").and_then(Value::as_object) {
            for (name, value) in template::render_map(headers, ctx.scope) {
                if let Value::String(value) = value {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(body) = ctx.node.config.get("body") {
            let rendered_body = match body {
                Value::Object(map) => Value::Object(template::render_map(map, ctx.scope)),
                Value::String(s) => Value::String(template::render(s, ctx.scope)),
                other => other.clone(),
            };
            request = request.json(&rendered_body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::timeout(format!("http request to {url} timed out"))
            } else {
                NodeError::transient("network_error", e.to_string())
            }
        })?;

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(NodeError::rate_limit(format!("{url} returned 429")));
        }
        if status.is_server_error() {
            return Err(NodeError::transient(
                "http_request_error",
                format!("{url} returned {status}"),
            ));
        }
        if status.is_client_error() {
            return Err(NodeError::permanent(
                "http_request_error",
                format!("{url} returned {status}: {body_text}"),
            ));
        }

        let body_value: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));
        let mut output = Map::new();
        output.insert("status".to_string(), Value::from(status.as_u16()));
        output.insert("body".to_string(), body_value);
        Ok(HandlerOutput::success(output))
    }
}
