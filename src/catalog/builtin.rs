//! Builtin node types: triggers, telecom actions, logic and state nodes.

use serde_json::json;
use serde_json::{Map, Value};

use super::config_schema::{ConfigIssue, ConfigSchema, FieldSchema, FieldShape};
use super::entry::{HandleSpec, NodeCatalog, NodeCatalogEntry, NodeCategory};
use crate::error::WorkflowResult;
use crate::workflow::RetryPolicy;

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 30_000;

pub(crate) fn register_builtins(catalog: &mut NodeCatalog) -> WorkflowResult<()> {
    for entry in trigger_entries() {
        catalog.register(entry)?;
    }
    for entry in action_entries() {
        catalog.register(entry)?;
    }
    for entry in logic_entries() {
        catalog.register(entry)?;
    }
    for entry in state_entries() {
        catalog.register(entry)?;
    }
    Ok(())
}

fn trigger(node_type: &str, name: &str) -> NodeCatalogEntry {
    let mut entry = NodeCatalogEntry::new(node_type, NodeCategory::Trigger, name);
    entry.output_handles = vec![HandleSpec::output("trigger")];
    entry.allows_multiple_outputs = true;
    entry
}

fn action(node_type: &str, name: &str) -> NodeCatalogEntry {
    let mut entry = NodeCatalogEntry::new(node_type, NodeCategory::Action, name);
    entry.input_handles = vec![HandleSpec::input("input")];
    entry.output_handles = vec![HandleSpec::output("success"), HandleSpec::output("error")];
    entry.allows_multiple_outputs = true;
    entry.default_timeout_ms = Some(DEFAULT_ACTION_TIMEOUT_MS);
    entry
}

fn trigger_entries() -> Vec<NodeCatalogEntry> {
    let mut entries = Vec::new();

    let mut sms = trigger("sms_received", "SMS received");
    sms.description = "Fires when an inbound SMS matches the optional number/keyword filter".into();
    sms.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("phone_number"),
        FieldSchema::string("keyword"),
        FieldSchema::bool("case_sensitive").default_value(json!(false)),
    ]);
    entries.push(sms);

    let mut ussd = trigger("ussd_session_start", "USSD session start");
    ussd.description = "Fires when a subscriber dials the service code".into();
    ussd.requires_session = true;
    ussd.config_schema = ConfigSchema::object(vec![FieldSchema::string("service_code")]);
    entries.push(ussd);

    let mut call = trigger("incoming_call", "Incoming call");
    call.requires_session = true;
    call.config_schema = ConfigSchema::object(vec![FieldSchema::string("phone_number")]);
    entries.push(call);

    let mut payment = trigger("payment_callback", "Payment callback");
    payment.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("transaction_type"),
        FieldSchema::string("status"),
    ]);
    entries.push(payment);

    let mut scheduled = trigger("scheduled", "Schedule");
    scheduled.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("cron_expression").required(),
        FieldSchema::string("timezone").default_value(json!("UTC")),
    ]);
    scheduled.custom_validate = Some(validate_scheduled);
    entries.push(scheduled);

    let mut webhook = trigger("http_webhook", "HTTP webhook");
    webhook.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("method")
            .required()
            .one_of(vec!["GET", "POST", "PUT", "DELETE", "PATCH"]),
        FieldSchema::string("path")
            .required()
            .pattern(r"^/[A-Za-z0-9/_-]*$"),
        FieldSchema::bool("require_auth").default_value(json!(false)),
        FieldSchema::string("auth_token"),
    ]);
    entries.push(webhook);

    entries
}

fn action_entries() -> Vec<NodeCatalogEntry> {
    let mut entries = Vec::new();

    let mut send_sms = action("send_sms", "Send SMS");
    send_sms.description = "Send a text message through the provider".into();
    send_sms.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("to").required(),
        FieldSchema::string("message").required(),
        FieldSchema::string("from"),
    ]);
    send_sms.default_retry_policy = Some(RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1_000,
        backoff_multiplier: 2.0,
        max_delay_ms: 30_000,
        retryable_errors: Some(vec!["rate_limit".into(), "network_error".into()]),
    });
    entries.push(send_sms);

    let mut ussd_resp = action("send_ussd_response", "Send USSD response");
    ussd_resp.requires_session = true;
    ussd_resp.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("message").required(),
        FieldSchema::bool("expect_input").default_value(json!(false)),
    ]);
    entries.push(ussd_resp);

    let mut call = action("initiate_call", "Initiate call");
    call.requires_session = true;
    call.output_handles.push(HandleSpec::output("no_answer"));
    call.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("to").required(),
        FieldSchema::string("from"),
    ]);
    entries.push(call);

    let mut ivr = action("play_ivr", "Play IVR prompt");
    ivr.requires_session = true;
    ivr.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("text"),
        FieldSchema::string("audio_url"),
    ]);
    ivr.custom_validate = Some(validate_play_ivr);
    entries.push(ivr);

    let mut dtmf = action("collect_dtmf", "Collect DTMF digits");
    dtmf.requires_session = true;
    dtmf.output_handles.push(HandleSpec::output("timeout"));
    dtmf.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("prompt"),
        FieldSchema::integer("num_digits").min(1),
        FieldSchema::string("finish_on_key"),
        FieldSchema::integer("timeout_ms").min(0),
    ]);
    entries.push(dtmf);

    let mut pay = action("request_payment", "Request payment");
    pay.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("transaction_type")
            .required()
            .one_of(vec!["checkout", "b2c", "b2b"]),
        FieldSchema::number("amount").required().min(0),
        FieldSchema::string("currency").required(),
        FieldSchema::string("phone_number").required(),
        FieldSchema::string("product_name").required(),
        FieldSchema::string_map("metadata"),
    ]);
    entries.push(pay);

    let mut refund = action("refund_payment", "Refund payment");
    refund.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("transaction_id").required(),
        FieldSchema::number("amount").min(0),
    ]);
    entries.push(refund);

    let mut http = action("http_request", "HTTP request");
    http.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("method")
            .required()
            .one_of(vec!["GET", "POST", "PUT", "DELETE", "PATCH"]),
        FieldSchema::string("url").required(),
        FieldSchema::string_map("headers"),
        FieldSchema::value("body"),
        FieldSchema::integer("timeout_ms")
            .min(1)
            .default_value(json!(10_000)),
    ]);
    entries.push(http);

    entries
}

fn logic_entries() -> Vec<NodeCatalogEntry> {
    let mut entries = Vec::new();

    let mut condition = NodeCatalogEntry::new("condition", NodeCategory::Logic, "Condition");
    condition.input_handles = vec![HandleSpec::input("input")];
    condition.output_handles = vec![HandleSpec::output("true"), HandleSpec::output("false")];
    condition.allows_multiple_outputs = true;
    condition.config_schema =
        ConfigSchema::object(vec![FieldSchema::string("expression").required()]);
    entries.push(condition);

    let mut switch = NodeCatalogEntry::new("switch", NodeCategory::Logic, "Switch");
    switch.input_handles = vec![HandleSpec::input("input")];
    switch.output_handles = vec![HandleSpec::output("default")];
    switch.allows_multiple_outputs = true;
    switch.config_schema = ConfigSchema::object(vec![
        FieldSchema::string("value").required(),
        FieldSchema::array(
            "cases",
            FieldShape::Object(vec![
                FieldSchema::string("value").required(),
                FieldSchema::string("label"),
            ]),
        )
        .required(),
    ]);
    entries.push(switch);

    let mut delay = NodeCatalogEntry::new("delay", NodeCategory::Logic, "Delay");
    delay.input_handles = vec![HandleSpec::input("input")];
    delay.output_handles = vec![HandleSpec::output("success")];
    delay.config_schema = ConfigSchema::object(vec![FieldSchema::integer("duration_ms")
        .required()
        .min(0)
        .max(86_400_000)]);
    entries.push(delay);

    let mut retry = NodeCatalogEntry::new("retry", NodeCategory::Logic, "Retry gate");
    retry.input_handles = vec![HandleSpec::input("input")];
    retry.output_handles = vec![
        HandleSpec::output("success"),
        HandleSpec::output("max_retries"),
    ];
    retry.allows_multiple_outputs = true;
    retry.config_schema = ConfigSchema::object(vec![
        FieldSchema::integer("max_attempts").min(1).default_value(json!(3)),
        FieldSchema::integer("initial_delay_ms").min(0).default_value(json!(1_000)),
        FieldSchema::number("backoff_multiplier").default_value(json!(2.0)),
        FieldSchema::integer("max_delay_ms").min(0).default_value(json!(30_000)),
    ]);
    entries.push(retry);

    let mut rate_limit = NodeCatalogEntry::new("rate_limit", NodeCategory::Logic, "Rate limit");
    rate_limit.input_handles = vec![HandleSpec::input("input")];
    rate_limit.output_handles = vec![HandleSpec::output("success")];
    rate_limit.config_schema = ConfigSchema::object(vec![
        FieldSchema::integer("max_requests").required().min(1),
        FieldSchema::integer("window_ms").required().min(1),
        FieldSchema::string("strategy")
            .one_of(vec!["fixed", "sliding"])
            .default_value(json!("fixed")),
        FieldSchema::string("key"),
    ]);
    entries.push(rate_limit);

    let mut merge = NodeCatalogEntry::new("merge", NodeCategory::Logic, "Merge branches");
    merge.input_handles = vec![HandleSpec::input("input")];
    merge.output_handles = vec![HandleSpec::output("success")];
    merge.allows_multiple_inputs = true;
    merge.config_schema = ConfigSchema::object(vec![FieldSchema::string("strategy")
        .one_of(vec!["first", "last", "all", "merge"])
        .default_value(json!("merge"))]);
    entries.push(merge);

    entries
}

fn state_entries() -> Vec<NodeCatalogEntry> {
    let mut entries = Vec::new();

    let mut read = NodeCatalogEntry::new("session_read", NodeCategory::State, "Read session data");
    read.requires_session = true;
    read.input_handles = vec![HandleSpec::input("input")];
    read.output_handles = vec![HandleSpec::output("success")];
    read.config_schema = ConfigSchema::object(vec![FieldSchema::array(
        "keys",
        FieldShape::String {
            pattern: None,
            one_of: None,
        },
    )]);
    entries.push(read);

    let mut write = NodeCatalogEntry::new("session_write", NodeCategory::State, "Write session data");
    write.requires_session = true;
    write.input_handles = vec![HandleSpec::input("input")];
    write.output_handles = vec![HandleSpec::output("success")];
    write.config_schema = ConfigSchema::object(vec![
        FieldSchema::string_map("data").required(),
        FieldSchema::bool("merge").default_value(json!(true)),
    ]);
    entries.push(write);

    let mut end = NodeCatalogEntry::new("session_end", NodeCategory::State, "End session");
    end.requires_session = true;
    end.ends_session = true;
    end.input_handles = vec![HandleSpec::input("input")];
    end.config_schema = ConfigSchema::object(vec![FieldSchema::string("message")]);
    entries.push(end);

    entries
}

fn validate_play_ivr(config: &Map<String, Value>) -> Vec<ConfigIssue> {
    let has = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    };
    match (has("text"), has("audio_url")) {
        (true, false) | (false, true) => Vec::new(),
        _ => vec![ConfigIssue::new(
            "text",
            "exactly one of text or audio_url must be set",
        )],
    }
}

fn validate_scheduled(config: &Map<String, Value>) -> Vec<ConfigIssue> {
    let Some(expr) = config.get("cron_expression").and_then(Value::as_str) else {
        return vec![ConfigIssue::new("cron_expression", "missing required field")];
    };
    let fields = expr.split_whitespace().count();
    if !(5..=6).contains(&fields) {
        return vec![ConfigIssue::new(
            "cron_expression",
            format!("expected 5 or 6 fields, got {fields}"),
        )];
    }
    Vec::new()
}
