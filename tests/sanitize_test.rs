use tracewrap::events::{Event, EventBody, Source};
use tracewrap::sanitize;

fn event_with_body(value: serde_json::Value) -> Event {
    Event::new(
        "sess1",
        Source::Internal,
        EventBody::ToolExecution {
            execution_id: "exec1".to_string(),
            tool_name: "demo".to_string(),
            parameters: value,
            result_summary: String::new(),
            duration_ms: 1,
        },
    )
}

#[test]
fn session_id_envelope_field_survives_sanitization() {
    let mut event = event_with_body(serde_json::json!({ "note": "fine" }));
    event.session_id = "keep-me-visible".to_string();
    sanitize::sanitize_event(&mut event, false).unwrap();
    assert_eq!(event.session_id, "keep-me-visible");
}

#[test]
fn api_key_shaped_value_is_redacted_by_content_even_under_a_neutral_key() {
    let mut event = event_with_body(serde_json::json!({
        "value": "sk-abcdefghijklmnopqrstuvwxyz0123456789"
    }));
    sanitize::sanitize_event(&mut event, false).unwrap();
    match &event.body {
        EventBody::ToolExecution { parameters, .. } => {
            let rendered = parameters.get("value").unwrap().as_str().unwrap();
            assert_eq!(rendered, sanitize::REDACTION_MARKER);
        }
        _ => panic!("expected ToolExecution"),
    }
}

#[test]
fn low_tier_email_only_redacted_in_high_security_mode() {
    let mut lax = event_with_body(serde_json::json!({ "notes": "contact a@example.com" }));
    sanitize::sanitize_event(&mut lax, false).unwrap();
    let EventBody::ToolExecution { parameters, .. } = &lax.body else { unreachable!() };
    assert!(parameters["notes"].as_str().unwrap().contains("a@example.com"));

    let mut strict = event_with_body(serde_json::json!({ "notes": "contact a@example.com" }));
    sanitize::sanitize_event(&mut strict, true).unwrap();
    let EventBody::ToolExecution { parameters, .. } = &strict.body else { unreachable!() };
    assert!(!parameters["notes"].as_str().unwrap().contains("a@example.com"));
}

#[test]
fn validate_rejects_nonpositive_timestamp() {
    let mut event = event_with_body(serde_json::json!({}));
    event.timestamp = 0;
    assert!(sanitize::validate(&event).is_err());
}
