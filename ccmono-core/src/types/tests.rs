use super::*;
use serde_json::json;

fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn message_roundtrip_user() {
    let msg = Message::User(UserMessage::text("hello"));
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "user");
    assert_eq!(value["content"][0]["type"], "text");
    assert_eq!(value["content"][0]["text"], "hello");

    let parsed: Message = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, msg);
}

#[test]
fn message_roundtrip_assistant_with_all_content_variants() {
    let msg = Message::Assistant(AssistantMessage::new(
        vec![
            Content::thinking("let me see"),
            Content::text("reading it"),
            Content::ToolCall(ToolCall::new(
                "call-1",
                "Read",
                params(&[("file_path", json!("/tmp/a.txt"))]),
            )),
            Content::Image {
                source: ImageSource::base64("aGk=", "image/png"),
            },
        ],
        "openai",
        "gpt-4o",
        Usage::new(10, 5),
        StopReason::ToolUse,
    ));

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "assistant");
    assert_eq!(value["stop_reason"], "tool_use");
    assert_eq!(value["content"][2]["type"], "tool_call");
    assert_eq!(value["content"][2]["params"]["file_path"], "/tmp/a.txt");
    assert_eq!(value["content"][3]["source"]["media_type"], "image/png");

    let parsed: Message = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, msg);
}

#[test]
fn message_roundtrip_tool_result() {
    let mut result =
        ToolResultMessage::new("call-1", "Read", vec![Content::text("BODY")], false);
    result.details = Some(json!({"bytes": 4}));
    let msg = Message::ToolResult(result);

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "tool_result");
    assert_eq!(value["tool_call_id"], "call-1");
    assert_eq!(value["is_error"], false);

    let parsed: Message = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, msg);
}

#[test]
fn agent_message_ids_are_monotonic() {
    let a = AgentMessage::user("one");
    let b = AgentMessage::user("two");
    assert_ne!(a.id, b.id);

    let seq = |m: &AgentMessage| {
        m.id
            .rsplit('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap()
    };
    assert!(seq(&b) > seq(&a));
}

#[test]
fn stop_reason_wire_names() {
    assert_eq!(serde_json::to_value(StopReason::EndTurn).unwrap(), "end_turn");
    assert_eq!(serde_json::to_value(StopReason::ToolUse).unwrap(), "tool_use");
    assert_eq!(
        serde_json::to_value(StopReason::StopSequence).unwrap(),
        "stop_sequence"
    );
}

#[test]
fn thinking_level_cycle() {
    assert_eq!(ThinkingLevel::None.next(), ThinkingLevel::Low);
    assert_eq!(ThinkingLevel::High.next(), ThinkingLevel::None);
    assert_eq!(ThinkingLevel::parse("medium"), Some(ThinkingLevel::Medium));
    assert_eq!(ThinkingLevel::parse("bogus"), None);
}

#[test]
fn usage_accumulates() {
    let mut total = Usage::default();
    total.add(&Usage::new(100, 20));
    total.add(&Usage::new(50, 10));
    assert_eq!(total.input_tokens, 150);
    assert_eq!(total.output_tokens, 30);
    assert_eq!(total.total_tokens, 180);
}

#[test]
fn model_cost() {
    let model = Model {
        input_cost_per_1m: 3.0,
        output_cost_per_1m: 15.0,
        ..Model::default()
    };
    let cost = model.cost(&Usage::new(1_000_000, 1_000_000));
    assert!((cost - 18.0).abs() < f64::EPSILON);
}

#[test]
fn extract_text_skips_non_text_blocks() {
    let content = vec![
        Content::text("a"),
        Content::thinking("ignored"),
        Content::text("b"),
    ];
    assert_eq!(extract_text(&content), "ab");
}
