use serde_json::Value;

/// An inbound frame, routed by the second segment of its `Topic`
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response(Value),
    Status(Value),
    Notice(Value),
    Error(Value),
    /// Valid JSON nobody handles, with the topic type if there was one
    Unknown(Option<String>),
    /// Not JSON at all
    Invalid(String),
}

/// Keys that mark a topic-less message as probably carrying status
const STATUS_HINT_KEYS: &[&str] = &["Data", "StatusData", "PrintInfo"];

/// `sdcp/<type>/<id>` -> `<type>`
pub fn topic_kind(topic: &str) -> Option<&str> {
    topic.split('/').nth(1)
}

/// `sdcp/<type>/<id>` -> `<id>`
pub fn topic_target(topic: &str) -> Option<&str> {
    topic.split('/').nth(2)
}

pub(crate) fn parse_message(text: &str) -> Message {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Message::Invalid(e.to_string()),
    };

    let Some(obj) = value.as_object() else {
        return Message::Unknown(None);
    };

    match obj.get("Topic").and_then(Value::as_str) {
        Some(topic) => match topic_kind(topic).unwrap_or_default() {
            "response" => Message::Response(value),
            "status" => Message::Status(value),
            "notice" => Message::Notice(value),
            "error" => Message::Error(value),
            other => Message::Unknown(Some(other.to_string())),
        },
        None if STATUS_HINT_KEYS.iter().any(|k| obj.contains_key(*k)) => Message::Status(value),
        None => Message::Unknown(None),
    }
}
