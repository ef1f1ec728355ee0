use serde_json::{Map, Value};

/// A bridge message: a JSON object whose only fields with protocol meaning
/// are `action` and `request_id`. Everything else is payload.
pub type Message = Map<String, Value>;

pub const ACTION_FIELD: &str = "action";
pub const REQUEST_ID_FIELD: &str = "request_id";
pub const STATUS_FIELD: &str = "status";
pub const ERROR_FIELD: &str = "error";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub const ERR_NOT_CONNECTED: &str = "extension not connected";
pub const ERR_TIMEOUT: &str = "timeout waiting for extension response";
pub const ERR_AUTH_REQUIRED: &str = "Authentication required. Send 'AUTH <token>' as first line.";

/// Parse a JSON text into a message. Non-object values are rejected.
pub fn parse(bytes: &[u8]) -> std::result::Result<Message, String> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The correlation id carried by a message, if it is a non-negative integer.
pub fn request_id(message: &Message) -> Option<u64> {
    message.get(REQUEST_ID_FIELD).and_then(Value::as_u64)
}

/// Overwrite the correlation id. Callers never control this field.
pub fn set_request_id(message: &mut Message, id: u64) {
    message.insert(REQUEST_ID_FIELD.to_string(), Value::from(id));
}

pub fn take_request_id(message: &mut Message) -> Option<Value> {
    message.remove(REQUEST_ID_FIELD)
}

pub fn action(message: &Message) -> Option<&str> {
    message.get(ACTION_FIELD).and_then(Value::as_str)
}

/// `{"status": "error", "error": <text>}`
pub fn error_response(text: impl Into<String>) -> Message {
    let mut map = Map::new();
    map.insert(STATUS_FIELD.to_string(), Value::from(STATUS_ERROR));
    map.insert(ERROR_FIELD.to_string(), Value::from(text.into()));
    map
}

pub fn is_error(message: &Message) -> bool {
    message.get(STATUS_FIELD).and_then(Value::as_str) == Some(STATUS_ERROR)
}
