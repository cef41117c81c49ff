use serde_json::Value;

/// Key/value payload handed to step handlers
pub type Payload = serde_json::Map<String, Value>;

/// Key under which a scalar or array input is wrapped
pub const WRAPPED_VALUE_KEY: &str = "value";

/// Coerce an arbitrary value into a handler payload.
///
/// Objects pass through field by field, `null` becomes an empty payload and
/// anything else is wrapped under [`WRAPPED_VALUE_KEY`].
pub fn to_payload(value: &Value) -> Payload {
    match value {
        Value::Object(map) => map.clone(),
        Value::Null => Payload::new(),
        other => {
            let mut payload = Payload::new();
            payload.insert(WRAPPED_VALUE_KEY.to_string(), other.clone());
            payload
        }
    }
}
