//! Task message wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A unit of work as published to the broker:
/// `{id, task, args, kwargs}` plus any extra fields merged in by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Opaque unique token.
    pub id: String,
    /// Registered task name.
    pub task: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskMessage {
    /// A message with a fresh v4 id and no kwargs.
    pub fn new(task: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            args,
            kwargs: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        // Derived Serialize over JSON-native fields cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// How a message fans out from its routing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Point-to-point: exactly the routed queue.
    #[default]
    Direct,
    /// Every queue bound under the routed exchange name.
    Broadcast,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Broadcast => "broadcast",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_sit_beside_core_fields() {
        let mut extra = Map::new();
        extra.insert("time_limit".to_string(), json!(30));
        let msg = TaskMessage {
            id: "abc".to_string(),
            task: "f".to_string(),
            args: vec![json!(1)],
            kwargs: Map::new(),
            extra,
        };

        let value = msg.to_json();
        assert_eq!(
            value,
            json!({"id": "abc", "task": "f", "args": [1], "kwargs": {}, "time_limit": 30})
        );
        assert_eq!(TaskMessage::from_json(value).unwrap(), msg);
    }

    #[test]
    fn missing_args_and_kwargs_default_to_empty() {
        let msg = TaskMessage::from_json(json!({"id": "x", "task": "f"})).unwrap();
        assert!(msg.args.is_empty());
        assert!(msg.kwargs.is_empty());
        assert!(msg.extra.is_empty());
    }
}
