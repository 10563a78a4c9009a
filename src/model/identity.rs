//! Task identity and the lock-name encoding.
//!
//! Encoding: `"<task>"` when there are no arguments, otherwise
//! `"<task>:<json(args)>"`. The sweeper parses flag rows back into
//! identities, so task names may never contain the separator.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SEPARATOR: char = ':';

/// `(task name, positional args)`. Argument order and JSON types are part of identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub task: String,
    pub args: Vec<Value>,
}

impl TaskIdentity {
    pub fn new(task: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            task: task.into(),
            args,
        }
    }

    /// The deduplication key shared by the advisory lock and the flag row.
    pub fn lock_name(&self) -> String {
        if self.args.is_empty() {
            self.task.clone()
        } else {
            // Value's Display is compact JSON and cannot fail.
            format!(
                "{}{SEPARATOR}{}",
                self.task,
                Value::Array(self.args.clone())
            )
        }
    }

    /// Parse a lock name back into the identity that produced it.
    pub fn parse(lock_name: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedLockName {
            name: lock_name.to_string(),
            reason,
        };

        let Some((task, raw_args)) = lock_name.split_once(SEPARATOR) else {
            if lock_name.is_empty() {
                return Err(malformed("empty task name".to_string()));
            }
            return Ok(Self::new(lock_name, Vec::new()));
        };

        if task.is_empty() {
            return Err(malformed("empty task name".to_string()));
        }

        match serde_json::from_str::<Value>(raw_args) {
            Ok(Value::Array(args)) => Ok(Self::new(task, args)),
            Ok(other) => Err(malformed(format!("arguments are not a JSON array: {other}"))),
            Err(e) => Err(malformed(format!("arguments are not valid JSON: {e}"))),
        }
    }
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lock_name())
    }
}

/// Task names must be non-empty, free of whitespace, and must not contain `:`.
pub fn validate_task_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains(SEPARATOR) {
        "must not contain ':'"
    } else if name.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(Error::InvalidTaskName {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_args_is_bare_task_name() {
        let id = TaskIdentity::new("recompute", vec![]);
        assert_eq!(id.lock_name(), "recompute");
    }

    #[test]
    fn args_are_compact_json_after_separator() {
        assert_eq!(TaskIdentity::new("recompute", vec![json!(42)]).lock_name(), "recompute:[42]");
        assert_eq!(
            TaskIdentity::new("f", vec![json!(1), json!("foo")]).lock_name(),
            r#"f:[1,"foo"]"#
        );
    }

    #[test]
    fn argument_types_are_part_of_identity() {
        let int = TaskIdentity::new("f", vec![json!(1)]);
        let string = TaskIdentity::new("f", vec![json!("1")]);
        assert_ne!(int.lock_name(), string.lock_name());
    }

    #[test]
    fn parses_back_what_it_encodes() {
        for args in [
            vec![json!(42)],
            vec![json!(1), json!("foo")],
            vec![json!("bar")],
            vec![json!(true), json!(false)],
            vec![],
        ] {
            let id = TaskIdentity::new("awx.main.tasks.f", args);
            assert_eq!(TaskIdentity::parse(&id.lock_name()).unwrap(), id);
        }
    }

    #[test]
    fn string_args_may_contain_separator() {
        let id = TaskIdentity::new("f", vec![json!("a:b")]);
        assert_eq!(TaskIdentity::parse(&id.lock_name()).unwrap(), id);
    }

    #[test]
    fn rejects_garbage_arguments() {
        assert!(TaskIdentity::parse("f:not json").is_err());
        assert!(TaskIdentity::parse(r#"f:{"a":1}"#).is_err());
        assert!(TaskIdentity::parse(":[1]").is_err());
        assert!(TaskIdentity::parse("").is_err());
    }

    #[test]
    fn task_name_validation() {
        assert!(validate_task_name("awx.main.scheduler.run_task_manager").is_ok());
        assert!(validate_task_name("").is_err());
        assert!(validate_task_name("a:b").is_err());
        assert!(validate_task_name("two words").is_err());
    }
}
