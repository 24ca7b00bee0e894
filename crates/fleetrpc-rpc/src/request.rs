//! Typed view over a decoded request.

use fleetrpc_ddl::{Ddl, DdlError};
use fleetrpc_types::Envelope;
use serde_json::{json, Map, Value};

/// A decoded request as seen by an agent.
///
/// Data keys are reconciled against the DDL once, at construction, so
/// lookups work with canonical input names.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Creation time of the message, Unix seconds.
    pub time: i64,
    pub action: String,
    pub agent: String,
    /// Usually a mapping, but senders may put anything here.
    pub data: Value,
    pub sender: String,
    /// The request id.
    pub uniqid: String,
    /// Authenticated caller, `"unknown"` when none was established.
    pub caller: String,
}

fn body_field<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key).or_else(|| body.get(format!(":{}", key)))
}

fn body_str(body: &Value, key: &str) -> String {
    body_field(body, key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl Request {
    pub fn new(envelope: &Envelope, ddl: &Ddl) -> Self {
        let body = &envelope.body;
        let action = body_str(body, "action");

        let data = match body_field(body, "data") {
            Some(Value::Object(map)) => Value::Object(ddl.reconcile_keys(&action, map)),
            Some(other) => other.clone(),
            None => Value::Object(Map::new()),
        };

        Self {
            time: envelope.msgtime,
            agent: body_str(body, "agent"),
            action,
            data,
            sender: envelope.senderid.clone(),
            uniqid: envelope.requestid.clone(),
            caller: envelope
                .callerid
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Resolves `key` to the form present in the data: the key itself, or
    /// its canonical name when given in `:name` form.
    pub fn compatible_key<'k>(&self, key: &'k str) -> &'k str {
        let Some(map) = self.data.as_object() else {
            return key;
        };
        if map.contains_key(key) {
            return key;
        }
        match key.strip_prefix(':') {
            Some(name) if map.contains_key(name) => name,
            _ => key,
        }
    }

    /// Looks up a data value. `None` for absent keys and non-mapping data.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_object()?.get(self.compatible_key(key))
    }

    pub fn fetch<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    /// Whether the data holds `key`. Always `false` for non-mapping data.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether the sender wants a reply, from the `process_results` flag.
    /// An explicit `false` or `null` suppresses the reply.
    pub fn should_respond(&self) -> bool {
        !["process_results", ":process_results"]
            .iter()
            .any(|key| matches!(self.get(key), Some(Value::Null | Value::Bool(false))))
    }

    /// Checks the request against the agent's contract.
    pub fn validate(&self, ddl: &Ddl) -> Result<(), DdlError> {
        let empty = Map::new();
        let arguments = self.data.as_object().unwrap_or(&empty);
        ddl.validate_rpc_request(&self.action, arguments)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "action": self.action,
            "agent": self.agent,
            "data": self.data,
        })
    }
}
