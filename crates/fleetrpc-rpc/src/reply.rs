use fleetrpc_ddl::Ddl;
use fleetrpc_types::{ReplyBody, StatusCode};
use serde_json::{Map, Value};

/// The reply an action fills in.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub statuscode: StatusCode,
    pub statusmsg: String,
    pub data: Map<String, Value>,
}

impl Reply {
    /// Creates a successful reply holding the declared output defaults of
    /// `action`.
    pub fn new(action: &str, ddl: &Ddl) -> Self {
        let mut reply = Self {
            statuscode: StatusCode::Ok,
            statusmsg: "OK".to_string(),
            data: Map::new(),
        };
        reply.initialize_data(action, ddl);
        reply
    }

    /// Sets every declared output of `action` to its default, or null when
    /// it has none. Undeclared actions leave the data empty.
    pub fn initialize_data(&mut self, action: &str, ddl: &Ddl) {
        let Some(spec) = ddl.action_interface(action) else {
            return;
        };
        for (name, output) in &spec.output {
            let value = output.default.clone().unwrap_or(Value::Null);
            self.data.insert(name.clone(), value);
        }
    }

    /// Marks the reply as aborted.
    pub fn fail(&mut self, msg: impl Into<String>) {
        self.fail_with(msg, StatusCode::Aborted);
    }

    pub fn fail_with(&mut self, msg: impl Into<String>, code: StatusCode) {
        self.statuscode = code;
        self.statusmsg = msg.into();
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn to_body(&self) -> ReplyBody {
        ReplyBody {
            statuscode: self.statuscode,
            statusmsg: self.statusmsg.clone(),
            data: self.data.clone(),
        }
    }

    /// `{statuscode, statusmsg, data}`.
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        body.insert("statuscode".to_string(), Value::from(self.statuscode.as_u8()));
        body.insert("statusmsg".to_string(), Value::String(self.statusmsg.clone()));
        body.insert("data".to_string(), Value::Object(self.data.clone()));
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetrpc_ddl::OutputSpec;
    use fleetrpc_types::{PluginKind, RunMode};
    use serde_json::json;

    fn make_test_ddl() -> Ddl {
        let mut ddl = Ddl::new("rpcutil", PluginKind::Agent, RunMode::Server);
        ddl.action("get_fact", Some("Retrieve a fact"), |a| {
            a.output("fact", OutputSpec::new("The fact", "Fact"));
            a.output("value", OutputSpec::new("The value", "Value").default_value(json!("")));
            Ok(())
        })
        .unwrap();
        ddl
    }

    #[test]
    fn new_reply_is_ok_with_output_defaults() {
        let reply = Reply::new("get_fact", &make_test_ddl());
        assert_eq!(reply.statuscode, StatusCode::Ok);
        assert_eq!(reply.statusmsg, "OK");
        assert_eq!(reply.get("value"), Some(&json!("")));
        assert_eq!(reply.get("fact"), Some(&Value::Null));
    }

    #[test]
    fn undeclared_action_has_no_data() {
        let reply = Reply::new("nope", &make_test_ddl());
        assert!(reply.data.is_empty());
    }

    #[test]
    fn fail_defaults_to_aborted() {
        let mut reply = Reply::new("get_fact", &make_test_ddl());
        reply.fail("gave up");
        assert_eq!(reply.statuscode, StatusCode::Aborted);
        reply.fail_with("bad input", StatusCode::InvalidData);
        assert_eq!(reply.statuscode, StatusCode::InvalidData);
        assert_eq!(reply.statusmsg, "bad input");
    }

    #[test]
    fn to_value_shape() {
        let mut reply = Reply::new("get_fact", &make_test_ddl());
        reply.set("value", json!("Debian"));
        assert_eq!(
            reply.to_value(),
            json!({"statuscode": 0, "statusmsg": "OK", "data": {"fact": null, "value": "Debian"}})
        );
        assert_eq!(reply.to_body().data["value"], json!("Debian"));
    }
}
