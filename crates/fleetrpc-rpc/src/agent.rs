//! Server-side dispatch: turns a decoded request into an executed action
//! and a reply.

use crate::audit::Auditor;
use crate::{Reply, Request, RpcError};
use fleetrpc_ddl::{Ddl, ValidationRule, Validator};
use fleetrpc_types::{Envelope, RuntimeConfig};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// An action implementation.
pub type ActionHandler = dyn Fn(&Request, &mut Reply) -> Result<(), RpcError> + Send + Sync;

/// Named action handlers of one agent.
#[derive(Default)]
pub struct ActionTable {
    handlers: BTreeMap<String, Box<ActionHandler>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Request, &mut Reply) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&ActionHandler> {
        self.handlers.get(name).map(|handler| handler.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// An RPC agent.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// The agent's contract.
    fn ddl(&self) -> &Ddl;

    /// Resolves an action by name.
    fn action(&self, name: &str) -> Option<&ActionHandler>;

    /// Rejects a request by returning an error. Any error becomes status 5.
    fn authorization_hook(&self, _request: &Request) -> Result<(), RpcError> {
        Ok(())
    }

    fn before_processing_hook(&self, _request: &Request, _reply: &mut Reply) {}

    /// Runs after every request, including failed ones.
    fn after_processing_hook(&self, _request: &Request, _reply: &mut Reply) {}

    /// Seconds the agent may spend on one request.
    fn timeout(&self) -> u64 {
        self.ddl().timeout()
    }
}

/// Whether an agent should be loaded.
///
/// `<agent>.activate_agent` in the plugin settings wins over the global
/// `activate_agents` default.
pub fn agent_activated(name: &str, config: &RuntimeConfig) -> bool {
    let activated = config
        .plugin_flag(&format!("{}.activate_agent", name))
        .unwrap_or(config.activate_agents);
    tracing::debug!(agent = %name, activated, "agent activation");
    activated
}

/// Checks one request argument against a validation rule, for use inside
/// actions.
pub fn validate_input(
    request: &Request,
    key: &str,
    rule: &ValidationRule,
    validator: &Validator,
) -> Result<(), RpcError> {
    let value = request
        .get(key)
        .ok_or_else(|| RpcError::MissingData(format!("please supply a {} argument", key)))?;
    validator.validate(value, rule).map_err(|e| {
        RpcError::InvalidData(format!("Input {} did not pass validation: {}", key, e))
    })
}

/// Handles one decoded request.
///
/// Every failure becomes a status code on the reply. Returns `None` when
/// the sender asked for no reply.
pub fn handlemsg(agent: &dyn Agent, envelope: &Envelope, ddl: &Ddl, auditor: &dyn Auditor) -> Option<Value> {
    let request = Request::new(envelope, ddl);
    let mut reply = Reply::new(&request.action, ddl);

    if let Err(err) = dispatch(agent, &request, &mut reply, ddl, auditor) {
        if matches!(err, RpcError::Unknown(_) | RpcError::Unexpected(_)) {
            tracing::error!(
                agent = %agent.name(),
                action = %request.action,
                kind = err.kind(),
                "{}#{} failed: {}",
                agent.name(),
                request.action,
                err
            );
            if matches!(err, RpcError::Unexpected(_)) {
                tracing::error!(
                    agent = %agent.name(),
                    action = %request.action,
                    error = ?err,
                    requestid = %request.uniqid,
                    "failure details"
                );
            }
        }
        reply.fail_with(err.to_string(), err.status_code());
    }

    agent.after_processing_hook(&request, &mut reply);

    if request.should_respond() {
        Some(reply.to_value())
    } else {
        tracing::debug!(requestid = %request.uniqid, "client did not request a response, suppressing reply");
        None
    }
}

fn dispatch(
    agent: &dyn Agent,
    request: &Request,
    reply: &mut Reply,
    ddl: &Ddl,
    auditor: &dyn Auditor,
) -> Result<(), RpcError> {
    request.validate(ddl)?;

    agent
        .authorization_hook(request)
        .map_err(|e| RpcError::Unexpected(e.to_string()))?;

    auditor.audit_request(request);
    agent.before_processing_hook(request, reply);

    let handler = agent.action(&request.action).ok_or_else(|| {
        RpcError::UnknownAction(format!(
            "Unknown action '{}' for agent '{}'",
            request.action, request.agent
        ))
    })?;

    match panic::catch_unwind(AssertUnwindSafe(|| handler(request, reply))) {
        Ok(result) => result,
        Err(payload) => Err(RpcError::Unexpected(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "action panicked".to_string()
    }
}
