//! The built-in `rpcutil` agent.

use fleetrpc_ddl::{Ddl, DdlError};
use fleetrpc_rpc::{ActionHandler, ActionTable, Agent, Reply, Request, RpcError};
use fleetrpc_types::{PluginKind, RunMode, RuntimeConfig};
use serde_json::{json, Value};

const RPCUTIL_DDL: &str = include_str!("../ddl/rpcutil.toml");

/// Agent name.
pub const RPCUTIL: &str = "rpcutil";

/// One row of the agent inventory.
pub fn inventory_entry(agent: &dyn Agent) -> Value {
    let meta = agent.ddl().meta();
    json!({
        "agent": agent.name(),
        "name": meta.name,
        "description": meta.description,
        "author": meta.author,
        "license": meta.license,
        "version": meta.version,
        "url": meta.url,
        "timeout": agent.timeout(),
    })
}

/// Answers liveness and introspection requests.
pub struct RpcutilAgent {
    ddl: Ddl,
    actions: ActionTable,
}

impl RpcutilAgent {
    /// Builds the agent. `inventory` describes the other hosted agents;
    /// this agent adds itself.
    pub fn new(mut inventory: Vec<Value>, config: &RuntimeConfig) -> Result<Self, DdlError> {
        let ddl = Ddl::from_toml_str(RPCUTIL, PluginKind::Agent, RunMode::Server, RPCUTIL_DDL)?;

        let mut agent = Self {
            ddl,
            actions: ActionTable::new(),
        };
        inventory.push(inventory_entry(&agent));
        inventory.sort_by(|a, b| a["agent"].as_str().cmp(&b["agent"].as_str()));

        agent.actions.register("ping", ping);

        agent.actions.register("agent_inventory", move |_req: &Request, reply: &mut Reply| {
            reply.set("agents", Value::Array(inventory.clone()));
            Ok(())
        });

        let main_collective = config.main_collective.clone();
        let mut collectives = config.collectives.clone();
        if !collectives.contains(&main_collective) {
            collectives.insert(0, main_collective.clone());
        }
        agent.actions.register("collective_info", move |_req: &Request, reply: &mut Reply| {
            reply.set("main_collective", json!(main_collective));
            reply.set("collectives", json!(collectives));
            Ok(())
        });

        Ok(agent)
    }
}

fn ping(_request: &Request, reply: &mut Reply) -> Result<(), RpcError> {
    reply.set("pong", json!(chrono::Utc::now().timestamp()));
    Ok(())
}

impl Agent for RpcutilAgent {
    fn name(&self) -> &str {
        RPCUTIL
    }

    fn ddl(&self) -> &Ddl {
        &self.ddl
    }

    fn action(&self, name: &str) -> Option<&ActionHandler> {
        self.actions.get(name)
    }
}
