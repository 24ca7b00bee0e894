//! The agent host: receives request messages, dispatches them to the
//! registered agents and publishes the replies.

use fleetrpc_message::{Connector, Message, MessageError, SecurityProvider};
use fleetrpc_rpc::{agent_activated, handlemsg, Agent, Auditor, Clock, LogAuditor, SystemClock};
use fleetrpc_types::RuntimeConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Errors raised while handling one inbound message.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("no agent named '{0}' is registered")]
    UnknownAgent(String),

    #[error("request carries no agent name")]
    MissingAgent,
}

/// What became of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A reply was published.
    Replied,
    /// The action ran but the sender asked for no reply.
    NoReply,
    /// Expired or aimed at other nodes.
    Dropped,
}

/// Hosts agents behind a security provider and a connector.
pub struct AgentHost {
    config: RuntimeConfig,
    security: Arc<dyn SecurityProvider>,
    connector: Arc<dyn Connector>,
    auditor: Arc<dyn Auditor>,
    clock: Arc<dyn Clock>,
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentHost {
    pub fn new(
        config: RuntimeConfig,
        security: Arc<dyn SecurityProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            security,
            connector,
            auditor: Arc::new(LogAuditor),
            clock: Arc::new(SystemClock),
            agents: BTreeMap::new(),
        }
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registers an agent unless activation is disabled for it. Returns
    /// whether the agent was registered.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> bool {
        let name = agent.name().to_string();
        if !agent_activated(&name, &self.config) {
            tracing::info!(agent = %name, "agent is not activated, skipping");
            return false;
        }
        tracing::info!(
            agent = %name,
            actions = ?agent.ddl().actions(),
            timeout = agent.timeout(),
            "registered agent"
        );
        self.agents.insert(name, agent);
        true
    }

    /// Names of the registered agents.
    pub fn agents(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Handles one inbound request message.
    ///
    /// # Errors
    ///
    /// Returns `HostError` when the message cannot be decoded, names no
    /// registered agent, or the reply cannot be encoded or published.
    /// Expired and untargeted requests are not errors.
    pub fn receive(&self, mut message: Message) -> Result<Disposition, HostError> {
        message.decode(self.security.as_ref())?;

        let now = self.clock.now().floor() as i64;
        match message.validate(self.security.as_ref(), now) {
            Ok(()) => {}
            Err(e) if e.is_silent_drop() => {
                tracing::debug!(error = %e, "dropping message");
                return Ok(Disposition::Dropped);
            }
            Err(e) => return Err(e.into()),
        }

        let envelope = message
            .decoded()
            .ok_or(MessageError::InvalidPayload("request was not decoded"))?;

        let name = message
            .agent
            .clone()
            .or_else(|| {
                envelope
                    .body
                    .get("agent")
                    .and_then(|agent| agent.as_str())
                    .map(str::to_string)
            })
            .ok_or(HostError::MissingAgent)?;
        let agent = self
            .agents
            .get(&name)
            .ok_or_else(|| HostError::UnknownAgent(name.clone()))?;

        let Some(body) = handlemsg(agent.as_ref(), envelope, agent.ddl(), self.auditor.as_ref()) else {
            return Ok(Disposition::NoReply);
        };

        let mut reply = Message::reply_to_request(body, &message, &self.config);
        reply.encode(self.security.as_ref())?;
        reply.publish(self.connector.as_ref())?;

        tracing::debug!(
            agent = %name,
            requestid = %reply.requestid().unwrap_or_default(),
            "published reply"
        );
        Ok(Disposition::Replied)
    }

    /// Handles inbound messages until the channel closes, one blocking task
    /// per message. Returns once every started task has finished.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                received = inbound.recv() => {
                    let Some(message) = received else { break };
                    let host = Arc::clone(&self);
                    tasks.spawn_blocking(move || host.receive(message));
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    log_outcome(finished);
                }
            }
        }

        while let Some(finished) = tasks.join_next().await {
            log_outcome(finished);
        }
        tracing::info!("inbound channel closed, agent host stopped");
    }
}

fn log_outcome(finished: Result<Result<Disposition, HostError>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(disposition)) => {
            tracing::debug!(?disposition, "message handled");
        }
        Ok(Err(e)) => {
            tracing::error!("failed to handle message: {}", e);
        }
        Err(e) => {
            tracing::error!("message task join error: {}", e);
        }
    }
}
