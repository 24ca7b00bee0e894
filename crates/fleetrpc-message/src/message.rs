//! The [`Message`] envelope and its type-state rules.

use crate::security::{Connector, RequestParts, SecurityProvider};
use crate::MessageError;
use fleetrpc_types::{Envelope, Filter, RuntimeConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The role a message plays on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    /// Plain message. Cannot be encoded or decoded.
    #[default]
    Message,
    /// Broadcast request, matched against each node's filter.
    Request,
    /// Request addressed to a known list of hosts.
    DirectRequest,
    Reply,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::Request => "request",
            MessageType::DirectRequest => "direct_request",
            MessageType::Reply => "reply",
        }
    }

    fn is_request(self) -> bool {
        matches!(self, MessageType::Request | MessageType::DirectRequest)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(MessageType::Message),
            "request" => Ok(MessageType::Request),
            "direct_request" => Ok(MessageType::DirectRequest),
            "reply" => Ok(MessageType::Reply),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// The payload in its current stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// An unencoded body, as built by a client or an agent.
    Body(Value),
    /// Bytes produced by the security provider or received from the bus.
    Wire(Vec<u8>),
    /// The result of a successful decode.
    Decoded(Envelope),
}

/// Construction options for [`Message::new`].
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// The payload bytes are base64 encoded.
    pub base64: bool,
    pub agent: Option<String>,
    pub collective: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub msg_type: MessageType,
    pub filter: Filter,
    /// Time-to-live in seconds. Defaults to the configured TTL.
    pub ttl: Option<u64>,
    pub expected_msgid: Option<String>,
    pub requestid: Option<String>,
}

/// The request a reply answers, captured when the reply is built.
#[derive(Debug, Clone, PartialEq)]
struct RequestContext {
    requestid: String,
    callerid: Option<String>,
}

/// The configuration values a message needs.
#[derive(Debug, Clone)]
struct Addressing {
    identity: String,
    direct_addressing: bool,
    threshold: usize,
}

impl Addressing {
    fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            identity: config.identity.clone(),
            direct_addressing: config.direct_addressing,
            threshold: config.direct_addressing_threshold,
        }
    }
}

/// One wire-level unit: a request, a direct request, a reply or a plain
/// message.
///
/// A message is encoded once before [`publish`](Message::publish) and
/// decoded once after receipt. The type and filter settle before encoding.
#[derive(Debug, Clone)]
pub struct Message {
    payload: Payload,
    msg_type: MessageType,
    /// Transport metadata, e.g. the unverified `mc_sender`.
    pub headers: BTreeMap<String, String>,
    pub agent: Option<String>,
    pub collective: Option<String>,
    filter: Filter,
    pub ttl: u64,
    msgtime: i64,
    requestid: Option<String>,
    expected_msgid: Option<String>,
    reply_to: Option<String>,
    discovered_hosts: Vec<String>,
    validated: bool,
    base64: bool,
    request: Option<RequestContext>,
    addressing: Addressing,
}

impl Message {
    /// Creates a message around an unencoded body.
    pub fn new(body: Value, options: MessageOptions, config: &RuntimeConfig) -> Self {
        Self::build(Payload::Body(body), options, config)
    }

    /// Creates a message around bytes received from the bus, decoding
    /// base64 first when `options.base64` is set.
    pub fn from_wire(bytes: Vec<u8>, options: MessageOptions, config: &RuntimeConfig) -> Result<Self, MessageError> {
        let mut message = Self::build(Payload::Wire(bytes), options, config);
        message.base64_decode()?;
        Ok(message)
    }

    /// Creates the reply to a decoded request. The reply inherits the
    /// request's agent and collective.
    pub fn reply_to_request(body: Value, request: &Message, config: &RuntimeConfig) -> Self {
        let options = MessageOptions {
            agent: request.agent.clone(),
            collective: request.collective.clone(),
            msg_type: MessageType::Reply,
            ..MessageOptions::default()
        };
        let mut reply = Self::build(Payload::Body(body), options, config);
        reply.request = request.decoded().map(|envelope| RequestContext {
            requestid: envelope.requestid.clone(),
            callerid: envelope.callerid.clone(),
        });
        reply
    }

    fn build(payload: Payload, options: MessageOptions, config: &RuntimeConfig) -> Self {
        Self {
            payload,
            msg_type: options.msg_type,
            headers: options.headers,
            agent: options.agent,
            collective: options.collective,
            filter: options.filter,
            ttl: options.ttl.unwrap_or(config.ttl),
            msgtime: 0,
            requestid: options.requestid,
            expected_msgid: options.expected_msgid,
            reply_to: None,
            discovered_hosts: Vec::new(),
            validated: false,
            base64: options.base64,
            request: None,
            addressing: Addressing::from_config(config),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The wire bytes, once encoded or as received.
    pub fn wire_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Wire(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The decoded envelope, once decoded.
    pub fn decoded(&self) -> Option<&Envelope> {
        match &self.payload {
            Payload::Decoded(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    pub fn msgtime(&self) -> i64 {
        self.msgtime
    }

    pub fn requestid(&self) -> Option<&str> {
        self.requestid.as_deref()
    }

    pub fn set_requestid(&mut self, requestid: &str) {
        self.requestid = Some(requestid.to_string());
    }

    pub fn expected_msgid(&self) -> Option<&str> {
        self.expected_msgid.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn discovered_hosts(&self) -> &[String] {
        &self.discovered_hosts
    }

    pub fn set_discovered_hosts(&mut self, hosts: Vec<String>) {
        self.discovered_hosts = hosts;
    }

    /// Whether [`validate`](Message::validate) succeeded.
    pub fn validated(&self) -> bool {
        self.validated
    }

    /// Changes the message type.
    ///
    /// Switching to [`MessageType::DirectRequest`] needs direct addressing
    /// enabled and a non-empty discovered host list. It resets the filter to
    /// one holding only the agent.
    pub fn set_type(&mut self, msg_type: MessageType) -> Result<(), MessageError> {
        if msg_type == MessageType::DirectRequest {
            if !self.addressing.direct_addressing {
                return Err(MessageError::DirectAddressingDisabled);
            }
            if self.discovered_hosts.is_empty() {
                return Err(MessageError::NoDiscoveredHosts);
            }
            self.filter = match &self.agent {
                Some(agent) => Filter::agent_only(agent),
                None => Filter::empty(),
            };
        }
        self.msg_type = msg_type;
        Ok(())
    }

    /// Sets a custom reply target. Only requests carry one.
    pub fn set_reply_to(&mut self, target: &str) -> Result<(), MessageError> {
        if !self.msg_type.is_request() {
            return Err(MessageError::ReplyTargetNotAllowed);
        }
        self.reply_to = Some(target.to_string());
        Ok(())
    }

    /// Records the request id a reply is expected to answer.
    pub fn set_expected_msgid(&mut self, msgid: &str) -> Result<(), MessageError> {
        if self.msg_type != MessageType::Reply {
            return Err(MessageError::NotAReply);
        }
        self.expected_msgid = Some(msgid.to_string());
        Ok(())
    }

    pub fn is_base64(&self) -> bool {
        self.base64
    }

    /// Base64-encodes wire bytes in place. Other payloads are left as is.
    pub fn base64_encode(&mut self) {
        use base64::Engine;

        if self.base64 {
            return;
        }
        if let Payload::Wire(bytes) = &mut self.payload {
            *bytes = base64::engine::general_purpose::STANDARD
                .encode(&bytes[..])
                .into_bytes();
            self.base64 = true;
        }
    }

    fn base64_decode(&mut self) -> Result<(), MessageError> {
        use base64::Engine;

        if !self.base64 {
            return Ok(());
        }
        if let Payload::Wire(bytes) = &mut self.payload {
            *bytes = base64::engine::general_purpose::STANDARD.decode(&bytes[..])?;
        }
        self.base64 = false;
        Ok(())
    }

    /// Human-readable identification used in log lines and errors.
    pub fn description(&self) -> String {
        let (callerid, senderid) = match self.decoded() {
            Some(envelope) => (envelope.callerid.as_deref(), envelope.senderid.as_str()),
            None => (None, ""),
        };
        let from = match callerid {
            Some(callerid) => format!("{}@{}", callerid, senderid),
            None => senderid.to_string(),
        };
        format!(
            "{} for agent '{}' in collective '{}' from {}",
            self.requestid.as_deref().unwrap_or_default(),
            self.agent.as_deref().unwrap_or_default(),
            self.collective.as_deref().unwrap_or_default(),
            from
        )
    }

    /// Encodes the body through the security provider.
    ///
    /// Requests get a request id if they have none. Replies are only
    /// encoded when the caller of the original request is still valid.
    pub fn encode(&mut self, security: &dyn SecurityProvider) -> Result<(), MessageError> {
        let Payload::Body(body) = &self.payload else {
            return Err(MessageError::InvalidPayload("only an unencoded body can be encoded"));
        };

        let bytes = match self.msg_type {
            MessageType::Reply => {
                let request = self.request.as_ref().ok_or(MessageError::MissingRequest)?;
                if !security.valid_callerid(request.callerid.as_deref()) {
                    return Err(MessageError::InvalidCallerId);
                }
                let bytes = security.encode_reply(
                    self.agent.as_deref(),
                    body,
                    &request.requestid,
                    request.callerid.as_deref(),
                )?;
                self.requestid = Some(request.requestid.clone());
                bytes
            }
            MessageType::Request | MessageType::DirectRequest => {
                let requestid = self.requestid.get_or_insert_with(create_reqid).clone();
                security.encode_request(RequestParts {
                    identity: &self.addressing.identity,
                    body,
                    requestid: &requestid,
                    filter: &self.filter,
                    agent: self.agent.as_deref(),
                    collective: self.collective.as_deref(),
                    ttl: self.ttl,
                })?
            }
            other => return Err(MessageError::CannotEncode(other)),
        };

        self.payload = Payload::Wire(bytes);
        Ok(())
    }

    /// Decodes received bytes through the security provider.
    ///
    /// A request that fails to decode is an error. A reply that fails to
    /// decode is logged and left undecoded so collection of other replies
    /// can go on.
    pub fn decode(&mut self, security: &dyn SecurityProvider) -> Result<(), MessageError> {
        if !matches!(self.msg_type, MessageType::Request | MessageType::Reply) {
            return Err(MessageError::CannotDecode(self.msg_type));
        }
        if self.wire_bytes().is_none() {
            return Err(MessageError::InvalidPayload("only wire bytes can be decoded"));
        }

        let envelope = match security.decode_msg(self) {
            Ok(envelope) => envelope,
            Err(e) if self.msg_type == MessageType::Reply => {
                // mc_sender is unverified, the verified identity is in the payload.
                tracing::warn!(
                    sender = %self.headers.get("mc_sender").map(String::as_str).unwrap_or_default(),
                    error = %e,
                    "failed to decode a reply"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if self.msg_type == MessageType::Request && !security.valid_callerid(envelope.callerid.as_deref()) {
            return Err(MessageError::InvalidCallerId);
        }

        if let Some(collective) = &envelope.collective {
            self.collective = Some(collective.clone());
        }
        if let Some(agent) = &envelope.agent {
            self.agent = Some(agent.clone());
        }
        if let Some(filter) = &envelope.filter {
            self.filter = filter.clone();
        }
        if let Some(ttl) = envelope.ttl {
            self.ttl = ttl;
        }
        self.requestid = Some(envelope.requestid.clone());
        self.msgtime = envelope.msgtime;
        self.payload = Payload::Decoded(envelope);
        Ok(())
    }

    /// Checks a decoded request's TTL and filter. `now` is the current Unix
    /// time in seconds.
    pub fn validate(&mut self, security: &dyn SecurityProvider, now: i64) -> Result<(), MessageError> {
        if self.msg_type != MessageType::Request {
            return Err(MessageError::NotARequest);
        }

        // msgtime comes off the wire; a bogus value must not wrap into a
        // small age.
        let age = now.saturating_sub(self.msgtime);
        if age > i64::try_from(self.ttl).unwrap_or(i64::MAX) {
            return Err(MessageError::TtlExpired {
                description: self.description(),
                msgtime: self.msgtime,
                age,
                ttl: self.ttl,
            });
        }

        if !security.validate_filter(&self.filter) {
            return Err(MessageError::NotTargeted(self.description()));
        }

        self.validated = true;
        Ok(())
    }

    /// Hands the message to the connector.
    ///
    /// When hosts were discovered, direct addressing is enabled and the
    /// host count is within the threshold, the message is sent as a direct
    /// request instead of a broadcast.
    pub fn publish(&mut self, connector: &dyn Connector) -> Result<(), MessageError> {
        if !self.discovered_hosts.is_empty()
            && self.addressing.direct_addressing
            && self.discovered_hosts.len() <= self.addressing.threshold
        {
            self.set_type(MessageType::DirectRequest)?;
            tracing::debug!(
                requestid = %self.requestid.as_deref().unwrap_or_default(),
                hosts = self.discovered_hosts.len(),
                "handling request as a direct request"
            );
        }

        connector.publish(self)
    }
}

/// Creates a request id: 32 lowercase hex characters.
pub fn create_reqid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
