use fleetrpc_message::{
    Connector, Message, MessageError, MessageOptions, MessageType, RequestParts, SecurityProvider,
};
use fleetrpc_types::{Envelope, Filter, FilterKind, RuntimeConfig};
use serde_json::{json, Value};
use std::sync::Mutex;

const NOW: i64 = 1_700_000_000;

/// Security provider that serialises envelopes as plain JSON.
struct JsonSecurity {
    callerid: Option<String>,
    identity: String,
}

impl JsonSecurity {
    fn new() -> Self {
        Self {
            callerid: Some("cert=alice".to_string()),
            identity: "node1".to_string(),
        }
    }
}

impl SecurityProvider for JsonSecurity {
    fn encode_request(&self, parts: RequestParts<'_>) -> Result<Vec<u8>, MessageError> {
        let envelope = Envelope {
            msgtime: NOW,
            senderid: parts.identity.to_string(),
            requestid: parts.requestid.to_string(),
            callerid: self.callerid.clone(),
            body: parts.body.clone(),
            filter: Some(parts.filter.clone()),
            collective: parts.collective.map(str::to_string),
            agent: parts.agent.map(str::to_string),
            ttl: Some(parts.ttl),
        };
        serde_json::to_vec(&envelope).map_err(|e| MessageError::Security(e.to_string()))
    }

    fn encode_reply(
        &self,
        agent: Option<&str>,
        body: &Value,
        requestid: &str,
        callerid: Option<&str>,
    ) -> Result<Vec<u8>, MessageError> {
        let envelope = Envelope {
            msgtime: NOW,
            senderid: self.identity.clone(),
            requestid: requestid.to_string(),
            callerid: callerid.map(str::to_string),
            body: body.clone(),
            filter: None,
            collective: None,
            agent: agent.map(str::to_string),
            ttl: None,
        };
        serde_json::to_vec(&envelope).map_err(|e| MessageError::Security(e.to_string()))
    }

    fn decode_msg(&self, message: &Message) -> Result<Envelope, MessageError> {
        let bytes = message
            .wire_bytes()
            .ok_or_else(|| MessageError::Security("no wire bytes".to_string()))?;
        serde_json::from_slice(bytes).map_err(|e| MessageError::Security(e.to_string()))
    }

    fn valid_callerid(&self, callerid: Option<&str>) -> bool {
        callerid.is_some_and(|c| c.starts_with("cert="))
    }

    fn validate_filter(&self, filter: &Filter) -> bool {
        let identities = filter.terms(FilterKind::Identity);
        identities.is_empty() || identities.iter().any(|i| *i == self.identity)
    }
}

#[derive(Default)]
struct RecordingConnector {
    published: Mutex<Vec<(MessageType, Vec<u8>)>>,
}

impl Connector for RecordingConnector {
    fn publish(&self, message: &Message) -> Result<(), MessageError> {
        let bytes = message.wire_bytes().unwrap_or_default().to_vec();
        self.published
            .lock()
            .expect("connector lock poisoned")
            .push((message.msg_type(), bytes));
        Ok(())
    }
}

fn make_test_request(config: &RuntimeConfig, filter: Filter) -> Message {
    let options = MessageOptions {
        agent: Some("rpcutil".to_string()),
        collective: Some("fleetrpc".to_string()),
        msg_type: MessageType::Request,
        filter,
        ..MessageOptions::default()
    };
    Message::new(
        json!({"action": "ping", "agent": "rpcutil", "data": {}}),
        options,
        config,
    )
}

fn receive(bytes: Vec<u8>, msg_type: MessageType, config: &RuntimeConfig) -> Message {
    let options = MessageOptions {
        msg_type,
        ..MessageOptions::default()
    };
    Message::from_wire(bytes, options, config).expect("failed to build received message")
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

#[test]
fn request_round_trip_copies_envelope_fields() {
    let config = RuntimeConfig::default();
    let security = JsonSecurity::new();

    let mut request = make_test_request(&config, Filter::empty());
    request.encode(&security).expect("failed to encode request");
    let requestid = request.requestid().expect("request id not created").to_string();
    assert_eq!(requestid.len(), 32);

    let mut received = receive(request.wire_bytes().unwrap_or_default().to_vec(), MessageType::Request, &config);
    received.decode(&security).expect("failed to decode request");

    assert_eq!(received.requestid(), Some(requestid.as_str()));
    assert_eq!(received.agent.as_deref(), Some("rpcutil"));
    assert_eq!(received.collective.as_deref(), Some("fleetrpc"));
    assert_eq!(received.msgtime(), NOW);
    assert_eq!(received.ttl, 60);
    assert_eq!(
        received.description(),
        format!("{} for agent 'rpcutil' in collective 'fleetrpc' from cert=alice@localhost", requestid)
    );
}

#[test]
fn plain_messages_cannot_be_encoded() {
    let config = RuntimeConfig::default();
    let mut message = Message::new(json!({}), MessageOptions::default(), &config);
    let err = message.encode(&JsonSecurity::new()).expect_err("plain message encoded");
    assert_eq!(err.to_string(), "Cannot encode message messages");
}

#[test]
fn request_decode_failure_propagates() {
    let config = RuntimeConfig::default();
    let mut received = receive(b"not json".to_vec(), MessageType::Request, &config);
    let err = received.decode(&JsonSecurity::new()).expect_err("garbage decoded");
    assert!(matches!(err, MessageError::Security(_)));
}

#[test]
fn reply_decode_failure_is_swallowed() {
    let config = RuntimeConfig::default();
    let mut received = receive(b"not json".to_vec(), MessageType::Reply, &config);
    received
        .headers
        .insert("mc_sender".to_string(), "node9".to_string());
    received.decode(&JsonSecurity::new()).expect("reply decode failure must not propagate");
    assert!(received.decoded().is_none());
}

#[test]
fn decoded_request_with_forged_caller_is_rejected() {
    let config = RuntimeConfig::default();
    let forger = JsonSecurity {
        callerid: Some("forged".to_string()),
        identity: "node1".to_string(),
    };
    let mut request = make_test_request(&config, Filter::empty());
    request.encode(&forger).expect("failed to encode request");

    let mut received = receive(request.wire_bytes().unwrap_or_default().to_vec(), MessageType::Request, &config);
    let err = received.decode(&JsonSecurity::new()).expect_err("forged caller accepted");
    assert!(matches!(err, MessageError::InvalidCallerId));
}

#[test]
fn reply_encodes_with_original_request_id() {
    let config = RuntimeConfig::default();
    let security = JsonSecurity::new();

    let mut request = make_test_request(&config, Filter::empty());
    request.set_requestid("55f8abe1442328321667877a08bdc586");
    request.encode(&security).expect("failed to encode request");
    let mut received = receive(request.wire_bytes().unwrap_or_default().to_vec(), MessageType::Request, &config);
    received.decode(&security).expect("failed to decode request");

    let mut reply = Message::reply_to_request(json!({"statuscode": 0, "statusmsg": "OK", "data": {}}), &received, &config);
    reply.encode(&security).expect("failed to encode reply");
    assert_eq!(reply.requestid(), Some("55f8abe1442328321667877a08bdc586"));

    let mut collected = receive(reply.wire_bytes().unwrap_or_default().to_vec(), MessageType::Reply, &config);
    collected.decode(&security).expect("failed to decode reply");
    let envelope = collected.decoded().expect("reply not decoded");
    assert_eq!(envelope.body["statusmsg"], "OK");
    assert_eq!(envelope.callerid.as_deref(), Some("cert=alice"));
}

#[test]
fn reply_without_request_cannot_be_encoded() {
    let config = RuntimeConfig::default();
    let undecoded = make_test_request(&config, Filter::empty());
    let mut reply = Message::reply_to_request(json!({}), &undecoded, &config);
    let err = reply.encode(&JsonSecurity::new()).expect_err("orphan reply encoded");
    assert!(matches!(err, MessageError::MissingRequest));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn decoded_request(config: &RuntimeConfig, filter: Filter, ttl: u64) -> Message {
    let security = JsonSecurity::new();
    let mut request = make_test_request(config, filter);
    request.ttl = ttl;
    request.encode(&security).expect("failed to encode request");
    let mut received = receive(request.wire_bytes().unwrap_or_default().to_vec(), MessageType::Request, config);
    received.decode(&security).expect("failed to decode request");
    received
}

#[test]
fn ttl_boundary_passes() {
    let config = RuntimeConfig::default();
    let mut message = decoded_request(&config, Filter::empty(), 60);
    message
        .validate(&JsonSecurity::new(), NOW + 60)
        .expect("message at the TTL boundary rejected");
    assert!(message.validated());
}

#[test]
fn ttl_expired_is_a_silent_drop() {
    let config = RuntimeConfig::default();
    let mut message = decoded_request(&config, Filter::empty(), 60);
    let err = message
        .validate(&JsonSecurity::new(), NOW + 61)
        .expect_err("expired message accepted");
    assert!(err.is_silent_drop());
    assert!(matches!(err, MessageError::TtlExpired { age: 61, ttl: 60, .. }));
    assert!(!message.validated());
}

#[test]
fn garbage_msgtime_is_expired() {
    let config = RuntimeConfig::default();
    let security = JsonSecurity::new();
    let envelope = Envelope {
        msgtime: i64::MIN,
        senderid: "node2".to_string(),
        requestid: "55f8abe1442328321667877a08bdc586".to_string(),
        callerid: Some("cert=alice".to_string()),
        body: json!({"action": "ping", "agent": "rpcutil", "data": {}}),
        filter: Some(Filter::empty()),
        collective: Some("fleetrpc".to_string()),
        agent: Some("rpcutil".to_string()),
        ttl: Some(60),
    };
    let bytes = serde_json::to_vec(&envelope).expect("failed to serialise envelope");
    let mut message = receive(bytes, MessageType::Request, &config);
    message.decode(&security).expect("failed to decode request");

    let err = message
        .validate(&security, NOW)
        .expect_err("message with garbage msgtime accepted");
    assert!(err.is_silent_drop());
    assert!(matches!(err, MessageError::TtlExpired { age: i64::MAX, ttl: 60, .. }));
    assert!(!message.validated());
}

#[test]
fn filter_mismatch_is_a_silent_drop() {
    let config = RuntimeConfig::default();
    let filter = Filter::empty().with(FilterKind::Identity, "node2");
    let mut message = decoded_request(&config, filter, 60);
    let err = message
        .validate(&JsonSecurity::new(), NOW)
        .expect_err("untargeted message accepted");
    assert!(matches!(err, MessageError::NotTargeted(_)));
    assert!(err.is_silent_drop());
}

#[test]
fn only_requests_validate() {
    let config = RuntimeConfig::default();
    let mut reply = receive(b"{}".to_vec(), MessageType::Reply, &config);
    assert!(matches!(
        reply.validate(&JsonSecurity::new(), NOW),
        Err(MessageError::NotARequest)
    ));
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

fn hosts(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("node{}", i)).collect()
}

#[test]
fn publish_within_threshold_switches_to_direct() {
    let config = RuntimeConfig::default();
    let connector = RecordingConnector::default();
    let mut request = make_test_request(&config, Filter::empty().with(FilterKind::Fact, "country=uk"));
    request.set_discovered_hosts(hosts(10));
    request.publish(&connector).expect("publish failed");

    assert_eq!(request.msg_type(), MessageType::DirectRequest);
    assert_eq!(request.filter(), &Filter::agent_only("rpcutil"));
    let published = connector.published.lock().expect("connector lock poisoned");
    assert_eq!(published[0].0, MessageType::DirectRequest);
}

#[test]
fn publish_over_threshold_broadcasts() {
    let config = RuntimeConfig::default();
    let connector = RecordingConnector::default();
    let mut request = make_test_request(&config, Filter::empty());
    request.set_discovered_hosts(hosts(11));
    request.publish(&connector).expect("publish failed");
    assert_eq!(request.msg_type(), MessageType::Request);
}

#[test]
fn publish_without_hosts_broadcasts() {
    let config = RuntimeConfig::default();
    let connector = RecordingConnector::default();
    let mut request = make_test_request(&config, Filter::empty());
    request.publish(&connector).expect("publish failed");
    assert_eq!(request.msg_type(), MessageType::Request);
}

#[test]
fn publish_without_direct_addressing_broadcasts() {
    let config = RuntimeConfig {
        direct_addressing: false,
        ..RuntimeConfig::default()
    };
    let connector = RecordingConnector::default();
    let mut request = make_test_request(&config, Filter::empty());
    request.set_discovered_hosts(hosts(2));
    request.publish(&connector).expect("publish failed");
    assert_eq!(request.msg_type(), MessageType::Request);
}
