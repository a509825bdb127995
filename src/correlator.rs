//! Correlated application requests.
//!
//! Application protocols layered on heartbeat send one request to a set of nodes and
//! collect the answers. Nodes come and go, answers get lost or duplicated, so collection
//! is bounded by a deadline and the result says exactly who answered, who did not, and
//! what arrived that nobody asked for.
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//!
//! use hbapi::{Config, FifoConnector, Session, correlator::{self, Request}};
//!
//! let config = Config::default();
//! let mut session = Session::signon(&mut FifoConnector, Some("svcA"), config).unwrap();
//! let ping = Request::new("ping").unwrap();
//! let timeout = Duration::from_secs(5);
//! let collected = correlator::broadcast_and_collect(&mut session, &ping, None, timeout).unwrap();
//!
//! for node in &collected.timed_out {
//!     println!("{node} did not answer");
//! }
//! ```
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    protocol::{ACTIVE_STATUS, Message, MessageError, Transport, fields, types},
    session::{Delivered, Session, SessionError, events::Correlation},
};

static NEXT_CORRELATION: AtomicU64 = AtomicU64::new(1);

/// Message types of a request/response protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKinds {
    pub request: String,
    pub response: String,
}

impl Default for RequestKinds {
    fn default() -> Self {
        Self {
            request: types::TEST_REQUEST.to_string(),
            response: types::TEST_RESPONSE.to_string(),
        }
    }
}

/// An application request carrying its own correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    message: Message,
    kinds: RequestKinds,
    subtype: String,
    id: String,
}

impl Request {
    /// A request of the default test protocol.
    pub fn new(subtype: &str) -> Result<Self, MessageError> {
        Self::with_kinds(RequestKinds::default(), subtype)
    }

    pub fn with_kinds(kinds: RequestKinds, subtype: &str) -> Result<Self, MessageError> {
        let id = format!(
            "{}-{}",
            std::process::id(),
            NEXT_CORRELATION.fetch_add(1, Ordering::Relaxed)
        );
        let message = Message::from_fields([
            (fields::TYPE, kinds.request.as_str()),
            (fields::API_REQUEST, subtype),
            (fields::CORRELATION_ID, id.as_str()),
        ])?;
        Ok(Self {
            message,
            kinds,
            subtype: subtype.to_string(),
            id,
        })
    }

    /// Adds a payload field to the request.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), MessageError> {
        if [fields::TYPE, fields::API_REQUEST, fields::CORRELATION_ID].contains(&name) {
            return Err(MessageError::Value(format!(
                "field '{name}' is managed by the request"
            )));
        }
        self.message.set(name, value)
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kinds(&self) -> &RequestKinds {
        &self.kinds
    }

    fn correlation(&self) -> Correlation {
        Correlation {
            kind: self.kinds.response.clone(),
            subtype: self.subtype.clone(),
            id: self.id.clone(),
        }
    }
}

/// Builds the reply to `request`: same fields, response type, addressed back to the
/// sender, with `result` added.
pub fn reply_to(
    request: &Message,
    kinds: &RequestKinds,
    result: &str,
) -> Result<Message, MessageError> {
    if request.kind() != Some(kinds.request.as_str()) {
        return Err(MessageError::Value(format!(
            "cannot reply to a '{}' message as '{}'",
            request.kind().unwrap_or_default(),
            kinds.response
        )));
    }

    let mut reply = request.clone();
    reply.set(fields::TYPE, kinds.response.as_str())?;
    reply.remove(fields::DESTINATION);
    reply.remove(fields::TO_ID);
    if let Some(origin) = request.origin() {
        reply.set(fields::DESTINATION, origin)?;
    }
    if let Some(from) = request.get(fields::FROM_ID) {
        reply.set(fields::TO_ID, from)?;
    }
    reply.set(fields::API_RESULT, result)?;
    Ok(reply)
}

/// Collection state of one outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    id: String,
    waiting: BTreeSet<String>,
    deadline: Instant,
    replies: BTreeMap<String, Message>,
    extras: Vec<Message>,
    extras_dropped: usize,
    max_extras: usize,
}

impl PendingRequest {
    pub fn new(
        id: &str,
        participants: impl IntoIterator<Item = String>,
        timeout: Duration,
        max_extras: usize,
    ) -> Self {
        Self {
            id: id.to_string(),
            waiting: participants.into_iter().collect(),
            deadline: Instant::now() + timeout,
            replies: BTreeMap::new(),
            extras: Vec::new(),
            extras_dropped: 0,
            max_extras,
        }
    }

    /// Accounts for one correlated reply.
    pub fn record(&mut self, reply: Message) {
        let sender = reply.origin().unwrap_or_default().to_string();
        if self.waiting.remove(&sender) {
            self.replies.insert(sender, reply);
        } else if self.extras.len() < self.max_extras {
            debug!("request {}: unexpected reply from '{sender}'", self.id);
            self.extras.push(reply);
        } else {
            self.extras_dropped += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn resolve(self) -> Collected {
        Collected {
            replies: self.replies,
            timed_out: self.waiting,
            extras: self.extras,
            extras_dropped: self.extras_dropped,
        }
    }
}

/// Outcome of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    /// On-time replies keyed by the answering node.
    pub replies: BTreeMap<String, Message>,
    /// Participants that had not answered at the deadline.
    pub timed_out: BTreeSet<String>,
    /// Duplicates and replies from nodes that were not asked.
    pub extras: Vec<Message>,
    /// Extras discarded once the cap was reached.
    pub extras_dropped: usize,
}

impl Collected {
    pub fn is_complete(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Sends `request` to the whole cluster and collects replies until every participant
/// answered or `timeout` elapsed.
///
/// Without explicit participants the currently active nodes are asked, as listed once
/// before sending.
pub fn broadcast_and_collect<T: Transport>(
    session: &mut Session<T>,
    request: &Request,
    participants: Option<Vec<String>>,
    timeout: Duration,
) -> Result<Collected, SessionError> {
    let participants = match participants {
        Some(participants) => participants,
        None => session.nodes_with_status(Some(ACTIVE_STATUS))?,
    };

    session.send_cluster(request.message())?;
    info!(
        "request {} '{}' sent to cluster, expecting {} replies",
        request.id(),
        request.subtype(),
        participants.len()
    );

    let pending = PendingRequest::new(
        request.id(),
        participants,
        timeout,
        session.config().max_extras,
    );
    collect(session, request, pending)
}

/// Sends `request` to one node and waits for its reply.
pub fn unicast_and_wait<T: Transport>(
    session: &mut Session<T>,
    request: &Request,
    node: &str,
    timeout: Duration,
) -> Result<Collected, SessionError> {
    if session.node_status(node)?.as_deref() != Some(ACTIVE_STATUS) {
        warn!("sending request {} to inactive node '{node}'", request.id());
    }

    session.send_node(request.message(), node)?;
    let pending = PendingRequest::new(
        request.id(),
        [node.to_string()],
        timeout,
        session.config().max_extras,
    );
    collect(session, request, pending)
}

fn collect<T: Transport>(
    session: &mut Session<T>,
    request: &Request,
    mut pending: PendingRequest,
) -> Result<Collected, SessionError> {
    session.events.begin_collection(request.correlation());

    let outcome = loop {
        if pending.is_complete() {
            break Ok(());
        }
        let remaining = pending.remaining();
        if remaining.is_zero() {
            break Ok(());
        }

        match session.next_event(Some(remaining)) {
            Ok(Some(Delivered::Reply(reply))) => pending.record(reply),
            Ok(Some(Delivered::Plain(msg))) => session.events.defer(msg),
            Ok(Some(Delivered::Consumed)) | Ok(None) => {}
            Err(e) => break Err(e),
        }
    };

    session.events.end_collection();
    outcome?;

    let collected = pending.resolve();
    if !collected.is_complete() {
        info!(
            "request {}: no reply from {:?}",
            request.id(),
            collected.timed_out
        );
    }
    if collected.extras_dropped > 0 {
        warn!(
            "request {}: dropped {} extra replies",
            request.id(),
            collected.extras_dropped
        );
    }
    Ok(collected)
}
