//! Client sessions with the heartbeat daemon.
//!
//! A [`Session`] is one signed-on API client. It owns the client's queue pair, knows
//! whether the client is casual or named, and dispatches inbound traffic to the callbacks
//! registered on it.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered -> Registering -> SignedOn -> SigningOff -> Unregistered
//! ```
//!
//! [`Session::signon`] only hands back a session once the daemon answered the SIGNON
//! request with `OK`. Dropping a session signs it off, so every exit path (early returns
//! and `?` included) tells the daemon the client is gone.
//!
//! # Send Rights
//!
//! Only named clients may originate cluster traffic. A casual client can query the daemon
//! and receive messages but any [`Outbox`] send fails with [`SessionError::NotPermitted`].
//!
//! # See Also
//!
//! - [`events`]: Inbound message classification and callbacks.
//! - [`directory`]: Node and interface queries.
pub mod directory;
pub mod events;

use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    config::Config,
    protocol::{
        ApiRequest, ApiResult, Connector, Message, MessageError, Transport, TransportError,
        fields, types,
    },
};

pub use directory::{DirectoryEntry, Snapshot};
pub use events::{
    Delivered, EventDispatcher, EventKind, IfStatusCallback, MessageCallback,
    NodeStatusCallback,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("daemon rejected the request with result '{result}'")]
    Rejected { result: String },
    #[error("session is not signed on")]
    NotSignedOn,
    #[error("casual clients may not send cluster messages")]
    NotPermitted,
    #[error("timed out waiting for the daemon")]
    Timeout,
}

impl From<MessageError> for SessionError {
    fn from(value: MessageError) -> Self {
        SessionError::Transport(TransportError::Message(value))
    }
}

/// Who the client is to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Process-lifetime client identified by its pid.
    Casual { pid: u32 },
    /// Persistent client identified by a service name.
    Named { service: String },
}

impl Identity {
    pub fn client_id(&self) -> String {
        match self {
            Identity::Casual { pid } => pid.to_string(),
            Identity::Named { service } => service.clone(),
        }
    }

    pub fn is_casual(&self) -> bool {
        matches!(self, Identity::Casual { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registering,
    SignedOn,
    SigningOff,
}

/// Outbound side of a session, handed to callbacks so they can answer requests.
pub trait Outbox {
    /// Sends a message to every node in the cluster.
    fn send_cluster(&mut self, msg: &Message) -> Result<(), SessionError>;

    /// Sends a message to a single node.
    fn send_node(&mut self, msg: &Message, node: &str) -> Result<(), SessionError>;

    fn node_name(&self) -> &str;

    fn client_id(&self) -> &str;
}

/// Identity, state and transport of a session.
pub struct Channel<T: Transport> {
    transport: T,
    identity: Identity,
    client_id: String,
    node: String,
    state: SessionState,
    config: Config,
}

impl<T: Transport> Channel<T> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Boilerplate for a control request to the local daemon.
    fn api_message(&self, request: ApiRequest) -> Result<Message, MessageError> {
        let mut msg = Message::with_type(types::API_REQUEST)?;
        msg.set(fields::API_REQUEST, request.as_str())?;
        msg.set(fields::PID, std::process::id().to_string())?;
        msg.set(fields::FROM_ID, self.client_id.as_str())?;
        Ok(msg)
    }

    fn send_control(&mut self, msg: &Message) -> Result<(), SessionError> {
        if self.state != SessionState::SignedOn {
            return Err(SessionError::NotSignedOn);
        }
        self.transport.send(msg)?;
        Ok(())
    }

    fn check_send_rights(&self) -> Result<(), SessionError> {
        if self.state != SessionState::SignedOn {
            return Err(SessionError::NotSignedOn);
        }
        if self.identity.is_casual() {
            return Err(SessionError::NotPermitted);
        }
        Ok(())
    }

    fn signoff(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::SignedOn {
            return Ok(());
        }

        self.state = SessionState::SigningOff;
        let outcome = match self.api_message(ApiRequest::Signoff) {
            Ok(msg) => self.transport.send(&msg).map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };
        self.state = SessionState::Unregistered;
        info!("client '{}' signed off", self.client_id);
        outcome
    }
}

impl<T: Transport> Outbox for Channel<T> {
    fn send_cluster(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.check_send_rights()?;
        let mut msg = msg.clone();
        msg.set(fields::ORIGIN, self.node.as_str())?;
        self.transport.send(&msg)?;
        Ok(())
    }

    fn send_node(&mut self, msg: &Message, node: &str) -> Result<(), SessionError> {
        self.check_send_rights()?;
        let mut msg = msg.clone();
        msg.set(fields::ORIGIN, self.node.as_str())?;
        msg.set(fields::DESTINATION, node)?;
        self.transport.send(&msg)?;
        Ok(())
    }

    fn node_name(&self) -> &str {
        &self.node
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl<T: Transport> Drop for Channel<T> {
    fn drop(&mut self) {
        if let Err(e) = self.signoff() {
            warn!("signoff of '{}' failed: {e}", self.client_id);
        }
    }
}

/// A signed-on heartbeat API client.
pub struct Session<T: Transport> {
    pub(crate) channel: Channel<T>,
    pub(crate) events: EventDispatcher,
}

impl<T: Transport> Session<T> {
    /// Registers with the daemon.
    ///
    /// With a service name the client is named (persistent queues, may send to the
    /// cluster); without one it is casual and identified by the process id.
    pub fn signon<C>(
        connector: &mut C,
        service: Option<&str>,
        config: Config,
    ) -> Result<Self, SessionError>
    where
        C: Connector<Transport = T>,
    {
        let identity = match service {
            Some(service) => Identity::Named {
                service: service.to_string(),
            },
            None => Identity::Casual {
                pid: std::process::id(),
            },
        };
        let node = config
            .resolve_node_name()
            .map_err(TransportError::from)?;
        let transport = connector.connect(&identity, &config)?;

        let mut session = Session {
            channel: Channel {
                transport,
                client_id: identity.client_id(),
                identity,
                node,
                state: SessionState::Registering,
                config,
            },
            events: EventDispatcher::new(),
        };

        let signon = session.channel.api_message(ApiRequest::Signon)?;
        session.channel.transport.register(&signon)?;
        debug!("sent signon for '{}'", session.channel.client_id);

        let reply = match session.await_api_reply(ApiRequest::Signon) {
            Ok(reply) => reply,
            Err(e) => {
                session.channel.state = SessionState::Unregistered;
                return Err(e);
            }
        };
        match ApiResult::parse(reply.result().unwrap_or_default()) {
            ApiResult::Ok => {
                session.channel.transport.attach()?;
                session.channel.state = SessionState::SignedOn;
                info!(
                    "client '{}' signed on at node {}",
                    session.channel.client_id, session.channel.node
                );
                Ok(session)
            }
            other => {
                session.channel.state = SessionState::Unregistered;
                warn!(
                    "signon of '{}' rejected: {}",
                    session.channel.client_id,
                    other.as_str()
                );
                Err(SessionError::Rejected {
                    result: other.as_str().to_string(),
                })
            }
        }
    }

    /// Signs off if signed on; does nothing otherwise.
    pub fn signoff(&mut self) -> Result<(), SessionError> {
        self.channel.signoff()
    }

    pub fn state(&self) -> SessionState {
        self.channel.state
    }

    pub fn identity(&self) -> &Identity {
        &self.channel.identity
    }

    pub fn client_id(&self) -> &str {
        &self.channel.client_id
    }

    pub fn node_name(&self) -> &str {
        &self.channel.node
    }

    pub fn is_casual(&self) -> bool {
        self.channel.identity.is_casual()
    }

    pub fn config(&self) -> &Config {
        &self.channel.config
    }

    pub fn outbox(&mut self) -> &mut dyn Outbox {
        &mut self.channel
    }

    pub fn send_cluster(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.channel.send_cluster(msg)
    }

    pub fn send_node(&mut self, msg: &Message, node: &str) -> Result<(), SessionError> {
        self.channel.send_node(msg, node)
    }

    /// True if a message can be read without waiting.
    pub fn msg_ready(&mut self) -> Result<bool, SessionError> {
        if self.events.has_pending() {
            return Ok(true);
        }
        Ok(self.channel.transport.ready()?)
    }

    /// Sends a control request and waits for its answer.
    pub(crate) fn control(
        &mut self,
        request: ApiRequest,
        msg: &Message,
    ) -> Result<Message, SessionError> {
        self.channel.send_control(msg)?;
        self.await_api_reply(request)
    }

    /// Waits for the daemon's answer to the outstanding `request`.
    ///
    /// API replies to any other request arrived too late for their caller and are
    /// discarded. Anything else read meanwhile is queued for
    /// [`read_next`](Session::read_next).
    pub(crate) fn await_api_reply(&mut self, request: ApiRequest) -> Result<Message, SessionError> {
        let deadline = Instant::now() + self.channel.config.default_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::Timeout);
            }

            match self.channel.transport.recv(Some(remaining))? {
                Some(msg) if msg.kind() == Some(types::API_RESPONSE) => {
                    if msg.subtype() == Some(request.as_str()) {
                        return Ok(msg);
                    }
                    debug!(
                        "discarding stale {:?} reply while awaiting {}",
                        msg.subtype(),
                        request.as_str()
                    );
                }
                Some(msg) => {
                    trace!("queueing {:?} while awaiting api reply", msg.kind());
                    self.events.queue(msg);
                }
                None => {}
            }
        }
    }

    /// Reads the next message no callback claimed.
    ///
    /// Non-blocking reads return `None` as soon as nothing is ready.
    pub fn read_next(&mut self, blocking: bool) -> Result<Option<Message>, SessionError> {
        let timeout = if blocking { None } else { Some(Duration::ZERO) };
        self.read_next_timeout(timeout)
    }

    /// Like [`read_next`](Session::read_next), waiting at most `timeout` in total.
    pub fn read_next_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, SessionError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.next_event(remaining)? {
                Some(Delivered::Plain(msg)) | Some(Delivered::Reply(msg)) => {
                    return Ok(Some(msg));
                }
                Some(Delivered::Consumed) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Reads one message, queued first, and runs it through the dispatcher.
    pub(crate) fn next_event(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<Delivered>, SessionError> {
        let msg = match self.events.pop_queued() {
            Some(msg) => msg,
            None => match self.channel.transport.recv(timeout)? {
                Some(msg) => msg,
                None => return Ok(None),
            },
        };
        Ok(Some(self.events.deliver(msg, &mut self.channel)))
    }

    pub fn set_msg_callback(
        &mut self,
        kind: &str,
        callback: Option<MessageCallback>,
    ) -> Option<MessageCallback> {
        self.events.set_msg_callback(kind, callback)
    }

    pub fn set_node_status_callback(
        &mut self,
        callback: Option<NodeStatusCallback>,
    ) -> Option<NodeStatusCallback> {
        self.events.set_node_status_callback(callback)
    }

    pub fn set_if_status_callback(
        &mut self,
        callback: Option<IfStatusCallback>,
    ) -> Option<IfStatusCallback> {
        self.events.set_if_status_callback(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDaemon, MockConnector};

    fn config() -> Config {
        Config::default()
            .with_node_name("n1")
            .with_timeout(Duration::from_millis(100))
    }

    #[test]
    fn named_signon_and_signoff() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        let mut session = Session::signon(&mut connector, Some("svcA"), config()).unwrap();

        assert_eq!(session.state(), SessionState::SignedOn);
        assert_eq!(session.client_id(), "svcA");
        assert!(!session.is_casual());
        assert!(daemon.borrow().attached);

        session.signoff().unwrap();
        assert_eq!(session.state(), SessionState::Unregistered);
        // Idempotent.
        session.signoff().unwrap();
        assert_eq!(daemon.borrow().requests_of("signoff"), 1);
    }

    #[test]
    fn casual_signon_uses_pid() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        let session = Session::signon(&mut connector, None, config()).unwrap();

        assert!(session.is_casual());
        assert_eq!(session.client_id(), std::process::id().to_string());
        let signon = daemon.borrow().registered[0].clone();
        assert_eq!(signon.get(fields::API_REQUEST), Some("signon"));
        assert_eq!(signon.get(fields::FROM_ID), Some(session.client_id()));
    }

    #[test]
    fn rejected_signon_releases_queues() {
        let daemon = FakeDaemon::shared();
        daemon.borrow_mut().signon_result = ApiResult::FAILURE;
        let mut connector = MockConnector::new(&daemon);

        let err = Session::signon(&mut connector, Some("svcA"), config())
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Rejected { ref result } if result == "fail"));
        assert!(daemon.borrow().closed);
        assert!(!daemon.borrow().attached);
        assert_eq!(daemon.borrow().requests_of("signoff"), 0);
    }

    #[test]
    fn signon_times_out_without_daemon() {
        let daemon = FakeDaemon::shared();
        daemon.borrow_mut().silent = true;
        let mut connector = MockConnector::new(&daemon);

        let err = Session::signon(&mut connector, None, config()).err().unwrap();
        assert!(matches!(err, SessionError::Timeout));
    }

    #[test]
    fn drop_signs_off() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        {
            let _session = Session::signon(&mut connector, Some("svcA"), config()).unwrap();
        }

        assert_eq!(daemon.borrow().requests_of("signoff"), 1);
        assert!(daemon.borrow().closed);
    }

    #[test]
    fn casual_client_cannot_send() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        let mut session = Session::signon(&mut connector, None, config()).unwrap();
        let msg = Message::with_type("hello").unwrap();

        assert!(matches!(
            session.send_cluster(&msg),
            Err(SessionError::NotPermitted)
        ));
        assert!(matches!(
            session.send_node(&msg, "n2"),
            Err(SessionError::NotPermitted)
        ));
        assert!(daemon.borrow().cluster_sends().is_empty());
    }

    #[test]
    fn named_client_stamps_origin() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        let mut session = Session::signon(&mut connector, Some("svcA"), config()).unwrap();
        let msg = Message::with_type("hello").unwrap();

        session.send_cluster(&msg).unwrap();
        session.send_node(&msg, "n2").unwrap();

        let sent = daemon.borrow().cluster_sends();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].origin(), Some("n1"));
        assert_eq!(sent[0].destination(), None);
        assert_eq!(sent[1].destination(), Some("n2"));
    }

    #[test]
    fn send_after_signoff_fails() {
        let daemon = FakeDaemon::shared();
        let mut connector = MockConnector::new(&daemon);
        let mut session = Session::signon(&mut connector, Some("svcA"), config()).unwrap();
        session.signoff().unwrap();

        let msg = Message::with_type("hello").unwrap();
        assert!(matches!(
            session.send_cluster(&msg),
            Err(SessionError::NotSignedOn)
        ));
    }
}
