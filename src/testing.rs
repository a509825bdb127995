//! In-memory daemon and transport for unit tests.
use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

use crate::{
    config::Config,
    protocol::{ApiResult, Connector, Message, Transport, TransportError, fields, types},
    session::{Identity, Outbox, SessionError},
};

pub(crate) type SharedDaemon = Rc<RefCell<FakeDaemon>>;
pub(crate) type ClusterHook = Box<dyn FnMut(&Message) -> Vec<Message>>;

/// Answers API requests from a scripted cluster view.
pub(crate) struct FakeDaemon {
    pub(crate) signon_result: &'static str,
    /// Never answers anything.
    pub(crate) silent: bool,
    pub(crate) attached: bool,
    pub(crate) closed: bool,
    pub(crate) registered: Vec<Message>,
    pub(crate) sent: Vec<Message>,
    inbound: VecDeque<Message>,
    nodes: Vec<(String, String, Vec<(String, String)>)>,
    on_cluster: Option<ClusterHook>,
}

impl FakeDaemon {
    pub(crate) fn shared() -> SharedDaemon {
        Rc::new(RefCell::new(FakeDaemon {
            signon_result: ApiResult::OK,
            silent: false,
            attached: false,
            closed: false,
            registered: Vec::new(),
            sent: Vec::new(),
            inbound: VecDeque::new(),
            nodes: Vec::new(),
            on_cluster: None,
        }))
    }

    pub(crate) fn add_node(&mut self, name: &str, status: &str, interfaces: &[(&str, &str)]) {
        let interfaces = interfaces
            .iter()
            .map(|(i, s)| (i.to_string(), s.to_string()))
            .collect();
        self.nodes
            .push((name.to_string(), status.to_string(), interfaces));
    }

    pub(crate) fn push_inbound(&mut self, msg: Message) {
        self.inbound.push_back(msg);
    }

    /// Produces inbound messages for every non-API message a client sends.
    pub(crate) fn on_cluster(&mut self, hook: ClusterHook) {
        self.on_cluster = Some(hook);
    }

    pub(crate) fn requests_of(&self, subtype: &str) -> usize {
        self.api_requests()
            .filter(|m| m.subtype() == Some(subtype))
            .count()
    }

    pub(crate) fn last_request(&self, subtype: &str) -> Option<&Message> {
        self.api_requests()
            .filter(|m| m.subtype() == Some(subtype))
            .last()
    }

    pub(crate) fn cluster_sends(&self) -> Vec<Message> {
        self.sent
            .iter()
            .filter(|m| m.kind() != Some(types::API_REQUEST))
            .cloned()
            .collect()
    }

    fn api_requests(&self) -> impl Iterator<Item = &Message> {
        self.registered
            .iter()
            .chain(self.sent.iter())
            .filter(|m| m.kind() == Some(types::API_REQUEST))
    }

    fn handle(&mut self, msg: &Message) {
        if self.silent {
            return;
        }
        if msg.kind() != Some(types::API_REQUEST) {
            let replies = match self.on_cluster.as_mut() {
                Some(hook) => hook(msg),
                None => Vec::new(),
            };
            self.inbound.extend(replies);
            return;
        }

        let subtype = msg.subtype().unwrap_or_default().to_string();
        let node = msg.get(fields::NODE).map(str::to_string);
        let found = node
            .as_deref()
            .and_then(|n| self.nodes.iter().find(|(name, _, _)| name == n))
            .cloned();

        let answers: Vec<(&str, Vec<(&str, String)>)> = match subtype.as_str() {
            "signon" => vec![(self.signon_result, vec![])],
            "signoff" => vec![],
            "setfilter" | "setsignal" => vec![(ApiResult::OK, vec![])],
            "nodelist" => self.list(
                self.nodes.iter().map(|(n, _, _)| n.clone()).collect(),
                fields::NODE,
            ),
            "iflist" => match found {
                Some((_, _, ifs)) => {
                    self.list(ifs.into_iter().map(|(i, _)| i).collect(), fields::INTERFACE)
                }
                None => vec![(ApiResult::FAILURE, vec![])],
            },
            "nodestatus" => match found {
                Some((_, st, _)) => vec![(ApiResult::OK, vec![(fields::STATUS, st)])],
                None => vec![(ApiResult::FAILURE, vec![])],
            },
            "ifstatus" => {
                let iface = msg.get(fields::INTERFACE).unwrap_or_default();
                match found.and_then(|(_, _, ifs)| ifs.into_iter().find(|(i, _)| i == iface)) {
                    Some((_, st)) => vec![(ApiResult::OK, vec![(fields::STATUS, st)])],
                    None => vec![(ApiResult::FAILURE, vec![])],
                }
            }
            _ => vec![(ApiResult::BADREQ, vec![])],
        };

        for (result, extra) in answers {
            let mut reply = Message::from_fields([
                (fields::TYPE, types::API_RESPONSE),
                (fields::API_REQUEST, subtype.as_str()),
                (fields::API_RESULT, result),
            ])
            .unwrap();
            for (name, value) in extra {
                reply.set(name, value).unwrap();
            }
            self.inbound.push_back(reply);
        }
    }

    fn list(
        &self,
        items: Vec<String>,
        field: &'static str,
    ) -> Vec<(&'static str, Vec<(&'static str, String)>)> {
        if items.is_empty() {
            return vec![(ApiResult::FAILURE, vec![])];
        }
        let last = items.len() - 1;
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let result = if i == last {
                    ApiResult::OK
                } else {
                    ApiResult::MORE
                };
                (result, vec![(field, item)])
            })
            .collect()
    }
}

pub(crate) struct MockConnector {
    daemon: SharedDaemon,
}

impl MockConnector {
    pub(crate) fn new(daemon: &SharedDaemon) -> Self {
        Self {
            daemon: Rc::clone(daemon),
        }
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(
        &mut self,
        _identity: &Identity,
        _config: &Config,
    ) -> Result<MockTransport, TransportError> {
        Ok(MockTransport {
            daemon: Rc::clone(&self.daemon),
        })
    }
}

pub(crate) struct MockTransport {
    daemon: SharedDaemon,
}

impl Transport for MockTransport {
    fn register(&mut self, msg: &Message) -> Result<(), TransportError> {
        msg.require_type()?;
        let mut daemon = self.daemon.borrow_mut();
        daemon.registered.push(msg.clone());
        daemon.handle(msg);
        Ok(())
    }

    fn attach(&mut self) -> Result<(), TransportError> {
        self.daemon.borrow_mut().attached = true;
        Ok(())
    }

    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        msg.require_type()?;
        let mut daemon = self.daemon.borrow_mut();
        daemon.sent.push(msg.clone());
        daemon.handle(msg);
        Ok(())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        if let Some(msg) = self.daemon.borrow_mut().inbound.pop_front() {
            return Ok(Some(msg));
        }
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        Ok(None)
    }

    fn ready(&mut self) -> Result<bool, TransportError> {
        Ok(!self.daemon.borrow().inbound.is_empty())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.daemon.borrow_mut().closed = true;
    }
}

/// Discards everything sent through it.
pub(crate) struct NullOutbox;

impl Outbox for NullOutbox {
    fn send_cluster(&mut self, _msg: &Message) -> Result<(), SessionError> {
        Ok(())
    }

    fn send_node(&mut self, _msg: &Message, _node: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn node_name(&self) -> &str {
        "local"
    }

    fn client_id(&self) -> &str {
        "test"
    }
}

/// Keeps every message sent through it with its destination.
#[derive(Default)]
pub(crate) struct RecordingOutbox {
    pub(crate) sent: Vec<(Message, Option<String>)>,
}

impl Outbox for RecordingOutbox {
    fn send_cluster(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.sent.push((msg.clone(), None));
        Ok(())
    }

    fn send_node(&mut self, msg: &Message, node: &str) -> Result<(), SessionError> {
        self.sent.push((msg.clone(), Some(node.to_string())));
        Ok(())
    }

    fn node_name(&self) -> &str {
        "local"
    }

    fn client_id(&self) -> &str {
        "test"
    }
}
