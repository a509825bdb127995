//! Inbound message dispatch.
//!
//! Every message read from the reply queue is classified into exactly one [`EventKind`],
//! checked in this order:
//!
//! 1. [`EventKind::Reply`]: answers an outstanding correlated request; handed back to the
//!    waiter, never to callbacks.
//! 2. [`EventKind::NodeStatus`]: node status broadcast, if a node-status callback is set.
//! 3. [`EventKind::InterfaceStatus`]: interface status broadcast, if an interface-status
//!    callback is set.
//! 4. [`EventKind::Typed`]: a callback is registered for the message type.
//! 5. [`EventKind::Unmatched`]: returned to the reader as a plain message.
use std::collections::{HashMap, VecDeque};

use log::{trace, warn};

use crate::protocol::{Message, fields, types};

use super::{Outbox, SessionError};

/// Called for messages of a registered type.
pub type MessageCallback = Box<dyn FnMut(&Message, &mut dyn Outbox) -> Result<(), SessionError>>;
/// Called with `(node, status)`.
pub type NodeStatusCallback = Box<dyn FnMut(&str, &str)>;
/// Called with `(node, interface, status)`.
pub type IfStatusCallback = Box<dyn FnMut(&str, &str, &str)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Reply,
    NodeStatus,
    InterfaceStatus,
    Typed(String),
    Unmatched,
}

/// What became of one inbound message.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivered {
    Reply(Message),
    Plain(Message),
    /// A callback took the message.
    Consumed,
}

/// Identifies replies to the application request currently being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Correlation {
    pub(crate) kind: String,
    pub(crate) subtype: String,
    pub(crate) id: String,
}

impl Correlation {
    fn matches(&self, msg: &Message) -> bool {
        msg.kind() == Some(self.kind.as_str())
            && msg.subtype() == Some(self.subtype.as_str())
            && msg.get(fields::CORRELATION_ID) == Some(self.id.as_str())
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    queued: VecDeque<Message>,
    deferred: Vec<Message>,
    callbacks: HashMap<String, MessageCallback>,
    node_callback: Option<NodeStatusCallback>,
    if_callback: Option<IfStatusCallback>,
    awaiting: Option<Correlation>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, msg: &Message) -> EventKind {
        if self.awaiting.as_ref().is_some_and(|c| c.matches(msg)) {
            return EventKind::Reply;
        }

        let kind = msg.kind().unwrap_or_default();
        if self.node_callback.is_some()
            && (kind == types::NODE_STATUS || kind == types::NODE_STATUS_NOSEQ)
        {
            return EventKind::NodeStatus;
        }
        if self.if_callback.is_some() && kind == types::INTERFACE_STATUS {
            return EventKind::InterfaceStatus;
        }
        if self.callbacks.contains_key(kind) {
            return EventKind::Typed(kind.to_string());
        }
        EventKind::Unmatched
    }

    /// Routes one message; at most one callback runs.
    pub fn deliver(&mut self, msg: Message, outbox: &mut dyn Outbox) -> Delivered {
        match self.classify(&msg) {
            EventKind::Reply => Delivered::Reply(msg),
            EventKind::NodeStatus => {
                if let Some(callback) = self.node_callback.as_mut() {
                    callback(
                        msg.origin().unwrap_or_default(),
                        msg.status().unwrap_or_default(),
                    );
                }
                Delivered::Consumed
            }
            EventKind::InterfaceStatus => {
                if let Some(callback) = self.if_callback.as_mut() {
                    callback(
                        msg.origin().unwrap_or_default(),
                        msg.get(fields::INTERFACE).unwrap_or_default(),
                        msg.status().unwrap_or_default(),
                    );
                }
                Delivered::Consumed
            }
            EventKind::Typed(kind) => {
                if let Some(callback) = self.callbacks.get_mut(&kind) {
                    if let Err(e) = callback(&msg, outbox) {
                        warn!("callback for '{kind}' failed: {e}");
                    }
                }
                Delivered::Consumed
            }
            EventKind::Unmatched => Delivered::Plain(msg),
        }
    }

    /// Queues a message read while a control request was waiting.
    pub(crate) fn queue(&mut self, msg: Message) {
        self.queued.push_back(msg);
    }

    pub(crate) fn pop_queued(&mut self) -> Option<Message> {
        self.queued.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Holds back a plain message read during a collection until it finishes.
    pub(crate) fn defer(&mut self, msg: Message) {
        trace!("deferring {:?} until collection ends", msg.kind());
        self.deferred.push(msg);
    }

    pub(crate) fn begin_collection(&mut self, correlation: Correlation) {
        self.awaiting = Some(correlation);
    }

    /// Stops matching replies and makes deferred messages readable again.
    pub(crate) fn end_collection(&mut self) {
        self.awaiting = None;
        self.queued.extend(self.deferred.drain(..));
    }

    pub fn set_msg_callback(
        &mut self,
        kind: &str,
        callback: Option<MessageCallback>,
    ) -> Option<MessageCallback> {
        match callback {
            Some(callback) => self.callbacks.insert(kind.to_string(), callback),
            None => self.callbacks.remove(kind),
        }
    }

    pub fn set_node_status_callback(
        &mut self,
        callback: Option<NodeStatusCallback>,
    ) -> Option<NodeStatusCallback> {
        std::mem::replace(&mut self.node_callback, callback)
    }

    pub fn set_if_status_callback(
        &mut self,
        callback: Option<IfStatusCallback>,
    ) -> Option<IfStatusCallback> {
        std::mem::replace(&mut self.if_callback, callback)
    }
}
