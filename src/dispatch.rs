//! Request routing for long-lived responders.
//!
//! A [`DispatchTable`] maps the `reqtype` of incoming application requests to handlers.
//! Requests nobody handles go to the bad-request handler when one is registered under
//! [`ApiResult::BADREQ`]; otherwise they are logged and dropped so the responder keeps
//! serving requests it does understand.
use std::collections::HashMap;

use log::{debug, warn};

use crate::{
    correlator::{RequestKinds, reply_to},
    protocol::{ApiResult, Message, fields},
    session::{MessageCallback, Outbox, SessionError},
};

pub type Handler = Box<dyn FnMut(&Message, &mut dyn Outbox) -> Result<(), SessionError>>;

/// How a request was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Handled,
    BadRequest,
    Dropped,
}

#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `subtype`, returning the handler it replaces.
    pub fn insert<F>(&mut self, subtype: &str, handler: F) -> Option<Handler>
    where
        F: FnMut(&Message, &mut dyn Outbox) -> Result<(), SessionError> + 'static,
    {
        self.handlers.insert(subtype.to_string(), Box::new(handler))
    }

    pub fn set_bad_request<F>(&mut self, handler: F) -> Option<Handler>
    where
        F: FnMut(&Message, &mut dyn Outbox) -> Result<(), SessionError> + 'static,
    {
        self.insert(ApiResult::BADREQ, handler)
    }

    pub fn remove(&mut self, subtype: &str) -> Option<Handler> {
        self.handlers.remove(subtype)
    }

    pub fn contains(&self, subtype: &str) -> bool {
        self.handlers.contains_key(subtype)
    }

    pub fn handle(&mut self, msg: &Message, outbox: &mut dyn Outbox) -> Routing {
        let subtype = msg.subtype().unwrap_or_default();

        let (routing, key) = if self.handlers.contains_key(subtype) {
            (Routing::Handled, subtype)
        } else if self.handlers.contains_key(ApiResult::BADREQ) {
            (Routing::BadRequest, ApiResult::BADREQ)
        } else {
            warn!(
                "no handler for request type '{subtype}' from {:?}",
                msg.origin()
            );
            return Routing::Dropped;
        };

        debug!("routing '{subtype}' request as {routing:?}");
        if let Some(handler) = self.handlers.get_mut(key) {
            if let Err(e) = handler(msg, outbox) {
                warn!("handler for '{key}' failed: {e}");
            }
        }
        routing
    }

    /// Turns the table into a message callback for [`Session::set_msg_callback`].
    ///
    /// [`Session::set_msg_callback`]: crate::session::Session::set_msg_callback
    pub fn into_callback(mut self) -> MessageCallback {
        Box::new(move |msg: &Message, outbox: &mut dyn Outbox| {
            self.handle(msg, outbox);
            Ok(())
        })
    }
}

/// Answers `request` with `result` and an optional comment, addressed to its sender.
pub fn respond(
    outbox: &mut dyn Outbox,
    request: &Message,
    kinds: &RequestKinds,
    result: &str,
    comment: Option<&str>,
) -> Result<(), SessionError> {
    let mut reply = reply_to(request, kinds, result)?;
    if let Some(comment) = comment {
        reply.set(fields::COMMENT, comment)?;
    }
    match reply.destination().map(str::to_string) {
        Some(node) => outbox.send_node(&reply, &node),
        None => outbox.send_cluster(&reply),
    }
}
