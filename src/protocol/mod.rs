//! Heartbeat API wire protocol.
//!
//! This module defines the messages exchanged between an API client and the heartbeat
//! membership daemon, the constants that give those messages meaning, and the transport
//! abstraction used to move them over the per-client queue pair.
//!
//! # Overview
//!
//! Every heartbeat message is a flat set of name/value string pairs. The same message type
//! carries control traffic between a client and its local daemon (signon, node queries)
//! and application traffic between clients on different cluster nodes.
//!
//! # Key Components
//!
//! - [`Message`]: A validated name/value record with a canonical text encoding.
//! - [`Transport`]: Abstraction over the queue pair and registration channel of one client.
//! - [`FifoConnector`]: Creates named-pipe transports in the daemon's well-known directories.
//!
//! # Wire Format
//!
//! Messages are framed as text lines:
//!
//! ```text
//! >>>
//! t=hbapi-req
//! reqtype=nodelist
//! <<<
//! ```
//!
//! - The record starts with `>>>` and ends with `<<<`, each on its own line.
//! - Every field is one `name=value` line. Names and values never contain NUL, CR or LF,
//!   and names never contain `=`.
//! - The encoded record is capped at [`MAX_MESSAGE_SIZE`] bytes unless configured otherwise.
//!
//! # See Also
//!
//! - [`session`](crate::session): Signon lifecycle and event dispatch built on this layer.
mod message;
mod transport;

pub use message::{END_MARKER, MAX_MESSAGE_SIZE, Message, MessageError, START_MARKER};
pub use transport::{Connector, FifoConnector, FifoTransport, Transport, TransportError};

/// Well-known message field names.
pub mod fields {
    pub const TYPE: &str = "t";
    pub const ORIGIN: &str = "src";
    pub const DESTINATION: &str = "dest";
    pub const NODE: &str = "node";
    pub const FROM_ID: &str = "from_id";
    pub const TO_ID: &str = "to_id";
    pub const PID: &str = "pid";
    pub const STATUS: &str = "st";
    pub const API_REQUEST: &str = "reqtype";
    pub const API_RESULT: &str = "result";
    pub const COMMENT: &str = "info";
    pub const INTERFACE: &str = "ifname";
    pub const FILTER_MASK: &str = "fmask";
    pub const SIGNAL: &str = "signal";
    pub const CORRELATION_ID: &str = "cid";
}

/// Well-known message types.
pub mod types {
    pub const API_REQUEST: &str = "hbapi-req";
    pub const API_RESPONSE: &str = "hbapi-resp";
    pub const TEST_REQUEST: &str = "cltest-req";
    pub const TEST_RESPONSE: &str = "cltest-rsp";
    pub const NODE_STATUS: &str = "status";
    pub const NODE_STATUS_NOSEQ: &str = "NS_st";
    pub const INTERFACE_STATUS: &str = "ifstat";
}

/// Status reported by the daemon for a node that is up.
pub const ACTIVE_STATUS: &str = "active";

/// Control requests understood by the daemon's API handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRequest {
    Signon,
    Signoff,
    SetFilter,
    SetSignal,
    NodeList,
    NodeStatus,
    IfList,
    IfStatus,
}

impl ApiRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiRequest::Signon => "signon",
            ApiRequest::Signoff => "signoff",
            ApiRequest::SetFilter => "setfilter",
            ApiRequest::SetSignal => "setsignal",
            ApiRequest::NodeList => "nodelist",
            ApiRequest::NodeStatus => "nodestatus",
            ApiRequest::IfList => "iflist",
            ApiRequest::IfStatus => "ifstatus",
        }
    }
}

impl TryFrom<&str> for ApiRequest {
    type Error = MessageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "signon" => Ok(ApiRequest::Signon),
            "signoff" => Ok(ApiRequest::Signoff),
            "setfilter" => Ok(ApiRequest::SetFilter),
            "setsignal" => Ok(ApiRequest::SetSignal),
            "nodelist" => Ok(ApiRequest::NodeList),
            "nodestatus" => Ok(ApiRequest::NodeStatus),
            "iflist" => Ok(ApiRequest::IfList),
            "ifstatus" => Ok(ApiRequest::IfStatus),
            other => Err(MessageError::Value(format!(
                "unknown api request '{other}'"
            ))),
        }
    }
}

/// Result code carried in the `result` field of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResult {
    Ok,
    Failure,
    BadRequest,
    /// More fragments of the same answer follow.
    More,
    Unknown(String),
}

impl ApiResult {
    pub const OK: &'static str = "OK";
    pub const FAILURE: &'static str = "fail";
    pub const BADREQ: &'static str = "badreq";
    pub const MORE: &'static str = "ok/more";

    pub fn parse(code: &str) -> Self {
        match code {
            Self::OK => ApiResult::Ok,
            Self::FAILURE => ApiResult::Failure,
            Self::BADREQ => ApiResult::BadRequest,
            Self::MORE => ApiResult::More,
            other => ApiResult::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApiResult::Ok => Self::OK,
            ApiResult::Failure => Self::FAILURE,
            ApiResult::BadRequest => Self::BADREQ,
            ApiResult::More => Self::MORE,
            ApiResult::Unknown(code) => code,
        }
    }
}
