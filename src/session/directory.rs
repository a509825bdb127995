//! Cluster directory queries.
//!
//! Each query is one request/reply exchange with the local daemon. List answers arrive as
//! a run of `ok/more` fragments closed by a final `OK` fragment, each carrying one item.
//! A `fail` (or any other) result means the daemon has no answer and the query yields
//! `None`. Nothing is cached; every call asks the daemon again.
use std::collections::BTreeMap;

use log::{debug, warn};

use crate::protocol::{ACTIVE_STATUS, ApiRequest, ApiResult, Message, Transport, fields};

use super::{Session, SessionError};

/// What the daemon reports about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub status: Option<String>,
    pub interfaces: BTreeMap<String, Option<String>>,
}

pub type Snapshot = BTreeMap<String, DirectoryEntry>;

impl<T: Transport> Session<T> {
    /// Names of every node the daemon knows about.
    pub fn nodes(&mut self) -> Result<Option<Vec<String>>, SessionError> {
        let request = self.channel.api_message(ApiRequest::NodeList)?;
        self.fragments(ApiRequest::NodeList, request, fields::NODE)
    }

    /// Names of the interfaces the local node uses to reach `node`.
    pub fn interfaces(&mut self, node: &str) -> Result<Option<Vec<String>>, SessionError> {
        let mut request = self.channel.api_message(ApiRequest::IfList)?;
        request.set(fields::NODE, node)?;
        self.fragments(ApiRequest::IfList, request, fields::INTERFACE)
    }

    pub fn node_status(&mut self, node: &str) -> Result<Option<String>, SessionError> {
        let mut request = self.channel.api_message(ApiRequest::NodeStatus)?;
        request.set(fields::NODE, node)?;
        self.single(ApiRequest::NodeStatus, request, fields::STATUS)
    }

    pub fn interface_status(
        &mut self,
        node: &str,
        interface: &str,
    ) -> Result<Option<String>, SessionError> {
        let mut request = self.channel.api_message(ApiRequest::IfStatus)?;
        request.set(fields::NODE, node)?;
        request.set(fields::INTERFACE, interface)?;
        self.single(ApiRequest::IfStatus, request, fields::STATUS)
    }

    /// Nodes whose status equals `status`, `active` when not given.
    pub fn nodes_with_status(
        &mut self,
        status: Option<&str>,
    ) -> Result<Vec<String>, SessionError> {
        let wanted = status.unwrap_or(ACTIVE_STATUS);
        let mut matching = Vec::new();
        for node in self.nodes()?.unwrap_or_default() {
            if self.node_status(&node)?.as_deref() == Some(wanted) {
                matching.push(node);
            }
        }
        Ok(matching)
    }

    /// Every node with its status and interfaces.
    ///
    /// Costs one round trip per node and per interface.
    pub fn snapshot(&mut self) -> Result<Snapshot, SessionError> {
        let mut snapshot = Snapshot::new();
        for node in self.nodes()?.unwrap_or_default() {
            let status = self.node_status(&node)?;
            let mut interfaces = BTreeMap::new();
            for interface in self.interfaces(&node)?.unwrap_or_default() {
                let st = self.interface_status(&node, &interface)?;
                interfaces.insert(interface, st);
            }
            snapshot.insert(node, DirectoryEntry { status, interfaces });
        }
        Ok(snapshot)
    }

    /// Sets the daemon-side filter of message treatments delivered to this client.
    pub fn set_filter(&mut self, mask: u32) -> Result<bool, SessionError> {
        let mut request = self.channel.api_message(ApiRequest::SetFilter)?;
        request.set(fields::FILTER_MASK, format!("{mask:x}"))?;
        let reply = self.control(ApiRequest::SetFilter, &request)?;
        Ok(reply.result() == Some(ApiResult::OK))
    }

    /// Sets the signal the daemon raises when a message is queued; 0 cancels it.
    pub fn set_signal(&mut self, signal: i32) -> Result<bool, SessionError> {
        let mut request = self.channel.api_message(ApiRequest::SetSignal)?;
        request.set(fields::SIGNAL, signal.to_string())?;
        let reply = self.control(ApiRequest::SetSignal, &request)?;
        Ok(reply.result() == Some(ApiResult::OK))
    }

    fn single(
        &mut self,
        kind: ApiRequest,
        request: Message,
        field: &str,
    ) -> Result<Option<String>, SessionError> {
        let reply = self.control(kind, &request)?;
        match ApiResult::parse(reply.result().unwrap_or_default()) {
            ApiResult::Ok => Ok(reply.get(field).map(str::to_string)),
            other => {
                debug!("{} query answered '{}'", kind.as_str(), other.as_str());
                Ok(None)
            }
        }
    }

    fn fragments(
        &mut self,
        kind: ApiRequest,
        request: Message,
        field: &str,
    ) -> Result<Option<Vec<String>>, SessionError> {
        let mut reply = self.control(kind, &request)?;
        let mut items = Vec::new();

        loop {
            let result = ApiResult::parse(reply.result().unwrap_or_default());
            if !matches!(result, ApiResult::Ok | ApiResult::More) {
                debug!("{} query answered '{}'", kind.as_str(), result.as_str());
                return Ok(None);
            }

            match reply.get(field) {
                Some(item) => items.push(item.to_string()),
                None => {
                    warn!("{} reply without '{field}' field", kind.as_str());
                    return Ok(None);
                }
            }

            if result == ApiResult::Ok {
                return Ok(Some(items));
            }
            reply = self.await_api_reply(kind)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::Config,
        protocol::types,
        testing::{FakeDaemon, MockConnector},
    };

    fn session(daemon: &crate::testing::SharedDaemon) -> Session<crate::testing::MockTransport> {
        let mut connector = MockConnector::new(daemon);
        let config = Config::default()
            .with_node_name("n1")
            .with_timeout(Duration::from_millis(50));
        Session::signon(&mut connector, None, config).unwrap()
    }

    fn cluster() -> crate::testing::SharedDaemon {
        let daemon = FakeDaemon::shared();
        {
            let mut d = daemon.borrow_mut();
            d.add_node("n1", "active", &[("eth0", "up"), ("eth1", "up")]);
            d.add_node("n2", "active", &[("eth0", "dead")]);
            d.add_node("n3", "dead", &[]);
        }
        daemon
    }

    #[test]
    fn nodes_collects_fragments() {
        let daemon = cluster();
        let mut session = session(&daemon);

        assert_eq!(
            session.nodes().unwrap(),
            Some(vec![
                String::from("n1"),
                String::from("n2"),
                String::from("n3")
            ])
        );
    }

    #[test]
    fn single_fragment_list() {
        let daemon = FakeDaemon::shared();
        daemon.borrow_mut().add_node("solo", "active", &[]);
        let mut session = session(&daemon);

        assert_eq!(session.nodes().unwrap(), Some(vec![String::from("solo")]));
    }

    #[test]
    fn status_queries() {
        let daemon = cluster();
        let mut session = session(&daemon);

        assert_eq!(session.node_status("n3").unwrap().as_deref(), Some("dead"));
        assert_eq!(
            session.interface_status("n2", "eth0").unwrap().as_deref(),
            Some("dead")
        );
        assert_eq!(
            session.interfaces("n1").unwrap(),
            Some(vec![String::from("eth0"), String::from("eth1")])
        );
    }

    #[test]
    fn unknown_node_yields_none() {
        let daemon = cluster();
        let mut session = session(&daemon);

        assert_eq!(session.node_status("nope").unwrap(), None);
        assert_eq!(session.interfaces("nope").unwrap(), None);
        assert_eq!(session.interface_status("n1", "wlan0").unwrap(), None);
    }

    #[test]
    fn active_nodes() {
        let daemon = cluster();
        let mut session = session(&daemon);

        assert_eq!(
            session.nodes_with_status(None).unwrap(),
            vec![String::from("n1"), String::from("n2")]
        );
        assert_eq!(
            session.nodes_with_status(Some("dead")).unwrap(),
            vec![String::from("n3")]
        );
    }

    #[test]
    fn snapshot_nests_interfaces() {
        let daemon = cluster();
        let mut session = session(&daemon);

        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["n1"].status.as_deref(), Some("active"));
        assert_eq!(
            snapshot["n1"].interfaces["eth1"].as_deref(),
            Some("up")
        );
        assert!(snapshot["n3"].interfaces.is_empty());
    }

    #[test]
    fn filter_and_signal_requests() {
        let daemon = cluster();
        let mut session = session(&daemon);

        assert!(session.set_filter(0x11).unwrap());
        assert!(session.set_signal(0).unwrap());

        let d = daemon.borrow();
        let filter = d.last_request("setfilter").unwrap();
        assert_eq!(filter.get(fields::FILTER_MASK), Some("11"));
    }

    #[test]
    fn late_reply_to_earlier_query_is_discarded() {
        let daemon = cluster();
        let mut session = session(&daemon);
        let late = Message::from_fields([
            (fields::TYPE, types::API_RESPONSE),
            (fields::API_REQUEST, "nodelist"),
            (fields::API_RESULT, ApiResult::OK),
            (fields::NODE, "ghost"),
        ])
        .unwrap();
        daemon.borrow_mut().push_inbound(late);

        assert_eq!(session.node_status("n1").unwrap().as_deref(), Some("active"));
        assert_eq!(session.node_status("n3").unwrap().as_deref(), Some("dead"));
        assert!(session.read_next(false).unwrap().is_none());
    }

    #[test]
    fn query_after_signoff_fails() {
        let daemon = cluster();
        let mut session = session(&daemon);
        session.signoff().unwrap();

        assert!(matches!(session.nodes(), Err(SessionError::NotSignedOn)));
    }
}
