//! Client configuration.
//!
//! Everything the protocol layer needs to know about its environment is carried in a
//! [`Config`] handed to [`Session::signon`](crate::session::Session::signon); nothing is read
//! from global state.
use std::{path::PathBuf, time::Duration};

use crate::{protocol::MAX_MESSAGE_SIZE, session::Identity};

/// Default directory holding the daemon's registration channel and client queues.
pub const DEFAULT_BASE_DIR: &str = "/var/lib/heartbeat";
/// Default bound on control-request round trips.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of unexpected replies kept per correlated request.
pub const DEFAULT_MAX_EXTRAS: usize = 64;

const REGISTRATION_NAME: &str = "register";
const NAMED_CLIENT_DIR: &str = "api";
const CASUAL_CLIENT_DIR: &str = "casual";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub base_dir: PathBuf,
    pub max_message_size: usize,
    pub default_timeout: Duration,
    pub max_extras: usize,
    /// Overrides the local host name stamped as message origin.
    pub node_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            max_message_size: MAX_MESSAGE_SIZE,
            default_timeout: DEFAULT_TIMEOUT,
            max_extras: DEFAULT_MAX_EXTRAS,
            node_name: None,
        }
    }
}

impl Config {
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_extras(mut self, max: usize) -> Self {
        self.max_extras = max;
        self
    }

    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn registration_path(&self) -> PathBuf {
        self.base_dir.join(REGISTRATION_NAME)
    }

    pub fn named_dir(&self) -> PathBuf {
        self.base_dir.join(NAMED_CLIENT_DIR)
    }

    pub fn casual_dir(&self) -> PathBuf {
        self.base_dir.join(CASUAL_CLIENT_DIR)
    }

    /// Directory holding the queue pair of the given client.
    pub fn queue_dir(&self, identity: &Identity) -> PathBuf {
        if identity.is_casual() {
            self.casual_dir()
        } else {
            self.named_dir()
        }
    }

    /// Name of the local node: the override if set, else the lower-cased host name.
    pub fn resolve_node_name(&self) -> Result<String, nix::Error> {
        if let Some(name) = &self.node_name {
            return Ok(name.clone());
        }
        let host = nix::unistd::gethostname()?;
        Ok(host.to_string_lossy().to_lowercase())
    }
}
