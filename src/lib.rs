pub mod cli;
pub mod command;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

pub use cli::{PromptError, prompt};
pub use command::{Command, CommandError};
pub use config::Config;
pub use correlator::{Collected, Request, RequestKinds};
pub use dispatch::{DispatchTable, Routing};
pub use protocol::{FifoConnector, FifoTransport, Message, MessageError};
pub use session::{Outbox, Session, SessionError};
