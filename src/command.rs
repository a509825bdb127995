//! Interactive client commands.
//!
//! This module defines the [`Command`] enum, parsed from the lines a user types into the
//! `hb_cli` shell. Each command maps onto one directory query or correlated request made
//! through a [`Session`](crate::session::Session).
//!
//! # Overview
//! The supported commands are:
//!
//! - `.exit`: Sign off and leave the shell.
//! - `nodes`: List every node known to the daemon.
//! - `active`: List nodes whose status is `active`.
//! - `status <node>`: Status of one node.
//! - `ifaces <node>`: Interfaces used to reach a node.
//! - `ifstatus <node> <interface>`: Status of one interface.
//! - `snapshot`: Everything above for every node.
//! - `ping [node]`: Ping every active node, or a single one.
//!
//! # Example
//! ```rust
//! use hbapi::Command;
//!
//! let cmd: Command = "status n1".try_into().unwrap();
//! assert_eq!(cmd, Command::Status(String::from("n1")));
//! ```
use thiserror::Error;

/// List of possible errors when parsing a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

/// User supplied commands to run against a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign off and terminate the shell.
    Exit,
    Nodes,
    Active,
    Status(String),
    Interfaces(String),
    InterfaceStatus { node: String, interface: String },
    Snapshot,
    /// Ping one node, or every active node when `None`.
    Ping(Option<String>),
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parts = value.split_whitespace().collect::<Vec<&str>>();
        let Some((name, args)) = parts.split_first() else {
            return Err(CommandError::Empty);
        };

        match (name.to_lowercase().as_str(), args) {
            (".exit", []) => Ok(Command::Exit),
            ("nodes", []) => Ok(Command::Nodes),
            ("active", []) => Ok(Command::Active),
            ("snapshot", []) => Ok(Command::Snapshot),
            ("status", [node]) => Ok(Command::Status(node.to_string())),
            ("ifaces", [node]) => Ok(Command::Interfaces(node.to_string())),
            ("ifstatus", [node, interface]) => Ok(Command::InterfaceStatus {
                node: node.to_string(),
                interface: interface.to_string(),
            }),
            ("ping", []) => Ok(Command::Ping(None)),
            ("ping", [node]) => Ok(Command::Ping(Some(node.to_string()))),
            (command @ ("status" | "ifaces"), _) => Err(CommandError::InvalidCommandArguments {
                command: command.to_string(),
                reason: format!("requires exactly one node name. Example: {command} n1"),
            }),
            ("ifstatus", _) => Err(CommandError::InvalidCommandArguments {
                command: String::from("ifstatus"),
                reason: String::from(
                    "requires a node and an interface name. Example: ifstatus n1 eth0",
                ),
            }),
            ("ping", _) => Err(CommandError::InvalidCommandArguments {
                command: String::from("ping"),
                reason: String::from("takes at most one node name. Example: ping n1"),
            }),
            _ => Err(CommandError::UnrecognizedCommand(value.trim().to_string())),
        }
    }
}
