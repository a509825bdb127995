//! CLI utilities for the heartbeat client shell.
//!
//! The utilities present in this module are used by the `hb_cli` binary to read commands
//! and print what the daemon answered.
use std::io::{self, BufRead, Write};

use crate::{
    command::{Command, CommandError},
    correlator::Collected,
    session::Snapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("prompt IO error: {0}")]
    Io(#[from] io::Error),
}

/// Prompt user for a valid command.
///
/// End of input is treated as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, PromptError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "hb> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    Ok(s.as_str().try_into()?)
}

/// Writes a directory snapshot as an indented tree.
pub fn write_snapshot<W: Write>(mut writer: W, snapshot: &Snapshot) -> io::Result<()> {
    for (node, entry) in snapshot {
        writeln!(
            writer,
            "{node}: {}",
            entry.status.as_deref().unwrap_or("unknown")
        )?;
        for (interface, status) in &entry.interfaces {
            writeln!(
                writer,
                "\t{interface}: {}",
                status.as_deref().unwrap_or("unknown")
            )?;
        }
    }
    Ok(())
}

/// Writes the outcome of a correlated request.
pub fn write_collected<W: Write>(mut writer: W, collected: &Collected) -> io::Result<()> {
    for (node, reply) in &collected.replies {
        writeln!(
            writer,
            "{node}: {}",
            reply.result().unwrap_or("no result")
        )?;
    }
    for node in &collected.timed_out {
        writeln!(writer, "{node}: timed out")?;
    }
    if !collected.extras.is_empty() || collected.extras_dropped > 0 {
        writeln!(
            writer,
            "{} unexpected replies ({} dropped)",
            collected.extras.len() + collected.extras_dropped,
            collected.extras_dropped
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{protocol::Message, session::DirectoryEntry};

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("hb> ", output);
    }

    #[test]
    fn prompt_handles_queries() {
        let input = b"status n1\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Status(String::from("n1")), res);
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let mut output = Vec::new();

        let res = prompt(&b""[..], &mut output).unwrap();
        assert_eq!(Command::Exit, res);
    }

    #[test]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        let err = prompt(&input[..], &mut output).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized command '.something_wrong'");
    }

    #[test]
    fn snapshot_output() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            String::from("n1"),
            DirectoryEntry {
                status: Some(String::from("active")),
                interfaces: BTreeMap::from([(String::from("eth0"), Some(String::from("up")))]),
            },
        );
        let mut output = Vec::new();

        write_snapshot(&mut output, &snapshot).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "n1: active\n\teth0: up\n");
    }

    #[test]
    fn collected_output() {
        let mut collected = Collected::default();
        collected.replies.insert(
            String::from("n1"),
            Message::from_fields([("t", "cltest-rsp"), ("result", "OK")]).unwrap(),
        );
        collected.timed_out.insert(String::from("n3"));
        let mut output = Vec::new();

        write_collected(&mut output, &collected).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "n1: OK\nn3: timed out\n"
        );
    }
}
