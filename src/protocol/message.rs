use std::{
    collections::{BTreeMap, btree_map},
    io::{self, BufRead, Write},
};

use log::trace;
use thiserror::Error;

use super::fields;

/// Largest encoded message accepted or produced by default.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// First line of every encoded message.
pub const START_MARKER: &str = ">>>\n";
/// Last line of every encoded message.
pub const END_MARKER: &str = "<<<\n";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message format error: {0}")]
    Format(String),
    #[error("message length {len} exceeds limit of {max} bytes")]
    Size { len: usize, max: usize },
    #[error("invalid message field: {0}")]
    Value(String),
    #[error("stream ended before a complete message was read")]
    Eof,
    #[error("message IO error: {0}")]
    Io(#[from] io::Error),
}

/// A heartbeat message: a set of string fields keyed by name.
///
/// Every name and value stored here has already been validated, so a `Message` can
/// always be encoded unless it grows past the size cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: BTreeMap<String, String>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty message of the given type.
    pub fn with_type(kind: &str) -> Result<Self, MessageError> {
        let mut msg = Self::new();
        msg.set(fields::TYPE, kind)?;
        Ok(msg)
    }

    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut msg = Self::new();
        for (name, value) in fields {
            msg.set(name, value)?;
        }
        Ok(msg)
    }

    pub fn from_pair<K, V>(pair: (K, V)) -> Result<Self, MessageError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_fields([pair])
    }

    /// Decodes one complete record, rejecting anything above [`MAX_MESSAGE_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::from_bytes_with_limit(bytes, MAX_MESSAGE_SIZE)
    }

    pub fn from_bytes_with_limit(bytes: &[u8], limit: usize) -> Result<Self, MessageError> {
        if bytes.len() > limit {
            return Err(MessageError::Size {
                len: bytes.len(),
                max: limit,
            });
        }

        let framed = bytes.len() >= START_MARKER.len() + END_MARKER.len()
            && bytes.starts_with(START_MARKER.as_bytes())
            && bytes.ends_with(END_MARKER.as_bytes());
        if !framed {
            return Err(MessageError::Format(String::from(
                "missing start or end delimiter",
            )));
        }

        let body = &bytes[START_MARKER.len()..bytes.len() - END_MARKER.len()];
        let body = std::str::from_utf8(body)
            .map_err(|e| MessageError::Value(format!("message is not valid UTF-8: {e}")))?;
        if !body.is_empty() && !body.ends_with('\n') {
            return Err(MessageError::Format(String::from(
                "unterminated field line",
            )));
        }

        let mut msg = Self::new();
        for line in body.split_terminator('\n') {
            msg.parse_line(line)?;
        }
        Ok(msg)
    }

    /// Reads the next record from a stream, skipping anything before the start delimiter.
    pub fn from_reader<R: BufRead>(reader: &mut R) -> Result<Self, MessageError> {
        Self::from_reader_with_limit(reader, MAX_MESSAGE_SIZE)
    }

    pub fn from_reader_with_limit<R: BufRead>(
        reader: &mut R,
        limit: usize,
    ) -> Result<Self, MessageError> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(MessageError::Eof);
            }
            if line == START_MARKER {
                break;
            }
            trace!("skipping line outside of a message: {line:?}");
        }

        let mut msg = Self::new();
        let mut len = START_MARKER.len();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                return Err(MessageError::Eof);
            }

            len += read;
            if len > limit {
                return Err(MessageError::Size { len, max: limit });
            }
            if line == END_MARKER {
                return Ok(msg);
            }

            let field = line.strip_suffix('\n').ok_or(MessageError::Eof)?;
            msg.parse_line(field)?;
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<(), MessageError> {
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| MessageError::Format(format!("field line without '=': {line:?}")))?;
        if self.fields.contains_key(name) {
            return Err(MessageError::Format(format!("duplicate field '{name}'")));
        }
        self.set(name, value)
    }

    /// Sets a field, replacing any previous value.
    pub fn set<K, V>(&mut self, name: K, value: V) -> Result<(), MessageError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;
        self.fields.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every field of `other` into this message.
    pub fn update(&mut self, other: &Message) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.get(fields::TYPE)
    }

    pub fn origin(&self) -> Option<&str> {
        self.get(fields::ORIGIN)
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(fields::DESTINATION)
    }

    pub fn subtype(&self) -> Option<&str> {
        self.get(fields::API_REQUEST)
    }

    pub fn result(&self) -> Option<&str> {
        self.get(fields::API_RESULT)
    }

    pub fn status(&self) -> Option<&str> {
        self.get(fields::STATUS)
    }

    /// Fails unless the message carries a type, which every message on a queue must.
    pub fn require_type(&self) -> Result<&str, MessageError> {
        self.kind()
            .ok_or_else(|| MessageError::Value(String::from("message has no type field")))
    }

    pub fn encoded_len(&self) -> usize {
        START_MARKER.len()
            + self
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>()
            + END_MARKER.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        self.encode_with_limit(MAX_MESSAGE_SIZE)
    }

    pub fn encode_with_limit(&self, limit: usize) -> Result<Vec<u8>, MessageError> {
        let len = self.encoded_len();
        if len > limit {
            return Err(MessageError::Size { len, max: limit });
        }

        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(START_MARKER.as_bytes());
        for (name, value) in &self.fields {
            out.extend_from_slice(name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(END_MARKER.as_bytes());
        Ok(out)
    }

    /// Encodes the message onto `writer` and flushes it.
    pub fn write_to<W: Write>(&self, writer: &mut W, limit: usize) -> Result<(), MessageError> {
        let bytes = self.encode_with_limit(limit)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Message::from_bytes(value)
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

fn validate_name(name: &str) -> Result<(), MessageError> {
    if name.is_empty() {
        return Err(MessageError::Value(String::from("empty field name")));
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '\0' | '\r' | '\n' | '=')) {
        return Err(MessageError::Value(format!(
            "field name {name:?} contains {c:?}"
        )));
    }
    Ok(())
}

fn validate_value(name: &str, value: &str) -> Result<(), MessageError> {
    if let Some(c) = value.chars().find(|c| matches!(c, '\0' | '\r' | '\n')) {
        return Err(MessageError::Value(format!(
            "value of field '{name}' contains {c:?}"
        )));
    }
    Ok(())
}
