use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader},
    os::{
        fd::AsFd,
        unix::fs::{FileTypeExt, OpenOptionsExt},
    },
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    fcntl::OFlag,
    poll::{PollFd, PollFlags, PollTimeout, poll},
    sys::stat::Mode,
    unistd::mkfifo,
};
use thiserror::Error;

use crate::{config::Config, session::Identity};

use super::{END_MARKER, Message, MessageError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to frame message: {0}")]
    Message(#[from] MessageError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Transport OS Error: {0}")]
    Os(#[from] nix::Error),
    #[error("no daemon is reading {0:?}")]
    DaemonUnavailable(PathBuf),
}

/// The queue pair of one API client plus its path to the registration channel.
///
/// Inbound traffic arrives on the reply queue; outbound traffic leaves on the request
/// queue once [`attach`](Transport::attach) has been called after a successful signon.
pub trait Transport {
    /// Delivers a control message on the daemon's well-known registration channel.
    fn register(&mut self, msg: &Message) -> Result<(), TransportError>;

    /// Opens the request queue; called once the daemon has accepted the signon.
    fn attach(&mut self) -> Result<(), TransportError>;

    fn send(&mut self, msg: &Message) -> Result<(), TransportError>;

    /// Waits for the next inbound message.
    ///
    /// `None` waits forever, `Some(Duration::ZERO)` only checks. Returns `Ok(None)` if
    /// the timeout elapsed with nothing to read.
    fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError>;

    /// True if [`recv`](Transport::recv) would return a message without waiting.
    fn ready(&mut self) -> Result<bool, TransportError>;
}

/// Creates transports for a client identity.
pub trait Connector {
    type Transport: Transport;

    fn connect(
        &mut self,
        identity: &Identity,
        config: &Config,
    ) -> Result<Self::Transport, TransportError>;
}

/// Connects clients through named pipes under the configured base directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoConnector;

impl Connector for FifoConnector {
    type Transport = FifoTransport;

    fn connect(
        &mut self,
        identity: &Identity,
        config: &Config,
    ) -> Result<FifoTransport, TransportError> {
        FifoTransport::open(identity, config)
    }
}

pub struct FifoTransport {
    reply: BufReader<File>,
    request: Option<File>,
    registration_path: PathBuf,
    request_path: PathBuf,
    reply_path: PathBuf,
    max_size: usize,
    /// Casual queues are removed when the transport is dropped.
    ephemeral: bool,
}

impl FifoTransport {
    pub fn open(identity: &Identity, config: &Config) -> Result<Self, TransportError> {
        let dir = config.queue_dir(identity);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }

        let client_id = identity.client_id();
        let request_path = dir.join(format!("{client_id}.req"));
        let reply_path = dir.join(format!("{client_id}.rsp"));
        make_queue(&request_path)?;
        make_queue(&reply_path)?;

        // Read-write so the open never blocks waiting for the daemon to attach.
        let reply = OpenOptions::new().read(true).write(true).open(&reply_path)?;
        debug!("opened reply queue {reply_path:?}");

        Ok(Self {
            reply: BufReader::new(reply),
            request: None,
            registration_path: config.registration_path(),
            request_path,
            reply_path,
            max_size: config.max_message_size,
            ephemeral: identity.is_casual(),
        })
    }

    pub fn request_path(&self) -> &Path {
        &self.request_path
    }

    pub fn reply_path(&self) -> &Path {
        &self.reply_path
    }

    /// True if the read buffer already holds the end of a record.
    ///
    /// Writers emit each record with a single write no larger than `PIPE_BUF`, so once
    /// the queue polls readable the rest of a partially buffered record is there too.
    fn record_buffered(&self) -> bool {
        // The buffer always starts on a line boundary.
        let buf = self.reply.buffer();
        let end = END_MARKER.as_bytes();
        buf.starts_with(end)
            || buf
                .windows(end.len() + 1)
                .any(|w| w[0] == b'\n' && &w[1..] == end)
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(t) => PollTimeout::try_from(t).unwrap_or(PollTimeout::MAX),
        };
        let mut fds = [PollFd::new(self.reply.get_ref().as_fd(), PollFlags::POLLIN)];

        loop {
            match poll(&mut fds, timeout) {
                Ok(ready) => return Ok(ready > 0),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transport for FifoTransport {
    fn register(&mut self, msg: &Message) -> Result<(), TransportError> {
        msg.require_type()?;
        // Non-blocking so a missing reader fails the open instead of hanging it.
        let open = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.registration_path);
        let mut registration = match open {
            Ok(file) => file,
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                return Err(TransportError::DaemonUnavailable(
                    self.registration_path.clone(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        msg.write_to(&mut registration, self.max_size)?;
        trace!("registration message written to {:?}", self.registration_path);
        Ok(())
    }

    fn attach(&mut self) -> Result<(), TransportError> {
        if self.request.is_none() {
            let request = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.request_path)?;
            self.request = Some(request);
            debug!("attached request queue {:?}", self.request_path);
        }
        Ok(())
    }

    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        msg.require_type()?;
        let request = self.request.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "request queue is not attached")
        })?;
        msg.write_to(request, self.max_size)?;
        Ok(())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        if !self.record_buffered() && !self.wait_readable(timeout)? {
            return Ok(None);
        }
        let msg = Message::from_reader_with_limit(&mut self.reply, self.max_size)?;
        msg.require_type()?;
        Ok(Some(msg))
    }

    fn ready(&mut self) -> Result<bool, TransportError> {
        if self.record_buffered() {
            return Ok(true);
        }
        self.wait_readable(Some(Duration::ZERO))
    }
}

impl Drop for FifoTransport {
    fn drop(&mut self) {
        if !self.ephemeral {
            return;
        }
        for path in [&self.request_path, &self.reply_path] {
            if let Err(e) = fs::remove_file(path) {
                warn!("failed to remove queue {path:?}: {e}");
            }
        }
    }
}

/// Creates an owner-only FIFO at `path` unless one already exists.
fn make_queue(path: &Path) -> Result<(), TransportError> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a FIFO", path.display()),
        )
        .into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)?;
            debug!("created queue {path:?}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
