//! Anonymous byte pipes with a stringifiable identity.
//!
//! A pipe here hands exactly one message per direction between a parent and
//! a child it spawned. Because the identity — both descriptor numbers plus
//! the agreed capacity — serializes to a short token, it can ride through
//! argv into an exec'd child, which then adopts the inherited descriptors
//! by parsing the token back.

use std::fmt;
use std::os::unix::io::RawFd;
use std::str::FromStr;

use nix::errno::Errno;
use nix::unistd;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("malformed pipe identifier {0:?}")]
    MalformedId(String),
    #[error("failed to create pipe: {0}")]
    Create(nix::Error),
    #[error("message of {len} bytes exceeds pipe capacity {capacity}")]
    MessageTooLong { len: usize, capacity: usize },
    #[error("pipe endpoint already closed")]
    EndpointClosed,
    #[error("pipe closed before a full frame arrived")]
    TruncatedFrame,
    #[error("pipe read failed: {0}")]
    Read(nix::Error),
    #[error("pipe write failed: {0}")]
    Write(nix::Error),
    #[error("failed to close pipe descriptor {fd}: {source}")]
    Close { fd: RawFd, source: nix::Error },
}

/// Serializable identity of an anonymous pipe: `p<rfd>@<wfd>[<cap>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeId {
    pub read_fd: RawFd,
    pub write_fd: RawFd,
    /// Largest message this pipe agrees to carry.
    pub capacity: usize,
}

impl PipeId {
    /// Create a fresh inheritable pipe. Close-on-exec is deliberately left
    /// unset so a child of a later exec can adopt the descriptors from the
    /// stringified id.
    pub fn create(capacity: usize) -> Result<Self, PipeError> {
        let (read_fd, write_fd) = unistd::pipe().map_err(PipeError::Create)?;
        Ok(Self { read_fd, write_fd, capacity })
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}@{}[{}]", self.read_fd, self.write_fd, self.capacity)
    }
}

impl FromStr for PipeId {
    type Err = PipeError;

    fn from_str(raw: &str) -> Result<Self, PipeError> {
        let err = || PipeError::MalformedId(raw.to_string());
        let rest = raw.strip_prefix('p').ok_or_else(err)?;
        let (read, rest) = rest.split_once('@').ok_or_else(err)?;
        let (write, rest) = rest.split_once('[').ok_or_else(err)?;
        let capacity = rest.strip_suffix(']').ok_or_else(err)?;
        Ok(Self {
            read_fd: read.parse().map_err(|_| err())?,
            write_fd: write.parse().map_err(|_| err())?,
            capacity: capacity.parse().map_err(|_| err())?,
        })
    }
}

/// One endpoint's view of an anonymous pipe.
///
/// Frames carry a little-endian `u32` length prefix, so a message arrives
/// whole regardless of how the kernel slices the underlying reads and
/// writes, and the reader does not depend on observing end-of-file.
///
/// After a fork/exec each side must close the direction it does not use
/// ([`close_read`] / [`close_write`]); whatever is still open when the view
/// drops is closed then.
///
/// [`close_read`]: MsgPipe::close_read
/// [`close_write`]: MsgPipe::close_write
#[derive(Debug)]
pub struct MsgPipe {
    id: PipeId,
    read_open: bool,
    write_open: bool,
}

impl MsgPipe {
    /// Adopt both descriptors of `id` as this process's view of the pipe.
    pub fn open(id: PipeId) -> Self {
        Self { id, read_open: true, write_open: true }
    }

    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Close the read end; the write end stays usable.
    pub fn close_read(&mut self) -> Result<(), PipeError> {
        if !self.read_open {
            return Err(PipeError::EndpointClosed);
        }
        self.read_open = false;
        unistd::close(self.id.read_fd)
            .map_err(|source| PipeError::Close { fd: self.id.read_fd, source })
    }

    /// Close the write end; the read end stays usable.
    pub fn close_write(&mut self) -> Result<(), PipeError> {
        if !self.write_open {
            return Err(PipeError::EndpointClosed);
        }
        self.write_open = false;
        unistd::close(self.id.write_fd)
            .map_err(|source| PipeError::Close { fd: self.id.write_fd, source })
    }

    /// Hand one framed message to the reading side.
    pub fn write_msg(&mut self, msg: &[u8]) -> Result<(), PipeError> {
        if !self.write_open {
            return Err(PipeError::EndpointClosed);
        }
        if msg.len() > self.id.capacity {
            return Err(PipeError::MessageTooLong { len: msg.len(), capacity: self.id.capacity });
        }
        let header = (msg.len() as u32).to_le_bytes();
        self.write_all(&header)?;
        self.write_all(msg)
    }

    pub fn write_str(&mut self, msg: &str) -> Result<(), PipeError> {
        self.write_msg(msg.as_bytes())
    }

    /// Receive one framed message, suspending until the frame is complete.
    pub fn read_msg(&mut self) -> Result<Vec<u8>, PipeError> {
        if !self.read_open {
            return Err(PipeError::EndpointClosed);
        }
        let mut header = [0u8; 4];
        self.read_exact(&mut header)?;
        let len = u32::from_le_bytes(header) as usize;
        if len > self.id.capacity {
            return Err(PipeError::MessageTooLong { len, capacity: self.id.capacity });
        }
        let mut msg = vec![0u8; len];
        self.read_exact(&mut msg)?;
        Ok(msg)
    }

    pub fn read_string(&mut self) -> Result<String, PipeError> {
        Ok(String::from_utf8_lossy(&self.read_msg()?).into_owned())
    }

    /// Release this view without closing the descriptors; another view of
    /// the same pipe still owns them.
    pub fn abandon(mut self) {
        self.read_open = false;
        self.write_open = false;
    }

    fn write_all(&self, buf: &[u8]) -> Result<(), PipeError> {
        let mut written = 0;
        while written < buf.len() {
            match unistd::write(self.id.write_fd, &buf[written..]) {
                Ok(0) => return Err(PipeError::TruncatedFrame),
                Ok(n) => written += n,
                Err(err) if err.as_errno() == Some(Errno::EINTR) => {}
                Err(err) => return Err(PipeError::Write(err)),
            }
        }
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8]) -> Result<(), PipeError> {
        let mut filled = 0;
        while filled < buf.len() {
            match unistd::read(self.id.read_fd, &mut buf[filled..]) {
                Ok(0) => return Err(PipeError::TruncatedFrame),
                Ok(n) => filled += n,
                Err(err) if err.as_errno() == Some(Errno::EINTR) => {}
                Err(err) => return Err(PipeError::Read(err)),
            }
        }
        Ok(())
    }
}

impl Drop for MsgPipe {
    fn drop(&mut self) {
        if self.read_open {
            let _ = unistd::close(self.id.read_fd);
            self.read_open = false;
        }
        if self.write_open {
            let _ = unistd::close(self.id.write_fd);
            self.write_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn id_round_trips_through_argv_form() {
        let id = PipeId { read_fd: 7, write_fd: 12, capacity: 3_000_007 };
        assert_eq!(id.to_string(), "p7@12[3000007]");
        assert_eq!(id.to_string().parse::<PipeId>().unwrap(), id);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for raw in ["", "7@12[5]", "p7-12[5]", "p7@12", "p7@12[5", "p7@twelve[5]"] {
            assert!(raw.parse::<PipeId>().is_err(), "{raw:?} parsed");
        }
    }

    #[test]
    fn small_message_round_trips_in_process() {
        let id = PipeId::create(64).unwrap();
        let mut pipe = MsgPipe::open(id);
        pipe.write_msg(b"hello").unwrap();
        assert_eq!(pipe.read_msg().unwrap(), b"hello");
    }

    #[test]
    fn empty_message_round_trips() {
        let id = PipeId::create(64).unwrap();
        let mut pipe = MsgPipe::open(id);
        pipe.write_msg(b"").unwrap();
        assert_eq!(pipe.read_msg().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn frame_larger_than_the_kernel_buffer_arrives_whole() {
        let id = PipeId::create(1 << 20).unwrap();
        let mut reader = MsgPipe::open(id);
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let handle = std::thread::spawn(move || {
            // a second view of the same descriptors; abandoned so only the
            // reader's view closes them
            let mut writer = MsgPipe::open(id);
            writer.write_msg(&payload).unwrap();
            writer.abandon();
        });
        let received = reader.read_msg().unwrap();
        handle.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let id = PipeId::create(4).unwrap();
        let mut pipe = MsgPipe::open(id);
        assert!(matches!(
            pipe.write_msg(b"12345"),
            Err(PipeError::MessageTooLong { len: 5, capacity: 4 })
        ));
    }

    #[test]
    fn double_close_is_reported() {
        let id = PipeId::create(8).unwrap();
        let mut pipe = MsgPipe::open(id);
        pipe.close_read().unwrap();
        assert!(matches!(pipe.close_read(), Err(PipeError::EndpointClosed)));
        assert!(matches!(pipe.read_msg(), Err(PipeError::EndpointClosed)));
    }

    #[test]
    fn reader_sees_truncation_when_writer_leaves() {
        let id = PipeId::create(64).unwrap();
        let mut pipe = MsgPipe::open(id);
        pipe.write_msg(b"only one").unwrap();
        pipe.close_write().unwrap();
        assert_eq!(pipe.read_msg().unwrap(), b"only one");
        assert!(matches!(pipe.read_msg(), Err(PipeError::TruncatedFrame)));
    }

    proptest! {
        #[test]
        fn id_text_form_is_stable(
            read_fd in 0i32..65_536,
            write_fd in 0i32..65_536,
            capacity in 0usize..10_000_000,
        ) {
            let id = PipeId { read_fd, write_fd, capacity };
            prop_assert_eq!(id.to_string().parse::<PipeId>().unwrap(), id);
        }
    }
}
