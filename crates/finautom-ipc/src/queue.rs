//! Named, bounded, framed message queues over POSIX mqueues.

use std::ffi::CString;

use libc::{c_long, mqd_t};
use nix::errno::Errno;
use nix::mqueue::{self, MQ_OFlag, MqAttr};
use nix::sys::stat::Mode;
use thiserror::Error;
use tracing::debug;

/// Longest accepted queue name in bytes, including the leading `/`.
pub const MAX_QUEUE_NAME_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue name {name:?} exceeds {max} bytes", max = MAX_QUEUE_NAME_LEN)]
    NameTooLong { name: String },
    #[error("queue name {name:?} is not a valid POSIX queue name")]
    InvalidName { name: String },
    #[error("failed to open queue {name}: {source}")]
    Open { name: String, source: nix::Error },
    #[error("message of {len} bytes exceeds the {max}-byte message size of queue {name}")]
    MessageTooLong { name: String, len: usize, max: usize },
    #[error("failed to send on queue {name}: {source}")]
    Send { name: String, source: nix::Error },
    #[error("failed to receive on queue {name}: {source}")]
    Receive { name: String, source: nix::Error },
    #[error("failed to close queue {name}: {source}")]
    Close { name: String, source: nix::Error },
    #[error("failed to unlink queue {name}: {source}")]
    Unlink { name: String, source: nix::Error },
}

/// A named, bounded, framed FIFO of byte strings.
///
/// The kernel object is identified by its name and outlives any one
/// descriptor: closing and reopening (which is how [`set_blocking`] works)
/// reattaches to the same queue and whatever messages are still in it.
/// Opening creates the queue if it does not exist yet.
///
/// In non-blocking mode a full queue turns `send` into a no-op reporting
/// `false` and an empty queue turns `recv` into `None`; in blocking mode
/// both operations suspend instead.
///
/// [`set_blocking`]: MsgQueue::set_blocking
#[derive(Debug)]
pub struct MsgQueue {
    name: String,
    cname: CString,
    mqd: mqd_t,
    msg_size: usize,
    capacity: usize,
    blocking: bool,
    open: bool,
}

impl MsgQueue {
    /// Open (creating if needed) a blocking queue.
    pub fn open(name: &str, msg_size: usize, capacity: usize) -> Result<Self, QueueError> {
        Self::open_mode(name, msg_size, capacity, true)
    }

    /// Open (creating if needed) a non-blocking queue.
    pub fn open_nonblocking(name: &str, msg_size: usize, capacity: usize) -> Result<Self, QueueError> {
        Self::open_mode(name, msg_size, capacity, false)
    }

    fn open_mode(
        name: &str,
        msg_size: usize,
        capacity: usize,
        blocking: bool,
    ) -> Result<Self, QueueError> {
        if name.len() > MAX_QUEUE_NAME_LEN {
            return Err(QueueError::NameTooLong { name: name.to_string() });
        }
        if !name.starts_with('/') || name.len() < 2 {
            return Err(QueueError::InvalidName { name: name.to_string() });
        }
        let cname = CString::new(name)
            .map_err(|_| QueueError::InvalidName { name: name.to_string() })?;
        let mqd = Self::open_descriptor(&cname, name, msg_size, capacity, blocking)?;
        Ok(Self {
            name: name.to_string(),
            cname,
            mqd,
            msg_size,
            capacity,
            blocking,
            open: true,
        })
    }

    fn open_descriptor(
        cname: &CString,
        name: &str,
        msg_size: usize,
        capacity: usize,
        blocking: bool,
    ) -> Result<mqd_t, QueueError> {
        let mut oflag = MQ_OFlag::O_RDWR | MQ_OFlag::O_CREAT;
        if !blocking {
            oflag |= MQ_OFlag::O_NONBLOCK;
        }
        let attr = MqAttr::new(0, capacity as c_long, msg_size as c_long, 0);
        mqueue::mq_open(cname, oflag, Mode::from_bits_truncate(0o664), Some(&attr))
            .map_err(|source| QueueError::Open { name: name.to_string(), source })
    }

    /// Queue name, including the leading `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Maximum message length this queue accepts.
    pub fn msg_size(&self) -> usize {
        self.msg_size
    }

    /// Send one message. Returns `false` when the queue is full and this
    /// handle is non-blocking; a blocking handle suspends instead.
    pub fn send(&self, msg: &[u8]) -> Result<bool, QueueError> {
        if msg.len() > self.msg_size {
            return Err(QueueError::MessageTooLong {
                name: self.name.clone(),
                len: msg.len(),
                max: self.msg_size,
            });
        }
        match mqueue::mq_send(self.mqd, msg, 1) {
            Ok(()) => Ok(true),
            Err(err) if !self.blocking && err.as_errno() == Some(Errno::EAGAIN) => Ok(false),
            Err(source) => Err(QueueError::Send { name: self.name.clone(), source }),
        }
    }

    pub fn send_str(&self, msg: &str) -> Result<bool, QueueError> {
        self.send(msg.as_bytes())
    }

    /// Receive one message. Returns `None` when the queue is empty and this
    /// handle is non-blocking; a blocking handle suspends instead.
    pub fn recv(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let mut buf = vec![0u8; self.msg_size.max(1)];
        let mut priority = 0u32;
        match mqueue::mq_receive(self.mqd, &mut buf, &mut priority) {
            Ok(len) => {
                buf.truncate(len);
                Ok(Some(buf))
            }
            Err(err) if !self.blocking && err.as_errno() == Some(Errno::EAGAIN) => Ok(None),
            Err(source) => Err(QueueError::Receive { name: self.name.clone(), source }),
        }
    }

    pub fn recv_str(&self) -> Result<Option<String>, QueueError> {
        Ok(self.recv()?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Switch between blocking and non-blocking by closing and reopening
    /// under the same name; queued messages survive the switch.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<(), QueueError> {
        if self.blocking == blocking {
            return Ok(());
        }
        debug!(queue = %self.name, blocking, "switching queue mode");
        mqueue::mq_close(self.mqd)
            .map_err(|source| QueueError::Close { name: self.name.clone(), source })?;
        self.open = false;
        self.mqd =
            Self::open_descriptor(&self.cname, &self.name, self.msg_size, self.capacity, blocking)?;
        self.open = true;
        self.blocking = blocking;
        Ok(())
    }

    /// Close this handle, leaving the named queue in the system.
    pub fn close(mut self) -> Result<(), QueueError> {
        self.close_descriptor()
    }

    /// Close this handle and unlink the name, destroying the queue once the
    /// last handle elsewhere goes away.
    pub fn remove(mut self) -> Result<(), QueueError> {
        self.close_descriptor()?;
        mqueue::mq_unlink(&self.cname)
            .map_err(|source| QueueError::Unlink { name: self.name.clone(), source })
    }

    fn close_descriptor(&mut self) -> Result<(), QueueError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        mqueue::mq_close(self.mqd)
            .map_err(|source| QueueError::Close { name: self.name.clone(), source })
    }

    /// Unlink a queue by name without opening it. A queue that does not
    /// exist is not an error.
    pub fn unlink(name: &str) -> Result<(), QueueError> {
        let cname = CString::new(name)
            .map_err(|_| QueueError::InvalidName { name: name.to_string() })?;
        match mqueue::mq_unlink(&cname) {
            Ok(()) => Ok(()),
            Err(err) if err.as_errno() == Some(Errno::ENOENT) => Ok(()),
            Err(source) => Err(QueueError::Unlink { name: name.to_string(), source }),
        }
    }
}

impl Drop for MsgQueue {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = mqueue::mq_close(self.mqd) {
                debug!(queue = %self.name, %err, "failed to close queue on drop");
            }
        }
    }
}
