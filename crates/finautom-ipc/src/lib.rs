//! # finautom-ipc — OS transport primitives
//!
//! The three coordination mechanisms every finautom process relies on:
//!
//! - [`queue::MsgQueue`] — named, bounded, framed POSIX message queues; the
//!   long-lived channels between testers, the validator, and workers.
//! - [`pipe::MsgPipe`] — anonymous byte pipes with a stringifiable identity,
//!   used to hand one message (an automaton description, a branch verdict)
//!   between a parent and an exec'd child.
//! - [`process`] — spawn plus blocking and non-blocking reaping of the
//!   children a process owns.
//!
//! All handles close their descriptors on drop; a process that unwinds out
//! of its loop leaks neither queues nor pipe ends.

pub mod pipe;
pub mod process;
pub mod queue;

pub use pipe::{MsgPipe, PipeError, PipeId};
pub use process::{ChildSet, ProcessError, Reaped};
pub use queue::{MsgQueue, QueueError};
