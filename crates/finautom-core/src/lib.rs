//! # finautom-core — shared vocabulary
//!
//! Everything the three process roles (validator, tester, run worker) must
//! agree on without linking against each other: protocol limits and
//! well-known queue names, the [`Verdict`] type, and the ASCII wire
//! protocol spoken over the queues.
//!
//! Nothing in this crate touches the operating system; transports live in
//! `finautom-ipc` and the roles themselves in `finautom-proc`.

pub mod limits;
pub mod protocol;
pub mod verdict;

pub use protocol::{ProtocolError, TesterReply, TesterRequest, WorkerReport};
pub use verdict::Verdict;
