//! ASCII wire protocol spoken over the named queues.
//!
//! Three message families travel between the roles:
//!
//! - tester → validator: [`TesterRequest`] on the report and register queues;
//! - worker → validator: [`WorkerReport`] on the run-output queue;
//! - validator → tester: [`TesterReply`] on the tester's private queue.
//!
//! Every message is a single human-readable line with no framing of its own;
//! the queue's message boundary is the frame. `Display` produces the exact
//! wire form and `FromStr` parses it back.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::verdict::Verdict;

/// A queue message that could not be decoded. Receivers log these and drop
/// the message; a malformed line is never fatal to a loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unrecognized message {0:?}")]
    Unrecognized(String),
    #[error("malformed {kind} message {raw:?}")]
    Malformed { kind: &'static str, raw: String },
}

impl ProtocolError {
    fn malformed(kind: &'static str, raw: &str) -> Self {
        ProtocolError::Malformed { kind, raw: raw.to_string() }
    }
}

/// Commands a tester sends to the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TesterRequest {
    /// Pre-announce this tester and its response queue. Optional: the first
    /// `parse` registers implicitly.
    Register { tester_pid: i32, queue_name: String },
    /// Submit one word for a membership decision. The word is the remainder
    /// of the message and may be empty.
    Parse { tester_pid: i32, queue_name: String, local_id: u32, word: String },
    /// Ask the whole system to shut down.
    Exit,
}

impl fmt::Display for TesterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TesterRequest::Register { tester_pid, queue_name } => {
                write!(f, "register_tester: {tester_pid} {queue_name}")
            }
            TesterRequest::Parse { tester_pid, queue_name, local_id, word } => {
                write!(f, "parse: {tester_pid} {queue_name} {local_id} {word}")
            }
            TesterRequest::Exit => write!(f, "exit"),
        }
    }
}

impl FromStr for TesterRequest {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, ProtocolError> {
        if raw == "exit" {
            return Ok(TesterRequest::Exit);
        }
        if let Some(rest) = raw.strip_prefix("register_tester: ") {
            let mut fields = rest.split_whitespace();
            let (Some(pid), Some(queue_name), None) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(ProtocolError::malformed("register_tester", raw));
            };
            let tester_pid =
                pid.parse().map_err(|_| ProtocolError::malformed("register_tester", raw))?;
            return Ok(TesterRequest::Register { tester_pid, queue_name: queue_name.to_string() });
        }
        if let Some(rest) = raw.strip_prefix("parse: ") {
            let err = || ProtocolError::malformed("parse", raw);
            let mut fields = rest.splitn(4, ' ');
            let tester_pid =
                fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
            let queue_name = fields.next().ok_or_else(err)?.to_string();
            let local_id = fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
            let word = fields.next().unwrap_or("").to_string();
            return Ok(TesterRequest::Parse { tester_pid, queue_name, local_id, word });
        }
        Err(ProtocolError::Unrecognized(raw.to_string()))
    }
}

/// A worker's verdict for the query it was spawned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_pid: i32,
    pub verdict: Verdict,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-terminate: {} {}", self.worker_pid, self.verdict.digit())
    }
}

impl FromStr for WorkerReport {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, ProtocolError> {
        let rest = raw
            .strip_prefix("run-terminate: ")
            .ok_or_else(|| ProtocolError::Unrecognized(raw.to_string()))?;
        let err = || ProtocolError::malformed("run-terminate", raw);
        let mut fields = rest.split_whitespace();
        let (Some(pid), Some(digit), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(err());
        };
        Ok(WorkerReport {
            worker_pid: pid.parse().map_err(|_| err())?,
            verdict: Verdict::from_digit(digit).ok_or_else(err)?,
        })
    }
}

/// Messages the validator routes to a tester's private queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TesterReply {
    /// The verdict for the request the tester labeled `local_id`.
    Answer { local_id: u32, verdict: Verdict },
    /// The validator is shutting down; no further answers will arrive.
    Exit,
}

impl fmt::Display for TesterReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TesterReply::Answer { local_id, verdict } => {
                write!(f, "{local_id} answer: {}", verdict.digit())
            }
            TesterReply::Exit => write!(f, "exit"),
        }
    }
}

impl FromStr for TesterReply {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, ProtocolError> {
        if raw == "exit" {
            return Ok(TesterReply::Exit);
        }
        let err = || ProtocolError::malformed("answer", raw);
        let mut fields = raw.split_whitespace();
        let (Some(id), Some(keyword), Some(digit), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(ProtocolError::Unrecognized(raw.to_string()));
        };
        if keyword != "answer:" {
            return Err(ProtocolError::Unrecognized(raw.to_string()));
        }
        Ok(TesterReply::Answer {
            local_id: id.parse().map_err(|_| err())?,
            verdict: Verdict::from_digit(digit).ok_or_else(err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn register_round_trip() {
        let msg = TesterRequest::Register {
            tester_pid: 4211,
            queue_name: "/FinAutomTesterInQ4211".to_string(),
        };
        let wire = msg.to_string();
        assert_eq!(wire, "register_tester: 4211 /FinAutomTesterInQ4211");
        assert_eq!(wire.parse::<TesterRequest>().unwrap(), msg);
    }

    #[test]
    fn parse_round_trip_including_empty_word() {
        for word in ["abba", ""] {
            let msg = TesterRequest::Parse {
                tester_pid: 77,
                queue_name: "/FinAutomTesterInQ77".to_string(),
                local_id: 9,
                word: word.to_string(),
            };
            assert_eq!(msg.to_string().parse::<TesterRequest>().unwrap(), msg);
        }
    }

    #[test]
    fn exit_is_shared_by_both_directions() {
        assert_eq!("exit".parse::<TesterRequest>().unwrap(), TesterRequest::Exit);
        assert_eq!("exit".parse::<TesterReply>().unwrap(), TesterReply::Exit);
        assert_eq!(TesterRequest::Exit.to_string(), "exit");
        assert_eq!(TesterReply::Exit.to_string(), "exit");
    }

    #[test]
    fn worker_report_round_trip() {
        let msg = WorkerReport { worker_pid: 31337, verdict: Verdict::Accept };
        assert_eq!(msg.to_string(), "run-terminate: 31337 1");
        assert_eq!(msg.to_string().parse::<WorkerReport>().unwrap(), msg);
    }

    #[test]
    fn answer_round_trip() {
        let msg = TesterReply::Answer { local_id: 3, verdict: Verdict::Reject };
        assert_eq!(msg.to_string(), "3 answer: 0");
        assert_eq!(msg.to_string().parse::<TesterReply>().unwrap(), msg);
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!("register_tester: x /q".parse::<TesterRequest>().is_err());
        assert!("parse: 1 /q".parse::<TesterRequest>().is_err());
        assert!("parse 1 /q 1 w".parse::<TesterRequest>().is_err());
        assert!("run-terminate: 1 2".parse::<WorkerReport>().is_err());
        assert!("run-terminate: one 1".parse::<WorkerReport>().is_err());
        assert!("3 answer 1".parse::<TesterReply>().is_err());
        assert!("three answer: 1".parse::<TesterReply>().is_err());
        assert!("".parse::<TesterRequest>().is_err());
    }

    proptest! {
        #[test]
        fn parse_survives_any_word(
            pid in 1i32..100_000,
            local_id in 0u32..1_000_000,
            word in "[a-z]{0,40}",
        ) {
            let msg = TesterRequest::Parse {
                tester_pid: pid,
                queue_name: format!("/FinAutomTesterInQ{pid}"),
                local_id,
                word,
            };
            prop_assert_eq!(msg.to_string().parse::<TesterRequest>().unwrap(), msg);
        }
    }
}
