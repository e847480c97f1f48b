//! The tester client: submits words, correlates answers, reports totals.
//!
//! Every loop iteration interleaves two non-blocking checks: one line of
//! input (pumped through a reader thread so polling never blocks) and one
//! attempt on the private response queue. Answers may come back in any
//! order; the pending table keyed by local id restores the correlation.

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use finautom_core::limits::{
    tester_queue_name, QUEUE_CAPACITY, QUEUE_MSG_SIZE, REGISTER_QUEUE, REPORT_QUEUE,
};
use finautom_core::protocol::{TesterReply, TesterRequest};
use finautom_ipc::queue::{MsgQueue, QueueError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TesterError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Final tallies, also printed as the report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TesterStats {
    /// Queries sent.
    pub sent: u64,
    /// Answers received.
    pub received: u64,
    /// Accepted words among the answers.
    pub accepted: u64,
}

/// Pump stdin lines into a channel so the main loop can poll input without
/// blocking. Dropping the sender signals end of input.
pub fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

/// Run the tester loop against the well-known server queues: read words
/// from `lines`, submit each, print one `word A|N` line per answer and the
/// final report to `out`.
///
/// The word `!` asks the whole system to shut down and stops input reading.
/// The loop ends when input is exhausted and nothing is pending, or
/// immediately when the server announces its own shutdown.
pub fn run_tester(
    pid: i32,
    lines: &Receiver<String>,
    out: &mut impl io::Write,
) -> Result<TesterStats, TesterError> {
    let queue_name = tester_queue_name(pid);

    let register = MsgQueue::open(REGISTER_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
    let announce =
        TesterRequest::Register { tester_pid: pid, queue_name: queue_name.clone() };
    register.send_str(&announce.to_string())?;
    register.close()?;

    let report = MsgQueue::open(REPORT_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
    let answers = MsgQueue::open_nonblocking(&queue_name, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;

    // stdout carries only verdict lines and the final report; the pid is
    // diagnostic and goes to stderr with the rest of the logs
    info!(pid, queue_name, "tester is up");

    let mut pending: HashMap<u32, String> = HashMap::new();
    let mut stats = TesterStats::default();
    let mut next_local_id: u32 = 0;
    let mut reading_input = true;
    let mut server_exited = false;

    while !server_exited && (reading_input || !pending.is_empty()) {
        let mut progressed = false;

        if reading_input {
            match lines.try_recv() {
                Ok(word) => {
                    progressed = true;
                    if word == "!" {
                        warn!("sent the termination request");
                        report.send_str(&TesterRequest::Exit.to_string())?;
                        reading_input = false;
                    } else {
                        next_local_id += 1;
                        debug!(local_id = next_local_id, word, "submitting word");
                        let request = TesterRequest::Parse {
                            tester_pid: pid,
                            queue_name: queue_name.clone(),
                            local_id: next_local_id,
                            word: word.clone(),
                        };
                        report.send_str(&request.to_string())?;
                        pending.insert(next_local_id, word);
                        stats.sent += 1;
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    info!("input exhausted; waiting for the remaining answers");
                    reading_input = false;
                    progressed = true;
                }
            }
        }

        if let Some(raw) = answers.recv_str()? {
            progressed = true;
            match raw.parse::<TesterReply>() {
                Ok(TesterReply::Answer { local_id, verdict }) => match pending.remove(&local_id) {
                    Some(word) => {
                        writeln!(out, "{} {}", word, verdict.letter())?;
                        out.flush()?;
                        stats.received += 1;
                        if verdict.accepted() {
                            stats.accepted += 1;
                        }
                        debug!(local_id, word, verdict = %verdict.letter(), "answer received");
                    }
                    None => warn!(local_id, "answer for an unknown request; dropped"),
                },
                Ok(TesterReply::Exit) => {
                    warn!("server is shutting down; abandoning unanswered requests");
                    server_exited = true;
                }
                Err(err) => warn!(%err, "invalid server reply"),
            }
        }

        if !progressed {
            thread::sleep(Duration::from_millis(1));
        }
    }

    writeln!(out, "Snt: {}", stats.sent)?;
    writeln!(out, "Rcd: {}", stats.received)?;
    writeln!(out, "Acc: {}", stats.accepted)?;
    out.flush()?;

    report.close()?;
    answers.remove()?;
    info!("terminate");
    Ok(stats)
}
