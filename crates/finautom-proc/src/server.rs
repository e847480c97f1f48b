//! The validator event loop: admission of queries, worker lifecycle,
//! verdict routing, throttling, and the shutdown report.
//!
//! The loop owns three well-known queues. Under normal load the report
//! queue is blocking and acts as the admission point, while the register
//! and run-output queues are polled. Once more workers are active than
//! [`ServerConfig::process_limit`] the roles flip: run-output becomes
//! blocking (drain completions first) and the report queue is polled, which
//! keeps the worker count hovering at the limit without busy-waiting.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Child;
use std::thread;
use std::time::Duration;

use finautom_core::limits::{
    GRAPH_PIPE_CAPACITY, PROCESS_LIMIT, QUEUE_CAPACITY, QUEUE_MSG_SIZE, REGISTER_QUEUE,
    REPORT_QUEUE, RUN_OUTPUT_QUEUE, SPAWN_RETRY_COUNT,
};
use finautom_core::protocol::{TesterReply, TesterRequest, WorkerReport};
use finautom_ipc::pipe::{MsgPipe, PipeError, PipeId};
use finautom_ipc::process::{self, ChildSet, ProcessError, Reaped};
use finautom_ipc::queue::{MsgQueue, QueueError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::sessions::{SessionTable, TesterSession, WorkerSession};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("failed to write the report: {0}")]
    Io(#[from] io::Error),
}

/// Validator tuning. Defaults mirror the well-known limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The `run` worker binary.
    pub worker_bin: PathBuf,
    /// Propagate `-v` to workers.
    pub verbose: bool,
    /// Shut down with a failure status when a worker crashes, instead of
    /// carrying on without its verdict.
    pub strict: bool,
    pub process_limit: usize,
    pub spawn_retries: u32,
}

impl ServerConfig {
    pub fn new(worker_bin: PathBuf) -> Self {
        Self {
            worker_bin,
            verbose: false,
            strict: false,
            process_limit: PROCESS_LIMIT,
            spawn_retries: SPAWN_RETRY_COUNT,
        }
    }
}

/// Aggregate counters for the shutdown report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerStats {
    /// Queries received.
    pub received: u64,
    /// Answers sent.
    pub sent: u64,
    /// Accepted words among the answers sent.
    pub accepted: u64,
}

/// How a full server run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    Clean,
    /// A worker crashed and the server runs in strict mode.
    WorkerFailure,
}

/// The validator: one long-lived process owning every piece of mutable
/// server state.
pub struct Server {
    graph_text: String,
    config: ServerConfig,
    report_queue: MsgQueue,
    register_queue: MsgQueue,
    run_output_queue: MsgQueue,
    testers: SessionTable<TesterSession>,
    workers: SessionTable<WorkerSession>,
    children: ChildSet,
    active_runners: usize,
    throttled: bool,
    should_terminate: bool,
    stats: ServerStats,
}

impl Server {
    /// Open the three server-owned queues and get ready to serve.
    /// `graph_text` is the automaton description exactly as read from
    /// stdin; it is shipped verbatim into every worker.
    pub fn new(graph_text: String, config: ServerConfig) -> Result<Self, ServerError> {
        let report_queue = MsgQueue::open(REPORT_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
        let run_output_queue =
            MsgQueue::open_nonblocking(RUN_OUTPUT_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
        let register_queue =
            MsgQueue::open_nonblocking(REGISTER_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
        Ok(Self {
            graph_text,
            config,
            report_queue,
            register_queue,
            run_output_queue,
            testers: SessionTable::new(),
            workers: SessionTable::new(),
            children: ChildSet::new(),
            active_runners: 0,
            throttled: false,
            should_terminate: false,
            stats: ServerStats::default(),
        })
    }

    /// Serve until a tester requests shutdown (or a worker crashes in
    /// strict mode), print the report, release every queue and pipe, and
    /// reap whatever children are left.
    pub fn run(mut self) -> Result<ServerExit, ServerError> {
        info!("server is up");
        let exit = self.event_loop()?;
        warn!("terminating server");

        // in-flight worker sessions are abandoned; dropping them closes
        // their graph pipes
        let leftover = std::mem::take(&mut self.workers);
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "dropping sessions of workers that never reported");
        }
        drop(leftover);

        let report = render_report(
            self.stats,
            self.testers.values().map(|t| (t.tester_pid, t.received, t.accepted)).collect(),
        );
        let mut stdout = io::stdout();
        stdout.write_all(report.as_bytes())?;
        stdout.flush()?;

        let Server { report_queue, register_queue, run_output_queue, mut children, mut testers, .. } =
            self;
        for (_pid, session) in testers.drain() {
            let TesterSession { queue, .. } = session;
            if let Err(err) = queue.close() {
                warn!(%err, "failed to close a tester queue");
            }
        }
        for queue in [report_queue, register_queue, run_output_queue] {
            if let Err(err) = queue.remove() {
                warn!(%err, "failed to remove a server queue");
            }
        }
        if let Err(err) = children.wait_all() {
            warn!(%err, "a worker exited abnormally during shutdown");
        }
        info!("exit");
        Ok(exit)
    }

    fn event_loop(&mut self) -> Result<ServerExit, ServerError> {
        loop {
            self.drain_register_queue()?;
            self.adjust_throttle()?;
            let verdict_seen = self.route_one_verdict()?;

            let reaped = self.children.try_reap()?;
            if let Reaped::One { pid, ok: false } = reaped {
                if self.config.strict {
                    error!(pid, "worker crashed; strict mode shuts the server down");
                    if let Err(err) = self.children.wait_all() {
                        warn!(%err, "more workers failed while draining");
                    }
                    self.broadcast_exit();
                    return Ok(ServerExit::WorkerFailure);
                }
                warn!(pid, "worker crashed; continuing without its verdict");
                self.active_runners = self.active_runners.saturating_sub(1);
            }

            let quiesced = !verdict_seen && reaped == Reaped::None;
            if self.should_terminate
                && quiesced
                && (self.active_runners == 0 || self.workers.is_empty())
            {
                info!("all pending work drained; executing the termination request");
                self.broadcast_exit();
                return Ok(ServerExit::Clean);
            }

            if !self.should_terminate {
                self.read_one_command()?;
            } else if quiesced {
                // draining: nothing happened this iteration, so don't spin
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Start sessions for every tester that announced itself since the last
    /// iteration. Never blocks.
    fn drain_register_queue(&mut self) -> Result<(), ServerError> {
        while let Some(raw) = self.register_queue.recv_str()? {
            match raw.parse::<TesterRequest>() {
                Ok(TesterRequest::Register { tester_pid, queue_name }) => {
                    self.register_tester(tester_pid, &queue_name)?;
                }
                Ok(other) => warn!(?other, "unexpected message on the register queue"),
                Err(err) => warn!(%err, "invalid register command"),
            }
        }
        Ok(())
    }

    /// Idempotent by pid: a re-registration (or the implicit registration
    /// a `parse` performs) never resets an existing session's counters.
    fn register_tester(&mut self, tester_pid: i32, queue_name: &str) -> Result<(), ServerError> {
        if self.testers.contains(tester_pid) {
            debug!(tester_pid, "tester already registered");
            return Ok(());
        }
        let queue = MsgQueue::open(queue_name, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
        info!(tester_pid, queue_name, "registered tester");
        self.testers.insert(
            tester_pid,
            TesterSession {
                tester_pid,
                queue_name: queue_name.to_string(),
                queue,
                received: 0,
                accepted: 0,
            },
        );
        Ok(())
    }

    fn adjust_throttle(&mut self) -> Result<(), ServerError> {
        if !self.throttled && self.active_runners > self.config.process_limit {
            warn!(active = self.active_runners, "process limit exceeded; throttling admission");
            self.run_output_queue.set_blocking(true)?;
            self.report_queue.set_blocking(false)?;
            self.throttled = true;
        } else if self.throttled && self.active_runners < self.config.process_limit {
            warn!(active = self.active_runners, "below process limit; admission restored");
            self.run_output_queue.set_blocking(false)?;
            self.report_queue.set_blocking(true)?;
            self.throttled = false;
        }
        Ok(())
    }

    /// Try to read one `run-terminate` message and route the verdict to the
    /// originating tester. Returns whether a message was consumed.
    fn route_one_verdict(&mut self) -> Result<bool, ServerError> {
        let Some(raw) = self.run_output_queue.recv_str()? else {
            return Ok(false);
        };
        let report: WorkerReport = match raw.parse() {
            Ok(report) => report,
            Err(err) => {
                warn!(%err, "invalid worker report");
                return Ok(true);
            }
        };
        self.active_runners = self.active_runners.saturating_sub(1);
        debug!(worker_pid = report.worker_pid, verdict = %report.verdict.digit(), "worker finished");

        let Some(worker) = self.workers.remove(report.worker_pid) else {
            // not fatal: possibly a worker of an earlier, crashed server
            warn!(worker_pid = report.worker_pid, "verdict from an unknown worker; dropped");
            return Ok(true);
        };
        let Some(tester) = self.testers.get_mut(worker.tester_pid) else {
            warn!(tester_pid = worker.tester_pid, "no session for the verdict's tester; dropped");
            return Ok(true);
        };

        self.stats.sent += 1;
        if report.verdict.accepted() {
            self.stats.accepted += 1;
            tester.accepted += 1;
        }
        let reply = TesterReply::Answer { local_id: worker.local_id, verdict: report.verdict };
        tester.queue.send_str(&reply.to_string())?;
        info!(
            tester_pid = worker.tester_pid,
            local_id = worker.local_id,
            verdict = %report.verdict.digit(),
            "answer routed"
        );
        // dropping the session closes its graph pipe
        Ok(true)
    }

    /// Read one command from the report queue: `parse` admits a query,
    /// `exit` latches termination. The blocking read here is the server's
    /// admission point under normal load.
    fn read_one_command(&mut self) -> Result<(), ServerError> {
        let Some(raw) = self.report_queue.recv_str()? else {
            return Ok(());
        };
        match raw.parse::<TesterRequest>() {
            Ok(TesterRequest::Exit) => {
                warn!("termination requested; no new queries will be admitted");
                self.should_terminate = true;
            }
            Ok(TesterRequest::Parse { tester_pid, queue_name, local_id, word }) => {
                self.admit_query(tester_pid, &queue_name, local_id, &word)?;
            }
            Ok(TesterRequest::Register { .. }) => {
                warn!("register command on the report queue; ignored");
            }
            Err(err) => warn!(%err, "invalid server command"),
        }
        Ok(())
    }

    fn admit_query(
        &mut self,
        tester_pid: i32,
        queue_name: &str,
        local_id: u32,
        word: &str,
    ) -> Result<(), ServerError> {
        self.register_tester(tester_pid, queue_name)?;
        debug!(tester_pid, local_id, word, "received query");

        let pipe_id = PipeId::create(GRAPH_PIPE_CAPACITY)?;
        let mut graph_pipe = MsgPipe::open(pipe_id);
        let Some(child) = self.spawn_worker(&pipe_id, word)? else {
            // a dropped query never counts as received
            error!(tester_pid, local_id, word, "worker could not be spawned; query dropped");
            return Ok(()); // graph_pipe drops, closing both descriptors
        };
        let worker_pid = child.id() as i32;
        self.children.adopt(child);
        graph_pipe.close_read()?;
        graph_pipe.write_str(&self.graph_text)?;
        info!(worker_pid, tester_pid, local_id, word, "worker spawned");
        self.workers.insert(
            worker_pid,
            WorkerSession { worker_pid, tester_pid, local_id, graph_pipe },
        );
        self.active_runners += 1;
        self.stats.received += 1;
        if let Some(tester) = self.testers.get_mut(tester_pid) {
            tester.received += 1;
        }
        Ok(())
    }

    /// Spawn the worker, retrying a few times before giving up on the
    /// query. `None` means every attempt failed.
    fn spawn_worker(&self, pipe_id: &PipeId, word: &str) -> Result<Option<Child>, ServerError> {
        let mut args = vec![pipe_id.to_string(), word.to_string()];
        if self.config.verbose {
            args.push("-v".to_string());
        }
        for attempt in 0..self.config.spawn_retries {
            if attempt > 0 {
                thread::sleep(Duration::from_secs(1));
            }
            match process::spawn(&self.config.worker_bin, &args) {
                Ok(child) => return Ok(Some(child)),
                Err(err) => warn!(%err, attempt, "worker spawn failed"),
            }
        }
        Ok(None)
    }

    /// Best-effort `exit` notice to every registered tester.
    fn broadcast_exit(&mut self) {
        for session in self.testers.values() {
            if let Err(err) = session.queue.send_str(&TesterReply::Exit.to_string()) {
                warn!(tester_pid = session.tester_pid, %err, "failed to send the exit notice");
            }
        }
    }
}

/// The shutdown report: aggregate counters, then one block per tester that
/// sent at least one query, ordered by pid.
fn render_report(stats: ServerStats, mut testers: Vec<(i32, u64, u64)>) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(out, "Rcd: {}", stats.received);
    let _ = writeln!(out, "Snt: {}", stats.sent);
    let _ = writeln!(out, "Acc: {}", stats.accepted);
    testers.sort_unstable_by_key(|&(pid, _, _)| pid);
    for (pid, received, accepted) in testers {
        if received == 0 {
            continue;
        }
        let _ = writeln!(out, "PID: {pid}");
        let _ = writeln!(out, "Rcd: {received}");
        let _ = writeln!(out, "Acc: {accepted}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_totals_then_per_tester_blocks() {
        let stats = ServerStats { received: 10, sent: 10, accepted: 5 };
        let report = render_report(stats, vec![(200, 5, 2), (100, 5, 3)]);
        assert_eq!(
            report,
            "Rcd: 10\nSnt: 10\nAcc: 5\nPID: 100\nRcd: 5\nAcc: 3\nPID: 200\nRcd: 5\nAcc: 2\n"
        );
    }

    #[test]
    fn report_skips_testers_that_never_queried() {
        let stats = ServerStats { received: 1, sent: 1, accepted: 0 };
        let report = render_report(stats, vec![(7, 1, 0), (8, 0, 0)]);
        assert_eq!(report, "Rcd: 1\nSnt: 1\nAcc: 0\nPID: 7\nRcd: 1\nAcc: 0\n");
    }

    #[test]
    fn report_with_no_testers_is_just_the_totals() {
        let report = render_report(ServerStats::default(), Vec::new());
        assert_eq!(report, "Rcd: 0\nSnt: 0\nAcc: 0\n");
    }
}
