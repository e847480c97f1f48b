//! The `run` worker: adopt the graph pipe, decide one word, report.
//!
//! A worker comes in two flavors distinguished by how it reports:
//!
//! - spawned by the validator: the verdict goes onto the shared run-output
//!   queue as a `run-terminate` message;
//! - spawned by another worker for one branch of a fan-out: the verdict is
//!   a single `A`/`N` byte written to the parent's verdict pipe.
//!
//! Either way the automaton arrives as one framed message on the graph
//! pipe whose stringified id was passed in argv.

use std::env;
use std::process;

use finautom_automaton::graph::{GraphError, TransitionGraph};
use finautom_automaton::parallel::{accepts_parallel, EvalError, EvalLimits, WorkerContext};
use finautom_core::limits::{QUEUE_CAPACITY, QUEUE_MSG_SIZE, RUN_OUTPUT_QUEUE};
use finautom_core::protocol::WorkerReport;
use finautom_core::Verdict;
use finautom_ipc::pipe::{MsgPipe, PipeError, PipeId};
use finautom_ipc::queue::{MsgQueue, QueueError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("received an unusable graph description: {0}")]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("cannot locate own executable: {0}")]
    SelfPath(#[from] std::io::Error),
}

/// Everything argv tells a worker.
#[derive(Debug)]
pub struct RunnerTask {
    /// Stringified id of the pipe carrying the automaton description.
    pub graph_pipe: String,
    /// The word to decide; possibly empty.
    pub word: String,
    pub verbose: bool,
    /// Fan-outs above this worker; zero for a validator-spawned one.
    pub fork_depth: u32,
    /// Present for a branch worker: report here instead of the run-output
    /// queue.
    pub verdict_pipe: Option<String>,
}

/// Decide the task's word and report the verdict.
pub fn run_worker(task: &RunnerTask) -> Result<Verdict, RunnerError> {
    terminate_with_parent();

    let graph_id: PipeId = task.graph_pipe.parse()?;
    let mut graph_pipe = MsgPipe::open(graph_id);
    graph_pipe.close_write()?;
    let description = graph_pipe.read_string()?;
    drop(graph_pipe);
    debug!(bytes = description.len(), "received graph description");

    let graph = TransitionGraph::from_text(&description)?;
    trace!("{}", graph.render());
    info!(word = %task.word, "ready");

    let ctx = WorkerContext {
        worker_bin: env::current_exe()?,
        verbose: task.verbose,
        fork_depth: task.fork_depth,
        limits: EvalLimits::default(),
    };
    let verdict = Verdict::from_accepted(accepts_parallel(&graph, &task.word, &ctx)?);
    info!(word = %task.word, verdict = %verdict.letter(), "decided");

    match &task.verdict_pipe {
        Some(id) => {
            let verdict_id: PipeId = id.parse()?;
            let mut pipe = MsgPipe::open(verdict_id);
            pipe.close_read()?;
            pipe.write_msg(&[verdict.letter() as u8])?;
        }
        None => {
            let queue = MsgQueue::open(RUN_OUTPUT_QUEUE, QUEUE_MSG_SIZE, QUEUE_CAPACITY)?;
            let report = WorkerReport { worker_pid: process::id() as i32, verdict };
            queue.send_str(&report.to_string())?;
            queue.close()?;
        }
    }
    Ok(verdict)
}

/// Ask the kernel to SIGTERM this worker if its parent dies, so an
/// unexpected validator death cannot strand a tree of runners.
fn terminate_with_parent() {
    // SAFETY: PR_SET_PDEATHSIG only installs a signal disposition for this
    // process; no pointers are passed.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc != 0 {
        warn!("failed to install the parent-death signal");
    }
}
