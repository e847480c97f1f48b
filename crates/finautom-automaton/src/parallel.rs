//! Hybrid acceptance: the sequential recursion of [`accepts_sync`], except
//! that a branching node may fan its non-primary successors out across
//! worker processes once the evaluation has visited enough frames.
//!
//! Two counters drive the decision at every node with at least two
//! successors:
//!
//! - `workload` — frames visited since the last fan-out; reset to zero for
//!   each spawned branch. Below [`EvalLimits::workload_limit`] the node
//!   stays sequential, so cheap subtrees never pay process overhead.
//! - `fork_depth` — fan-outs between the top-level worker and this frame.
//!   At [`EvalLimits::fork_limit`] and beyond the node stays sequential,
//!   bounding the process tree.
//!
//! A fan-out spawns the worker binary once per non-primary successor,
//! shipping the automaton rerooted at that successor together with the
//! unread word suffix through a private graph pipe, and collects one `A`/`N`
//! byte per child through a verdict pipe. The primary successor is always
//! evaluated in-process while the children run. Spawn failures degrade the
//! affected branch to in-process evaluation; spawned children are reaped on
//! every path.
//!
//! [`accepts_sync`]: crate::accept::accepts_sync

use std::path::PathBuf;
use std::process::Child;

use finautom_core::limits::{
    FORK_LIMIT, GRAPH_PIPE_CAPACITY, VERDICT_PIPE_CAPACITY, WORKLOAD_LIMIT,
};
use finautom_ipc::pipe::{MsgPipe, PipeError, PipeId};
use finautom_ipc::process::{self, ChildSet, ProcessError};
use thiserror::Error;
use tracing::warn;

use crate::accept::letter_indices;
use crate::graph::{StateId, TransitionGraph};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Knobs for the sequential-versus-spawn decision.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// Frames a subtree must have visited before a node may fan out.
    pub workload_limit: u32,
    /// Fan-out depth at which everything below stays sequential.
    pub fork_limit: u32,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self { workload_limit: WORKLOAD_LIMIT, fork_limit: FORK_LIMIT }
    }
}

/// What a hybrid evaluation needs to know about spawning branch workers.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Binary spawned for branch subtasks; normally the running worker
    /// itself.
    pub worker_bin: PathBuf,
    /// Propagate `-v` to branch workers.
    pub verbose: bool,
    /// Fan-outs already traversed above this evaluation.
    pub fork_depth: u32,
    pub limits: EvalLimits,
}

/// Decide whether the automaton accepts `word`, fanning expensive branching
/// nodes out across worker processes. Semantically identical to
/// [`accepts_sync`]; only the resource usage differs.
///
/// [`accepts_sync`]: crate::accept::accepts_sync
pub fn accepts_parallel(
    graph: &TransitionGraph,
    word: &str,
    ctx: &WorkerContext,
) -> Result<bool, EvalError> {
    let mut evaluator =
        Evaluator { graph, word, letters: letter_indices(graph, word), ctx, workload: 0 };
    evaluator.eval(graph.initial_state(), 0, ctx.fork_depth)
}

struct Evaluator<'a> {
    graph: &'a TransitionGraph,
    word: &'a str,
    letters: Vec<Option<usize>>,
    ctx: &'a WorkerContext,
    workload: u32,
}

struct SpawnedBranch {
    child: Child,
    graph_pipe: MsgPipe,
    verdict_pipe: MsgPipe,
}

impl Evaluator<'_> {
    fn eval(&mut self, state: StateId, pos: usize, fork_depth: u32) -> Result<bool, EvalError> {
        self.workload += 1;
        if pos == self.letters.len() {
            return Ok(self.graph.is_accepting(state));
        }
        let successors: Vec<StateId> = match self.letters[pos] {
            Some(letter) => self.graph.successors(state, letter).to_vec(),
            None => Vec::new(),
        };
        let fan_out = successors.len() >= 2
            && self.workload >= self.ctx.limits.workload_limit
            && fork_depth < self.ctx.limits.fork_limit;
        if fan_out {
            self.eval_spawning(state, &successors, pos, fork_depth)
        } else {
            self.eval_sequential(state, &successors, pos, fork_depth)
        }
    }

    /// Sequential arm. Still part of the hybrid recursion: the workload
    /// keeps accumulating, so a deeper node may fan out later.
    fn eval_sequential(
        &mut self,
        state: StateId,
        successors: &[StateId],
        pos: usize,
        fork_depth: u32,
    ) -> Result<bool, EvalError> {
        let universal = self.graph.is_universal(state);
        for &next in successors {
            let value = self.eval(next, pos + 1, fork_depth)?;
            if value != universal {
                return Ok(value);
            }
        }
        Ok(universal)
    }

    fn eval_spawning(
        &mut self,
        state: StateId,
        successors: &[StateId],
        pos: usize,
        fork_depth: u32,
    ) -> Result<bool, EvalError> {
        let universal = self.graph.is_universal(state);
        let child_depth = fork_depth + successors.len() as u32 - 1;
        let mut children = ChildSet::new();
        let mut verdict_pipes = Vec::new();
        let outcome = self.collect_branches(
            universal,
            successors,
            pos,
            child_depth,
            &mut children,
            &mut verdict_pipes,
        );
        if outcome.is_err() {
            // the error path must not strand children
            if let Err(reap_err) = children.wait_all() {
                warn!(%reap_err, "branch worker failed while unwinding");
            }
        }
        outcome
    }

    fn collect_branches(
        &mut self,
        universal: bool,
        successors: &[StateId],
        pos: usize,
        child_depth: u32,
        children: &mut ChildSet,
        verdict_pipes: &mut Vec<MsgPipe>,
    ) -> Result<bool, EvalError> {
        for &branch in &successors[1..] {
            match self.spawn_branch(pos + 1, child_depth) {
                Ok(spawned) => {
                    let SpawnedBranch { child, mut graph_pipe, mut verdict_pipe } = spawned;
                    children.adopt(child);
                    graph_pipe.close_read()?;
                    graph_pipe.write_str(&self.graph.to_text_from(branch))?;
                    verdict_pipe.close_write()?;
                    verdict_pipes.push(verdict_pipe);
                    // graph_pipe drops here, closing the write end
                }
                Err(err) => {
                    warn!(%err, "branch worker spawn failed; evaluating branch in-process");
                    let value = self.eval_fresh(branch, pos + 1, child_depth)?;
                    if value != universal {
                        children.wait_all()?;
                        return Ok(value);
                    }
                }
            }
        }

        // the primary successor always runs in this process
        let own = self.eval(successors[0], pos + 1, child_depth)?;
        children.wait_all()?;
        if own != universal {
            return Ok(own);
        }
        for pipe in verdict_pipes.iter_mut() {
            let value = pipe.read_msg()?.as_slice() == b"A";
            if value != universal {
                return Ok(value);
            }
        }
        Ok(universal)
    }

    /// Evaluate a branch the way its worker would have: with a fresh
    /// workload window. The surrounding evaluation's counter is untouched.
    fn eval_fresh(&mut self, state: StateId, pos: usize, fork_depth: u32) -> Result<bool, EvalError> {
        let saved = std::mem::replace(&mut self.workload, 0);
        let value = self.eval(state, pos, fork_depth);
        self.workload = saved;
        value
    }

    /// Create the two pipes and spawn one branch worker. The subtask itself
    /// travels afterwards, as the rerooted graph written into the graph
    /// pipe; the word suffix rides in argv.
    fn spawn_branch(&self, pos: usize, fork_depth: u32) -> Result<SpawnedBranch, EvalError> {
        let graph_pipe = MsgPipe::open(PipeId::create(GRAPH_PIPE_CAPACITY)?);
        let verdict_pipe = MsgPipe::open(PipeId::create(VERDICT_PIPE_CAPACITY)?);
        let suffix: String = self.word.chars().skip(pos).collect();
        let mut args = vec![
            graph_pipe.id().to_string(),
            suffix,
            "--fork-depth".to_string(),
            fork_depth.to_string(),
            "--verdict-pipe".to_string(),
            verdict_pipe.id().to_string(),
        ];
        if self.ctx.verbose {
            args.push("-v".to_string());
        }
        let child = process::spawn(&self.ctx.worker_bin, &args)?;
        Ok(SpawnedBranch { child, graph_pipe, verdict_pipe })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accept::accepts_sync;
    use crate::graph::tests::arb_graph;
    use proptest::prelude::*;

    fn graph(text: &str) -> TransitionGraph {
        TransitionGraph::from_text(text).unwrap()
    }

    /// A context that never fans out: every node takes the sequential arm.
    fn sequential_ctx() -> WorkerContext {
        WorkerContext {
            worker_bin: PathBuf::from("/nonexistent/finautom-run"),
            verbose: false,
            fork_depth: 0,
            limits: EvalLimits { workload_limit: u32::MAX, fork_limit: 0 },
        }
    }

    /// A context that tries to fan out at every branching node but whose
    /// worker binary does not exist, forcing the in-process fallback for
    /// every branch.
    fn fallback_ctx() -> WorkerContext {
        WorkerContext {
            worker_bin: PathBuf::from("/nonexistent/finautom-run"),
            verbose: false,
            fork_depth: 0,
            limits: EvalLimits { workload_limit: 0, fork_limit: u32::MAX },
        }
    }

    #[test]
    fn sequential_arm_matches_sync_on_the_scenarios() {
        let cases = [
            ("3 1 1 1 1\n0\n0\n", vec!["", "a", "aaaa"]),
            ("4 1 2 0 1\n0\n1\n0 a 0 1\n", vec!["", "a", "aaa", "b"]),
            ("3 1 2 2 0\n0\n\n", vec!["", "a"]),
            ("4 1 2 2 2\n0\n0 1\n0 a 0 1\n", vec!["a"]),
            ("4 1 2 2 1\n0\n0\n0 a 0 1\n", vec!["a"]),
        ];
        let ctx = sequential_ctx();
        for (text, words) in cases {
            let g = graph(text);
            for word in words {
                assert_eq!(
                    accepts_parallel(&g, word, &ctx).unwrap(),
                    accepts_sync(&g, word),
                    "graph {text:?} word {word:?}",
                );
            }
        }
    }

    #[test]
    fn spawn_failure_falls_back_to_in_process_evaluation() {
        let g = graph("6 2 4 2 2\n0\n2 3\n0 a 1 2 3\n1 a 1 3\n1 b 2\n3 b 3 0\n");
        let ctx = fallback_ctx();
        for word in ["", "a", "ab", "aa", "aab", "abab", "bb", "aaaab"] {
            assert_eq!(
                accepts_parallel(&g, word, &ctx).unwrap(),
                accepts_sync(&g, word),
                "word {word:?}",
            );
        }
    }

    #[test]
    fn fallback_handles_duplicate_successors() {
        let g = graph("4 1 2 1 1\n0\n1\n0 a 1 1 1\n1 a 1\n");
        let ctx = fallback_ctx();
        for word in ["a", "aa", "aaa"] {
            assert_eq!(accepts_parallel(&g, word, &ctx).unwrap(), accepts_sync(&g, word));
        }
    }

    #[test]
    fn fork_depth_at_the_limit_stays_sequential() {
        let g = graph("4 1 2 0 1\n0\n1\n0 a 0 1\n");
        // fork_depth equal to the limit: never spawns, still correct
        let ctx = WorkerContext {
            worker_bin: PathBuf::from("/nonexistent/finautom-run"),
            verbose: false,
            fork_depth: 7,
            limits: EvalLimits { workload_limit: 0, fork_limit: 7 },
        };
        for word in ["", "a", "aaa"] {
            assert_eq!(accepts_parallel(&g, word, &ctx).unwrap(), accepts_sync(&g, word));
        }
    }

    proptest! {
        #[test]
        fn fallback_agrees_with_sync_on_arbitrary_graphs(
            g in arb_graph(),
            word in "[abc]{0,6}",
        ) {
            prop_assert_eq!(
                accepts_parallel(&g, &word, &fallback_ctx()).unwrap(),
                accepts_sync(&g, &word),
            );
        }
    }
}
