//! Server-side session bookkeeping, keyed by process id.

use std::collections::HashMap;

use finautom_ipc::pipe::MsgPipe;
use finautom_ipc::queue::MsgQueue;

/// One in-flight `run` worker. Created when the worker is spawned,
/// destroyed when its verdict has been routed.
#[derive(Debug)]
pub struct WorkerSession {
    pub worker_pid: i32,
    /// Tester the verdict routes back to.
    pub tester_pid: i32,
    /// The originating tester's own id for this request.
    pub local_id: u32,
    /// Parent side of the pipe the automaton was shipped through.
    pub graph_pipe: MsgPipe,
}

/// One registered tester and its private response queue. Lives until
/// server shutdown.
#[derive(Debug)]
pub struct TesterSession {
    pub tester_pid: i32,
    pub queue_name: String,
    pub queue: MsgQueue,
    /// Queries received from this tester.
    pub received: u64,
    /// Accepted verdicts routed to this tester.
    pub accepted: u64,
}

/// Typed map from process id to session record.
#[derive(Debug)]
pub struct SessionTable<T> {
    inner: HashMap<i32, T>,
}

impl<T> SessionTable<T> {
    pub fn new() -> Self {
        Self { inner: HashMap::new() }
    }

    pub fn insert(&mut self, pid: i32, session: T) {
        self.inner.insert(pid, session);
    }

    pub fn get(&self, pid: i32) -> Option<&T> {
        self.inner.get(&pid)
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut T> {
        self.inner.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: i32) -> Option<T> {
        self.inner.remove(&pid)
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.inner.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.inner.values()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (i32, T)> + '_ {
        self.inner.drain()
    }
}

impl<T> Default for SessionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
