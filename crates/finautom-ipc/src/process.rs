//! Spawning and reaping the child processes a role owns.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Child, Command};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("failed to wait for child {pid}: {source}")]
    Wait { pid: i32, source: io::Error },
    #[error("child {pid} terminated abnormally ({status})")]
    ChildFailed { pid: i32, status: String },
}

/// Spawn a program with the given arguments. Standard streams and every
/// inheritable descriptor (notably pipe ids passed through argv) are shared
/// with the child.
pub fn spawn<I, S>(program: &Path, args: I) -> Result<Child, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| ProcessError::Spawn { program: program.display().to_string(), source })
}

/// Outcome of a non-blocking reap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaped {
    /// No owned child has terminated yet.
    None,
    /// One child was reaped; `ok` is true for a clean zero exit.
    One { pid: i32, ok: bool },
}

/// Owns every child a process has spawned, so that each one is eventually
/// reaped no matter which exit path the owner takes.
#[derive(Debug, Default)]
pub struct ChildSet {
    children: Vec<Child>,
}

impl ChildSet {
    pub fn new() -> Self {
        Self { children: Vec::new() }
    }

    pub fn adopt(&mut self, child: Child) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Block until every owned child has terminated. All children are
    /// reaped even on failure; the first abnormal termination is reported.
    pub fn wait_all(&mut self) -> Result<(), ProcessError> {
        let mut first_failure = None;
        for mut child in self.children.drain(..) {
            let pid = child.id() as i32;
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    first_failure
                        .get_or_insert(ProcessError::ChildFailed { pid, status: status.to_string() });
                }
                Err(source) => {
                    first_failure.get_or_insert(ProcessError::Wait { pid, source });
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Reap at most one terminated child without blocking.
    pub fn try_reap(&mut self) -> Result<Reaped, ProcessError> {
        for index in 0..self.children.len() {
            let pid = self.children[index].id() as i32;
            match self.children[index].try_wait() {
                Ok(Some(status)) => {
                    self.children.swap_remove(index);
                    return Ok(Reaped::One { pid, ok: status.success() });
                }
                Ok(None) => {}
                Err(source) => return Err(ProcessError::Wait { pid, source }),
            }
        }
        Ok(Reaped::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bin(name: &str) -> PathBuf {
        // Debian puts these in /bin, most other distributions in /usr/bin.
        let usr = PathBuf::from("/usr/bin").join(name);
        if usr.exists() {
            usr
        } else {
            PathBuf::from("/bin").join(name)
        }
    }

    #[test]
    fn clean_children_wait_ok() {
        let mut children = ChildSet::new();
        children.adopt(spawn(&bin("true"), std::iter::empty::<&str>()).unwrap());
        children.adopt(spawn(&bin("true"), std::iter::empty::<&str>()).unwrap());
        children.wait_all().unwrap();
        assert!(children.is_empty());
    }

    #[test]
    fn failing_child_is_reported_but_still_reaped() {
        let mut children = ChildSet::new();
        children.adopt(spawn(&bin("false"), std::iter::empty::<&str>()).unwrap());
        let err = children.wait_all().unwrap_err();
        assert!(matches!(err, ProcessError::ChildFailed { .. }));
        assert!(children.is_empty());
    }

    #[test]
    fn try_reap_does_not_block_on_a_running_child() {
        let mut children = ChildSet::new();
        children.adopt(spawn(&bin("sleep"), ["0.2"]).unwrap());
        assert_eq!(children.try_reap().unwrap(), Reaped::None);
        assert_eq!(children.len(), 1);
        children.wait_all().unwrap();
    }

    #[test]
    fn try_reap_picks_up_a_finished_child() {
        let mut children = ChildSet::new();
        let child = spawn(&bin("true"), std::iter::empty::<&str>()).unwrap();
        let pid = child.id() as i32;
        children.adopt(child);
        loop {
            match children.try_reap().unwrap() {
                Reaped::One { pid: reaped, ok } => {
                    assert_eq!(reaped, pid);
                    assert!(ok);
                    break;
                }
                Reaped::None => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
        assert!(children.is_empty());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = spawn(Path::new("/nonexistent/finautom-worker"), ["x"]).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
