//! Tunables and well-known names shared by every process role.

/// Maximum number of automaton states.
pub const MAX_STATES: usize = 107;

/// Maximum alphabet size. Letters are encoded as `c - 'a'`.
pub const MAX_ALPHABET: usize = 37;

/// Maximum length in bytes of a single queue message.
pub const QUEUE_MSG_SIZE: usize = 1020;

/// Maximum number of messages a queue holds before writers block.
///
/// Kept at the unprivileged kernel default (`/proc/sys/fs/mqueue/msg_max`).
pub const QUEUE_CAPACITY: usize = 10;

/// Capacity of the byte pipe that ships an automaton description into a
/// worker; bounds the accepted description size.
pub const GRAPH_PIPE_CAPACITY: usize = 3_000_007;

/// Capacity of the byte pipe a branch worker answers through. The answer
/// is a single byte.
pub const VERDICT_PIPE_CAPACITY: usize = 5;

/// Frames an evaluation must visit since its last fork before spawning
/// branch workers is considered. Higher means fewer workers.
pub const WORKLOAD_LIMIT: u32 = 5;

/// Fork-depth ceiling: an evaluation this many forks below its top-level
/// worker stays sequential.
pub const FORK_LIMIT: u32 = 22;

/// Number of concurrent run workers above which the validator throttles
/// admission in favor of draining completions.
pub const PROCESS_LIMIT: usize = 20;

/// How many times the validator retries spawning a worker before dropping
/// the query.
pub const SPAWN_RETRY_COUNT: u32 = 3;

/// Queue carrying tester commands (`parse`, `exit`) to the validator.
pub const REPORT_QUEUE: &str = "/FinAutomReportQueue";

/// Queue carrying `register_tester` announcements to the validator.
pub const REGISTER_QUEUE: &str = "/FinAutomRegisterQueue";

/// Queue carrying `run-terminate` verdicts from workers to the validator.
pub const RUN_OUTPUT_QUEUE: &str = "/FinAutomRunOutQueue";

/// Name of the private response queue owned by the tester with the given
/// process id.
pub fn tester_queue_name(pid: i32) -> String {
    format!("/FinAutomTesterInQ{pid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tester_queue_names_are_per_pid() {
        assert_eq!(tester_queue_name(42), "/FinAutomTesterInQ42");
        assert_ne!(tester_queue_name(1), tester_queue_name(2));
    }

    #[test]
    fn well_known_names_are_absolute() {
        for name in [REPORT_QUEUE, REGISTER_QUEUE, RUN_OUTPUT_QUEUE] {
            assert!(name.starts_with('/'));
        }
        assert!(tester_queue_name(i32::MAX).starts_with('/'));
    }
}
