//! # finautom-proc — the three process roles
//!
//! One crate, three binaries:
//!
//! - `validator` — long-lived server ([`server`]): loads the automaton once
//!   from stdin, admits queries from testers, spawns one `run` worker per
//!   query, routes verdicts back, throttles, and reports on shutdown.
//! - `tester` — client ([`tester`]): submits words read from stdin,
//!   correlates answers by local id, prints verdicts and a final report.
//! - `run` — short-lived worker ([`runner`]): receives the automaton over a
//!   byte pipe, decides one word (possibly spawning further workers), and
//!   reports the verdict.

pub mod logging;
pub mod runner;
pub mod server;
pub mod sessions;
pub mod tester;
