//! Validator server binary.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use finautom_automaton::graph::TransitionGraph;
use finautom_proc::logging;
use finautom_proc::server::{Server, ServerConfig, ServerExit};

/// Membership validation server for an alternating finite automaton.
///
/// Reads the automaton description from standard input, then serves words
/// submitted by tester processes, spawning one `run` worker per query. The
/// report is printed to standard output on shutdown.
#[derive(Parser, Debug)]
#[command(name = "validator", version)]
struct Cli {
    /// Verbose logging (to stderr).
    #[arg(short, long)]
    verbose: bool,

    /// Shut down with a failure status if any worker crashes.
    #[arg(long)]
    strict: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut graph_text = String::new();
    std::io::stdin()
        .read_to_string(&mut graph_text)
        .context("failed to read the automaton from stdin")?;
    let graph =
        TransitionGraph::from_text(&graph_text).context("malformed automaton description")?;
    tracing::info!(
        states = graph.state_count(),
        alphabet = graph.alphabet_size(),
        "automaton loaded"
    );

    let mut config = ServerConfig::new(worker_binary()?);
    config.verbose = cli.verbose;
    config.strict = cli.strict;

    let server = Server::new(graph_text, config).context("failed to open the server queues")?;
    match server.run()? {
        ServerExit::Clean => Ok(ExitCode::SUCCESS),
        ServerExit::WorkerFailure => Ok(ExitCode::FAILURE),
    }
}

/// The `run` worker is installed next to the validator binary.
fn worker_binary() -> anyhow::Result<PathBuf> {
    let me = std::env::current_exe().context("cannot locate own executable")?;
    Ok(me.with_file_name("run"))
}
