//! Internal worker binary spawned by the validator, and recursively by
//! other workers for fan-out branches. Not a user entry point.

use clap::Parser;
use finautom_proc::logging;
use finautom_proc::runner::{run_worker, RunnerTask};

/// Decide one word against an automaton received over a byte pipe.
///
/// This command is the internal worker of the validator server; running it
/// by hand is not useful.
#[derive(Parser, Debug)]
#[command(name = "run", version)]
struct Cli {
    /// Stringified graph pipe identifier (`p<rfd>@<wfd>[<cap>]`).
    pipe_id: String,

    /// The word to decide; may be empty.
    #[arg(default_value = "")]
    word: String,

    /// Verbose logging (to stderr).
    #[arg(short, long)]
    verbose: bool,

    /// Fan-out depth inherited from the spawning evaluator.
    #[arg(long, hide = true, default_value_t = 0)]
    fork_depth: u32,

    /// Report through this verdict pipe instead of the run-output queue.
    #[arg(long, hide = true)]
    verdict_pipe: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let task = RunnerTask {
        graph_pipe: cli.pipe_id,
        word: cli.word,
        verbose: cli.verbose,
        fork_depth: cli.fork_depth,
        verdict_pipe: cli.verdict_pipe,
    };
    run_worker(&task)?;
    Ok(())
}
