//! Tester client binary.

use clap::Parser;
use finautom_proc::logging;
use finautom_proc::tester;

/// Submits words to the validator and prints one `word A|N` line per
/// answer, followed by a final report.
///
/// Reads one word per line from standard input; the word `!` asks the
/// whole system to shut down.
#[derive(Parser, Debug)]
#[command(name = "tester", version)]
struct Cli {
    /// Verbose logging (to stderr).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let lines = tester::stdin_lines();
    let mut stdout = std::io::stdout();
    tester::run_tester(std::process::id() as i32, &lines, &mut stdout)?;
    Ok(())
}
