use clap::Parser;
use dirward::cli::{Cli, run};
use dirward::logging::init_logging;
use dirward::output::OutputFormatter;
use std::process;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        OutputFormatter::error(&e);
        process::exit(1);
    }
}
