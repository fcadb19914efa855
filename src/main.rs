use clap::Parser;
use quantdesk::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    quantdesk::logging::init_tracing();
    run(Cli::parse())
}
