mod asset;
mod command;
mod job;
mod lines;
mod log;
mod metric;
mod probe;
mod process;
mod scheduler;
mod sink;
#[cfg(test)]
mod test_util;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(version, about)]
struct Command {
    #[command(subcommand)]
    action: Action,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

#[derive(clap::Subcommand)]
enum Action {
    Run(command::run::Args),
    PrintCompletions(command::print_completions::Args),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let Command { action, verbose } = Command::parse();

    env_logger::Builder::new()
        .filter_level(verbose.log_level_filter())
        .init();

    match action {
        Action::Run(args) => command::run(args).await,
        Action::PrintCompletions(args) => command::print_completions(args),
    }
}
