mod args;
mod case;
mod cmd_info;
mod cmd_run;

use args::{CliArgs, SubCommand};
use base::cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, launch_time) = cli::parse_args::<CliArgs>("rayflux");
    let timestamp = args.log_timestamp.then_some(launch_time);
    cli::setup_logging(timestamp, args.log_level(), &[]);

    match args.command {
        SubCommand::Run(opts) => cmd_run::run(opts)?,
        SubCommand::Info(opts) => cmd_info::print_info(opts)?,
    }
    Ok(())
}
