use std::path::PathBuf;

/// Rayflux command line interface arguments.
#[derive(clap::Parser, Debug)]
#[clap(
    author,
    version,
    about = "Radiative heat transfer in partitioned finite-volume flows."
)]
pub struct CliArgs {
    /// Raises the log verbosity once per occurrence.
    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Use verbose output (repeat for more details)"
    )]
    pub verbose: u8,

    /// Silences everything but errors.
    #[clap(short, long, help = "Only print errors", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Whether to show the timestamp in the log.
    #[clap(
        long,
        help = "Show timestamp for each log message in seconds since\nprogram starts"
    )]
    pub log_timestamp: bool,

    /// Command to execute.
    #[clap(subcommand)]
    pub command: SubCommand,
}

impl CliArgs {
    /// Log level understood by [`base::cli::log_filter_from_level`].
    pub fn log_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            2u8.saturating_add(self.verbose)
        }
    }
}

/// Rayflux command.
#[derive(clap::Subcommand, Debug)]
pub enum SubCommand {
    /// Runs a case and writes the boundary fluxes.
    Run(RunOptions),

    /// Prints the mesh, partition and solver limits of a case.
    Info(InfoOptions),
}

/// Options of the `run` command.
#[derive(clap::Args, Debug)]
pub struct RunOptions {
    /// Case file.
    #[clap(help = "Path to the case file (.toml)")]
    pub case: PathBuf,

    /// Overrides the number of ranks of the case.
    #[clap(short, long, help = "Number of ranks to split the mesh into")]
    pub ranks: Option<usize>,

    /// Overrides the output file of the case.
    #[clap(short, long, help = "CSV file receiving the boundary fluxes")]
    pub output: Option<PathBuf>,
}

/// Options of the `info` command.
#[derive(clap::Args, Debug)]
pub struct InfoOptions {
    /// Case file.
    #[clap(help = "Path to the case file (.toml)")]
    pub case: PathBuf,

    /// Overrides the number of ranks of the case.
    #[clap(short, long, help = "Number of ranks to split the mesh into")]
    pub ranks: Option<usize>,
}
