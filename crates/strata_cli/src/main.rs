//! strata CLI

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::Parser;
use color_eyre::Result;
use strata_cli::{init_logging, run, Cli};

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(&cli)?;

    let stdout = std::io::stdout();
    run(&cli, &mut stdout.lock())
}
