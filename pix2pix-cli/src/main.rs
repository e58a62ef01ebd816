mod cli;
mod run;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "pix2pix=info,pix2pix_light=info";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => {
            let device = run::device(&args)?;
            run::train(&args, &device)?;
        }
        Command::Test(args) => {
            let device = run::device(&args)?;
            run::test(&args, &device)?;
        }
        Command::Export(args) => {
            let device = run::device(&args)?;
            let summary = run::export(&args, &device)?;
            println!("{}", summary.path.display());
        }
        Command::Run(args) => {
            let device = run::device(&args)?;
            tracing::info!("running {} on {:?}", args.name, device);
            run::train(&args, &device)?;
            run::test(&args, &device)?;
            run::export(&args, &device)?;
        }
    }
    Ok(())
}
