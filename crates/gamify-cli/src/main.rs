use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = gamify_cli::Cli::parse();
    gamify_cli::run_cli(cli)
}
