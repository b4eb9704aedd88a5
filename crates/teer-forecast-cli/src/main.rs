use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = teer_forecast_cli::Cli::parse();
    teer_forecast_cli::run_cli(cli)
}
