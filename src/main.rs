use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use usb_reset::cli::Cli;
use usb_reset::config::Config;
use usb_reset::passthrough::{self, Request};
use usb_reset::system::Host;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = match <Cli as clap::Parser>::try_parse() {
        Ok(cli) => cli,
        // Usage errors are reported like every other failure, with exit code 1.
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config_file.as_deref())?;
    let req = Request::from_cli(cli)?;
    let host = Host::new(&config.mount_program);
    passthrough::run(&host, &config, &req)
}
