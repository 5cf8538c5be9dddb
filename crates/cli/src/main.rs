use std::process::ExitCode;

use clap::Parser;
use snapview_cli::cli::Cli;
use snapview_cli::{commands, logging};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose, cli.log_format)?;

	let cancel = CancellationToken::new();
	tokio::spawn({
		let cancel = cancel.clone();
		async move {
			match tokio::signal::ctrl_c().await {
				Ok(()) => {
					info!(target = "snapview", "interrupt received, cancelling");
					cancel.cancel();
				}
				Err(err) => warn!(target = "snapview", error = %err, "cannot listen for interrupts"),
			}
		}
	});

	Ok(commands::dispatch(cli, cancel).await)
}
