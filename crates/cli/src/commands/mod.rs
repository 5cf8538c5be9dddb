mod export;
mod health;
mod lifecycle;
mod resolve;

use std::process::ExitCode;
use std::time::Instant;

use serde_json::Value;
use snapview::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::cli::{Cli, Commands};
use crate::context::CommandContext;
use crate::output::{OutputFormat, ResultBuilder, print_result};

/// What a command handed back to [`dispatch`].
pub enum Outcome {
	/// Payload for the success envelope.
	Data(Value),
	/// The command already printed its envelope (long-running commands).
	Reported,
}

/// Prints result envelopes for one command invocation.
pub struct Reporter {
	command: &'static str,
	format: OutputFormat,
	started: Instant,
}

impl Reporter {
	pub fn new(command: &'static str, format: OutputFormat) -> Self {
		Self {
			command,
			format,
			started: Instant::now(),
		}
	}

	pub fn success(&self, data: Value) {
		let result = ResultBuilder::new(self.command).started_at(self.started).data(data).build();
		print_result(&result, self.format);
	}

	pub fn failure(&self, err: &snapview::Error) {
		let result = ResultBuilder::<Value>::new(self.command)
			.started_at(self.started)
			.error(err.kind().code(), err.to_string())
			.build();
		print_result(&result, self.format);
	}
}

pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> ExitCode {
	let reporter = Reporter::new(cli.command.name(), cli.format);

	let outcome = match CommandContext::from_args(&cli.connection) {
		Ok(ctx) => {
			let outcome = run(&ctx, cli.command, &reporter, &cancel).await;
			ctx.session.disconnect().await;
			outcome
		}
		Err(err) => Err(err),
	};

	match outcome {
		Ok(Outcome::Data(data)) => {
			reporter.success(data);
			ExitCode::SUCCESS
		}
		Ok(Outcome::Reported) => ExitCode::SUCCESS,
		Err(err) => {
			error!(target = "snapview", command = reporter.command, kind = err.kind().code(), error = %err, "command failed");
			reporter.failure(&err);
			exit_code(err.kind())
		}
	}
}

async fn run(ctx: &CommandContext, command: Commands, reporter: &Reporter, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	match command {
		Commands::Resolve { vm, snapshot, ssl_option } => resolve::resolve(ctx, &vm, &snapshot, ssl_option.as_deref(), cancel).await,
		Commands::Snapshots { vm } => resolve::snapshots(ctx, &vm, cancel).await,
		Commands::Vms { name, power_state } => resolve::vms(ctx, snapview::VmFilter { name, power_state }, cancel).await,
		Commands::Vm { name, uuid } => resolve::vm(ctx, name.as_deref(), uuid.as_deref(), cancel).await,
		Commands::Export {
			vm,
			snapshot,
			disk,
			ready_timeout,
		} => export::execute(ctx, &vm, &snapshot, disk, ready_timeout, reporter, cancel).await,
		Commands::Health => health::execute(ctx, cancel).await,
		Commands::SnapshotCreate {
			vm,
			name,
			description,
			memory,
			quiesce,
		} => {
			let options = snapview::SnapshotOptions { description, memory, quiesce };
			lifecycle::snapshot_create(ctx, &vm, &name, &options, cancel).await
		}
		Commands::Clone { vm, snapshot, name } => lifecycle::clone(ctx, &vm, &snapshot, name, cancel).await,
		Commands::Delete { vm } => lifecycle::delete(ctx, &vm, cancel).await,
		Commands::CloneInspect { vm, snapshot } => lifecycle::clone_inspect(ctx, &vm, &snapshot, reporter, cancel).await,
	}
}

/// 2 for configuration problems, 130 after an interrupt, 1 otherwise.
pub fn exit_code(kind: ErrorKind) -> ExitCode {
	match kind {
		ErrorKind::Config => ExitCode::from(2),
		ErrorKind::Cancelled => ExitCode::from(130),
		_ => ExitCode::FAILURE,
	}
}
