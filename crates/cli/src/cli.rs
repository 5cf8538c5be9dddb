use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "snapview")]
#[command(about = "Resolve and export VM snapshot disks from vCenter")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Log line format on stderr
	#[arg(long, global = true, value_enum, default_value = "text")]
	pub log_format: LogFormat,

	/// Result format on stdout
	#[arg(short, long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	#[command(flatten)]
	pub connection: ConnectionArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Overrides applied on top of the config file and environment.
#[derive(Args, Debug, Default, Clone)]
pub struct ConnectionArgs {
	/// Config file (defaults to ./snapview.toml, then the user config dir)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// vCenter URL, e.g. https://vcenter.example.com
	#[arg(long, global = true)]
	pub url: Option<String>,

	#[arg(long, global = true)]
	pub username: Option<String>,

	#[arg(long, global = true)]
	pub password: Option<String>,

	/// Skip TLS certificate verification
	#[arg(long, global = true)]
	pub insecure: bool,

	/// Data-center to search (required when there are several)
	#[arg(long, global = true)]
	pub datacenter: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Resolve a snapshot to its disk files and compute resource
	Resolve {
		vm: String,
		snapshot: String,
		/// Query string appended to the vpx:// URI (defaults to no_verify=1 with --insecure)
		#[arg(long)]
		ssl_option: Option<String>,
	},

	/// List the snapshot tree of a VM
	Snapshots { vm: String },

	/// List VMs of the data-center
	Vms {
		/// Case-insensitive substring of the VM name
		#[arg(long)]
		name: Option<String>,
		/// Power state, e.g. poweredOn
		#[arg(long)]
		power_state: Option<String>,
	},

	/// Describe a VM found by name or BIOS UUID
	Vm {
		#[arg(required_unless_present = "uuid", conflicts_with = "uuid")]
		name: Option<String>,
		#[arg(long)]
		uuid: Option<String>,
	},

	/// Export a snapshot disk over NBD until interrupted
	Export {
		vm: String,
		snapshot: String,
		/// Index of the disk to export
		#[arg(long, default_value = "0")]
		disk: usize,
		/// Seconds to wait for the export socket
		#[arg(long)]
		ready_timeout: Option<u64>,
	},

	/// Check the vCenter session, reconnecting if it went stale
	Health,

	/// Create a snapshot
	SnapshotCreate {
		vm: String,
		name: String,
		#[arg(long)]
		description: Option<String>,
		/// Include guest memory
		#[arg(long)]
		memory: bool,
		/// Quiesce the guest file system
		#[arg(long)]
		quiesce: bool,
	},

	/// Create a powered-off linked clone at a snapshot
	Clone {
		vm: String,
		snapshot: String,
		/// Clone name (defaults to <vm>-inspect-clone-<unix seconds>)
		#[arg(long)]
		name: Option<String>,
	},

	/// Delete a VM, powering it off first
	Delete { vm: String },

	/// Create a temporary linked clone, print its disks, delete it on interrupt
	CloneInspect { vm: String, snapshot: String },
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Resolve { .. } => "resolve",
			Commands::Snapshots { .. } => "snapshots",
			Commands::Vms { .. } => "vms",
			Commands::Vm { .. } => "vm",
			Commands::Export { .. } => "export",
			Commands::Health => "health",
			Commands::SnapshotCreate { .. } => "snapshot-create",
			Commands::Clone { .. } => "clone",
			Commands::Delete { .. } => "delete",
			Commands::CloneInspect { .. } => "clone-inspect",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_export_with_global_flags() {
		let cli = Cli::try_parse_from([
			"snapview",
			"export",
			"web01",
			"pre-upgrade",
			"--disk",
			"1",
			"--url",
			"https://vc.example.com",
			"-vv",
		])
		.unwrap();

		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.connection.url.as_deref(), Some("https://vc.example.com"));
		match cli.command {
			Commands::Export { vm, snapshot, disk, ready_timeout } => {
				assert_eq!(vm, "web01");
				assert_eq!(snapshot, "pre-upgrade");
				assert_eq!(disk, 1);
				assert_eq!(ready_timeout, None);
			}
			other => panic!("expected export, got {other:?}"),
		}
	}

	#[test]
	fn vm_requires_name_or_uuid() {
		assert!(Cli::try_parse_from(["snapview", "vm"]).is_err());
		assert!(Cli::try_parse_from(["snapview", "vm", "web01", "--uuid", "4210"]).is_err());

		let cli = Cli::try_parse_from(["snapview", "vm", "--uuid", "4210"]).unwrap();
		assert!(matches!(cli.command, Commands::Vm { name: None, uuid: Some(_) }));
	}

	#[test]
	fn vms_filters_are_optional() {
		let cli = Cli::try_parse_from(["snapview", "vms", "--power-state", "poweredOn"]).unwrap();
		assert_eq!(cli.command.name(), "vms");
		match cli.command {
			Commands::Vms { name, power_state } => {
				assert_eq!(name, None);
				assert_eq!(power_state.as_deref(), Some("poweredOn"));
			}
			other => panic!("expected vms, got {other:?}"),
		}
	}

	#[test]
	fn kebab_case_subcommands() {
		let cli = Cli::try_parse_from(["snapview", "snapshot-create", "web01", "nightly", "--memory"]).unwrap();
		assert_eq!(cli.command.name(), "snapshot-create");
		assert_eq!(cli.format, OutputFormat::Json);
	}
}
