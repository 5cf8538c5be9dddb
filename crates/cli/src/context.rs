//! Configuration layering and service construction for one invocation.

use std::sync::Arc;

use snapview::{Config, DiskResolver, SessionManager, SnapshotExporter, VmLifecycle};
use tracing::debug;

use crate::cli::ConnectionArgs;

/// Everything a command needs; the session is shared by the services.
pub struct CommandContext {
	pub config: Config,
	pub session: Arc<SessionManager>,
}

impl CommandContext {
	/// File, then `SNAPVIEW_*` environment, then flags, then validation.
	pub fn from_args(args: &ConnectionArgs) -> snapview::Result<Self> {
		let mut config = Config::discover(args.config.as_deref())?;
		config.apply_process_env();
		apply_flags(&mut config, args);
		config.validate()?;
		debug!(
			target = "snapview.config",
			url = %config.vcenter.url,
			username = %config.vcenter.username,
			datacenter = ?config.vcenter.datacenter,
			"effective configuration"
		);

		let session = Arc::new(SessionManager::vim(config.vcenter.clone())?);
		Ok(Self { config, session })
	}

	pub fn resolver(&self) -> DiskResolver {
		DiskResolver::new(Arc::clone(&self.session))
	}

	pub fn lifecycle(&self) -> VmLifecycle {
		VmLifecycle::new(Arc::clone(&self.session))
	}

	/// Exporter from the `[export]` settings, with an optional readiness
	/// timeout override in seconds.
	pub fn exporter(&self, ready_timeout: Option<u64>) -> SnapshotExporter {
		let mut config = self.config.export.clone();
		if let Some(secs) = ready_timeout {
			config.ready_timeout_secs = secs;
		}
		SnapshotExporter::new(Arc::clone(&self.session), config)
	}

	/// `no_verify=1` for insecure connections, nothing otherwise.
	pub fn default_ssl_option(&self) -> &'static str {
		if self.config.vcenter.insecure_skip_verify { "no_verify=1" } else { "" }
	}
}

pub fn apply_flags(config: &mut Config, args: &ConnectionArgs) {
	if let Some(url) = &args.url {
		config.vcenter.url = url.clone();
	}
	if let Some(username) = &args.username {
		config.vcenter.username = username.clone();
	}
	if let Some(password) = &args.password {
		config.vcenter.password = password.clone();
	}
	if args.insecure {
		config.vcenter.insecure_skip_verify = true;
	}
	if let Some(datacenter) = &args.datacenter {
		config.vcenter.datacenter = Some(datacenter.clone());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_override_file_values() {
		let mut config = Config::from_toml_str(
			r#"
			[vcenter]
			url = "https://old.example.com"
			username = "reader"
			"#,
		)
		.unwrap();
		let args = ConnectionArgs {
			url: Some("https://vc.example.com".into()),
			insecure: true,
			..ConnectionArgs::default()
		};

		apply_flags(&mut config, &args);

		assert_eq!(config.vcenter.url, "https://vc.example.com");
		assert_eq!(config.vcenter.username, "reader");
		assert!(config.vcenter.insecure_skip_verify);
	}

	#[test]
	fn exporter_applies_ready_timeout_override() {
		let mut config = Config::default();
		config.vcenter.url = "https://vc.example.com".into();
		config.vcenter.username = "reader".into();
		config.vcenter.password = "secret".into();
		let session = Arc::new(SessionManager::vim(config.vcenter.clone()).unwrap());
		let ctx = CommandContext { config, session };

		assert_eq!(ctx.exporter(None).config().ready_timeout_secs, 30);
		assert_eq!(ctx.exporter(Some(90)).config().ready_timeout_secs, 90);
	}
}
