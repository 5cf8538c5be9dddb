//! File, environment and flag configuration.
//!
//! Layers apply in order: defaults, TOML file, `SNAPVIEW_*` environment, then
//! whatever the caller overrides (CLI flags). [`Config::validate`] runs last.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "snapview.toml";
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";
const MAX_RETRY_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub vcenter: VCenterConfig,
	pub export: ExportConfig,
}

/// Management endpoint connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VCenterConfig {
	/// `https://vcenter.example.com`; any path is ignored.
	pub url: String,
	pub username: String,
	#[serde(skip_serializing)]
	pub password: String,
	pub insecure_skip_verify: bool,
	/// Data-center name; when unset the single data-center in the inventory is used.
	pub datacenter: Option<String>,
	pub api_release: String,
	pub connection_timeout_secs: u64,
	pub request_timeout_secs: u64,
	pub retry_attempts: u32,
	pub retry_delay_ms: u64,
}

impl Default for VCenterConfig {
	fn default() -> Self {
		Self {
			url: String::new(),
			username: String::new(),
			password: String::new(),
			insecure_skip_verify: false,
			datacenter: None,
			api_release: DEFAULT_API_RELEASE.to_string(),
			connection_timeout_secs: 30,
			request_timeout_secs: 60,
			retry_attempts: 3,
			retry_delay_ms: 5000,
		}
	}
}

impl fmt::Debug for VCenterConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VCenterConfig")
			.field("url", &self.url)
			.field("username", &self.username)
			.field("password", &"***")
			.field("insecure_skip_verify", &self.insecure_skip_verify)
			.field("datacenter", &self.datacenter)
			.field("api_release", &self.api_release)
			.field("connection_timeout_secs", &self.connection_timeout_secs)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.field("retry_attempts", &self.retry_attempts)
			.field("retry_delay_ms", &self.retry_delay_ms)
			.finish()
	}
}

impl VCenterConfig {
	pub fn connection_timeout(&self) -> Duration {
		Duration::from_secs(self.connection_timeout_secs)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	/// Host (with port when non-default) of the configured URL.
	pub fn host(&self) -> Result<String> {
		let url = url::Url::parse(&self.url).map_err(|err| Error::Config(format!("vcenter.url '{}': {err}", self.url)))?;
		let host = url
			.host_str()
			.ok_or_else(|| Error::Config(format!("vcenter.url '{}' has no host", self.url)))?;
		Ok(match url.port() {
			Some(port) => format!("{host}:{port}"),
			None => host.to_string(),
		})
	}
}

/// Export process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
	/// nbdkit binary; looked up on `PATH` when unset.
	pub nbdkit_path: Option<PathBuf>,
	/// VDDK install directory; well-known locations are probed when unset.
	pub vddk_libdir: Option<PathBuf>,
	/// Where export sockets are created; the system temp dir when unset.
	pub socket_dir: Option<PathBuf>,
	/// VDDK transport list, e.g. `nbdssl:nbd`.
	pub transports: Option<String>,
	pub ready_timeout_secs: u64,
	pub startup_grace_ms: u64,
	/// Pin the endpoint's certificate thumbprint when starting exports.
	pub verify_thumbprint: bool,
}

impl Default for ExportConfig {
	fn default() -> Self {
		Self {
			nbdkit_path: None,
			vddk_libdir: None,
			socket_dir: None,
			transports: None,
			ready_timeout_secs: 30,
			startup_grace_ms: 2000,
			verify_thumbprint: true,
		}
	}
}

impl ExportConfig {
	pub fn ready_timeout(&self) -> Duration {
		Duration::from_secs(self.ready_timeout_secs)
	}

	pub fn startup_grace(&self) -> Duration {
		Duration::from_millis(self.startup_grace_ms)
	}
}

impl Config {
	pub fn from_toml_str(source: &str) -> Result<Self> {
		toml::from_str(source).map_err(|err| Error::ConfigFile {
			path: "<inline>".to_string(),
			message: err.to_string(),
		})
	}

	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|err| Error::ConfigFile {
			path: path.display().to_string(),
			message: err.to_string(),
		})?;
		let config = toml::from_str(&text).map_err(|err| Error::ConfigFile {
			path: path.display().to_string(),
			message: err.to_string(),
		})?;
		debug!(target = "snapview.config", path = %path.display(), "loaded config file");
		Ok(config)
	}

	/// Resolves which file to load: an explicit path (which must exist), else
	/// `./snapview.toml`, else `<config dir>/snapview/config.toml`.
	pub fn discover_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
		if let Some(path) = explicit {
			if !path.is_file() {
				return Err(Error::ConfigFile {
					path: path.display().to_string(),
					message: "file does not exist".to_string(),
				});
			}
			return Ok(Some(path.to_path_buf()));
		}

		let local = PathBuf::from(CONFIG_FILE_NAME);
		if local.is_file() {
			return Ok(Some(local));
		}

		Ok(dirs::config_dir()
			.map(|dir| dir.join("snapview").join("config.toml"))
			.filter(|path| path.is_file()))
	}

	/// Loads the discovered file, or defaults when there is none.
	pub fn discover(explicit: Option<&Path>) -> Result<Self> {
		match Self::discover_path(explicit)? {
			Some(path) => Self::load(&path),
			None => Ok(Self::default()),
		}
	}

	/// Applies `SNAPVIEW_*` overrides read through `lookup`.
	pub fn apply_env<F>(&mut self, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

		if let Some(url) = non_empty("SNAPVIEW_VCENTER_URL") {
			self.vcenter.url = url;
		}
		if let Some(username) = non_empty("SNAPVIEW_USERNAME") {
			self.vcenter.username = username;
		}
		if let Some(password) = non_empty("SNAPVIEW_PASSWORD") {
			self.vcenter.password = password;
		}
		if let Some(insecure) = non_empty("SNAPVIEW_INSECURE") {
			self.vcenter.insecure_skip_verify = parse_flag(&insecure);
		}
		if let Some(datacenter) = non_empty("SNAPVIEW_DATACENTER") {
			self.vcenter.datacenter = Some(datacenter);
		}
		if let Some(nbdkit) = non_empty("SNAPVIEW_NBDKIT") {
			self.export.nbdkit_path = Some(PathBuf::from(nbdkit));
		}
		if let Some(libdir) = non_empty("SNAPVIEW_VDDK_LIBDIR") {
			self.export.vddk_libdir = Some(PathBuf::from(libdir));
		}
	}

	pub fn apply_process_env(&mut self) {
		self.apply_env(|key| std::env::var(key).ok());
	}

	pub fn validate(&self) -> Result<()> {
		let vc = &self.vcenter;
		if vc.url.is_empty() {
			return Err(Error::Config("vcenter.url is required".into()));
		}
		let url = url::Url::parse(&vc.url).map_err(|err| Error::Config(format!("vcenter.url '{}': {err}", vc.url)))?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(Error::Config(format!("vcenter.url must be http(s), got '{}'", url.scheme())));
		}
		if url.host_str().is_none() {
			return Err(Error::Config(format!("vcenter.url '{}' has no host", vc.url)));
		}
		if vc.username.is_empty() {
			return Err(Error::Config("vcenter.username is required".into()));
		}
		if vc.password.is_empty() {
			return Err(Error::Config("vcenter.password is required".into()));
		}
		if vc.connection_timeout_secs == 0 || vc.request_timeout_secs == 0 {
			return Err(Error::Config("vcenter timeouts must be positive".into()));
		}
		if vc.retry_attempts > MAX_RETRY_ATTEMPTS {
			return Err(Error::Config(format!(
				"vcenter.retry_attempts must be at most {MAX_RETRY_ATTEMPTS}, got {}",
				vc.retry_attempts
			)));
		}
		let retry_sleep = vc.retry_delay().saturating_mul(vc.retry_attempts);
		if retry_sleep >= vc.connection_timeout() {
			return Err(Error::Config(format!(
				"vcenter.retry_attempts x retry_delay_ms ({retry_sleep:?}) must stay below connection_timeout_secs ({:?})",
				vc.connection_timeout()
			)));
		}
		if self.export.ready_timeout_secs == 0 {
			return Err(Error::Config("export.ready_timeout_secs must be positive".into()));
		}
		Ok(())
	}
}

fn parse_flag(value: &str) -> bool {
	matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn valid() -> Config {
		let mut config = Config::default();
		config.vcenter.url = "https://vc.example.com".into();
		config.vcenter.username = "administrator@vsphere.local".into();
		config.vcenter.password = "secret".into();
		config
	}

	#[test]
	fn defaults_fill_missing_sections() {
		let config = Config::from_toml_str(
			r#"
			[vcenter]
			url = "https://vc.example.com"
			username = "admin"
			password = "pw"
			"#,
		)
		.unwrap();
		assert_eq!(config.vcenter.retry_attempts, 3);
		assert_eq!(config.vcenter.retry_delay(), Duration::from_secs(5));
		assert_eq!(config.vcenter.api_release, DEFAULT_API_RELEASE);
		assert_eq!(config.export.ready_timeout(), Duration::from_secs(30));
		assert!(config.export.verify_thumbprint);
		config.validate().unwrap();
	}

	#[test]
	fn environment_overrides_file_values() {
		let mut config = valid();
		let env: HashMap<&str, &str> = HashMap::from([
			("SNAPVIEW_VCENTER_URL", "https://other.example.com:8443"),
			("SNAPVIEW_INSECURE", "true"),
			("SNAPVIEW_USERNAME", ""),
		]);
		config.apply_env(|key| env.get(key).map(|value| value.to_string()));

		assert_eq!(config.vcenter.url, "https://other.example.com:8443");
		assert!(config.vcenter.insecure_skip_verify);
		assert_eq!(config.vcenter.username, "administrator@vsphere.local");
		assert_eq!(config.vcenter.host().unwrap(), "other.example.com:8443");
	}

	#[test]
	fn validation_rejects_bad_values() {
		let mut config = valid();
		config.vcenter.url = "ftp://vc".into();
		assert!(config.validate().is_err());

		let mut config = valid();
		config.vcenter.password.clear();
		assert!(config.validate().unwrap_err().to_string().contains("password"));

		let mut config = valid();
		config.vcenter.retry_attempts = 11;
		assert!(config.validate().is_err());

		let mut config = valid();
		config.vcenter.connection_timeout_secs = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn retry_sleeps_must_fit_inside_the_connect_budget() {
		let mut config = valid();
		config.vcenter.connection_timeout_secs = 1;
		config.vcenter.retry_attempts = 3;
		config.vcenter.retry_delay_ms = 400;
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("connection_timeout_secs"), "{err}");

		config.vcenter.retry_delay_ms = 200;
		config.validate().unwrap();
	}

	#[test]
	fn password_is_never_serialized_or_debugged() {
		let config = valid();
		let rendered = toml::to_string(&config).unwrap();
		assert!(!rendered.contains("secret"));
		assert!(!format!("{:?}", config.vcenter).contains("secret"));
	}

	#[test]
	fn explicit_missing_file_is_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		let missing = tmp.path().join("nope.toml");
		assert!(Config::discover_path(Some(&missing)).is_err());

		let present = tmp.path().join("snapview.toml");
		std::fs::write(&present, "[vcenter]\nurl = \"https://vc\"\n").unwrap();
		let config = Config::discover(Some(&present)).unwrap();
		assert_eq!(config.vcenter.url, "https://vc");
	}
}
