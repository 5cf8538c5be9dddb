//! Authenticated, self-healing session to the management endpoint.
//!
//! The configuration is immutable and lives outside the lock, so its getters
//! never wait behind a slow connect. The only mutable state is the installed
//! [`Connection`], guarded by a reader/writer lock: connect, disconnect and
//! reconnect take it exclusively. A connection exists iff a verified session
//! exists, which makes "authenticated but no handle" unrepresentable.

use std::sync::Arc;
use std::time::Duration;

use snapview_protocol::{ManagedObjectReference, UserSession};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ConnectTarget, Connector, ManagementApi};
use crate::config::VCenterConfig;
use crate::error::{Error, Result};
use crate::export::ConnectionDetails;
use crate::vim::VimJsonConnector;
use crate::wait;

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A verified, authenticated handle.
///
/// Cheap to clone. Callers use it for one operation and fetch a fresh one via
/// [`SessionManager::connection`] next time, since a reconnect may replace it.
#[derive(Clone)]
pub struct Connection {
	api: Arc<dyn ManagementApi>,
	session: UserSession,
}

impl Connection {
	pub fn api(&self) -> &dyn ManagementApi {
		self.api.as_ref()
	}

	pub fn session(&self) -> &UserSession {
		&self.session
	}

	pub fn root_folder(&self) -> &ManagedObjectReference {
		self.api.root_folder()
	}

	fn same_handle(&self, other: &Connection) -> bool {
		Arc::ptr_eq(&self.api, &other.api)
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection").field("user", &self.session.user_name).finish_non_exhaustive()
	}
}

/// Owns the single connection to one endpoint.
pub struct SessionManager {
	config: VCenterConfig,
	target: ConnectTarget,
	connector: Arc<dyn Connector>,
	state: RwLock<Option<Connection>>,
}

impl SessionManager {
	pub fn new(config: VCenterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
		let target = ConnectTarget::from_config(&config)?;
		Ok(Self {
			config,
			target,
			connector,
			state: RwLock::new(None),
		})
	}

	/// Manager speaking the VI/JSON API over HTTPS.
	pub fn vim(config: VCenterConfig) -> Result<Self> {
		Self::new(config, Arc::new(VimJsonConnector))
	}

	pub fn config(&self) -> &VCenterConfig {
		&self.config
	}

	pub fn url(&self) -> &str {
		&self.config.url
	}

	pub fn host(&self) -> &str {
		&self.target.host
	}

	/// `(username, password)`.
	pub fn credentials(&self) -> (&str, &str) {
		(&self.config.username, &self.config.password)
	}

	/// Host name (without port) and credentials for an export process. The
	/// thumbprint is left unset; see [`ConnectionDetails::from_session`].
	pub fn connection_details(&self) -> Result<ConnectionDetails> {
		let url = Url::parse(&self.config.url).map_err(|err| Error::Config(format!("vcenter.url '{}': {err}", self.config.url)))?;
		let host = url
			.host_str()
			.ok_or_else(|| Error::Config(format!("vcenter.url '{}' has no host", self.config.url)))?;
		Ok(ConnectionDetails {
			host: host.to_string(),
			username: self.config.username.clone(),
			password: self.config.password.clone(),
			thumbprint: None,
		})
	}

	pub async fn is_connected(&self) -> bool {
		self.state.read().await.is_some()
	}

	/// Connects and authenticates. A no-op returning the installed connection
	/// when one already exists.
	///
	/// Login is attempted `retry_attempts + 1` times with `retry_delay` between
	/// attempts; a failed post-login verification is not retried.
	pub async fn connect(&self, cancel: &CancellationToken) -> Result<Connection> {
		let mut state = self.state.write().await;
		if let Some(conn) = state.as_ref() {
			return Ok(conn.clone());
		}
		let conn = self.establish(cancel).await?;
		*state = Some(conn.clone());
		Ok(conn)
	}

	/// Returns a usable connection, connecting first if needed.
	///
	/// An installed connection is probed cheaply; if the probe fails the
	/// connection is replaced through one reconnect.
	pub async fn connection(&self, cancel: &CancellationToken) -> Result<Connection> {
		let current = self.state.read().await.clone();
		let Some(conn) = current else {
			return self.connect(cancel).await;
		};

		match wait::cancellable(cancel, "session probe", conn.api.current_session()).await {
			Ok(Some(_)) => Ok(conn),
			Err(err) if err.is_cancelled() => Err(err),
			Ok(None) => {
				warn!(target = "snapview.session", url = %self.config.url, "session expired; reconnecting");
				self.replace_stale(&conn, cancel).await
			}
			Err(err) => {
				warn!(target = "snapview.session", url = %self.config.url, error = %err, "session probe failed; reconnecting");
				self.replace_stale(&conn, cancel).await
			}
		}
	}

	/// Drops the current connection (logout failures ignored) and connects afresh.
	pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<Connection> {
		let mut state = self.state.write().await;
		self.teardown(&mut state).await;
		let conn = self.establish(cancel).await?;
		*state = Some(conn.clone());
		Ok(conn)
	}

	/// Obtains a connection and probes it with a short timeout, forcing a
	/// reconnect when the probe fails.
	pub async fn health_check(&self, cancel: &CancellationToken) -> Result<UserSession> {
		let conn = self.connection(cancel).await?;
		let probe = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, conn.api.current_session());
		match wait::cancellable(cancel, "health probe", async { Ok::<_, Error>(probe.await) }).await? {
			Ok(Ok(Some(session))) => Ok(session),
			outcome => {
				let reason = match outcome {
					Ok(Ok(_)) => "no active session".to_string(),
					Ok(Err(err)) => err.to_string(),
					Err(_) => format!("probe exceeded {HEALTH_PROBE_TIMEOUT:?}"),
				};
				warn!(target = "snapview.session", url = %self.config.url, %reason, "health probe failed; reconnecting");
				self.replace_stale(&conn, cancel).await.map(|conn| conn.session)
			}
		}
	}

	/// Logs out and clears local state. Logout failures are logged only; local
	/// state is always cleared.
	pub async fn disconnect(&self) {
		let mut state = self.state.write().await;
		self.teardown(&mut state).await;
	}

	/// Replaces `stale` unless another caller already did.
	async fn replace_stale(&self, stale: &Connection, cancel: &CancellationToken) -> Result<Connection> {
		let mut state = self.state.write().await;
		if let Some(current) = state.as_ref() {
			if !current.same_handle(stale) {
				debug!(target = "snapview.session", "connection already replaced by a concurrent caller");
				return Ok(current.clone());
			}
		}
		self.teardown(&mut state).await;
		let conn = self.establish(cancel).await?;
		*state = Some(conn.clone());
		Ok(conn)
	}

	async fn teardown(&self, slot: &mut Option<Connection>) {
		let Some(conn) = slot.take() else {
			return;
		};
		match tokio::time::timeout(LOGOUT_TIMEOUT, conn.api.logout()).await {
			Ok(Ok(())) => info!(target = "snapview.session", url = %self.config.url, "logged out"),
			Ok(Err(err)) => warn!(target = "snapview.session", url = %self.config.url, error = %err, "logout failed; session discarded locally"),
			Err(_) => warn!(
				target = "snapview.session",
				url = %self.config.url,
				timeout = ?LOGOUT_TIMEOUT,
				"logout timed out; session discarded locally"
			),
		}
	}

	async fn establish(&self, cancel: &CancellationToken) -> Result<Connection> {
		let budget = self.config.connection_timeout();
		match tokio::time::timeout(budget, self.establish_inner(cancel)).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout {
				operation: format!("connecting to {}", self.config.url),
				after: budget,
			}),
		}
	}

	async fn establish_inner(&self, cancel: &CancellationToken) -> Result<Connection> {
		info!(
			target = "snapview.session",
			url = %self.config.url,
			user = %self.config.username,
			insecure = self.config.insecure_skip_verify,
			"connecting"
		);

		let api = wait::cancellable(cancel, "connect", self.connector.open(&self.target)).await?;
		self.login_with_retry(api.as_ref(), cancel).await?;

		let verified = wait::cancellable(cancel, "session verification", api.current_session()).await;
		let session = match verified {
			Ok(Some(session)) => session,
			Err(err) if err.is_cancelled() => return Err(err),
			other => {
				let source = match other {
					Err(err) => err,
					_ => Error::Authentication("no active session after login".into()),
				};
				if let Err(err) = api.logout().await {
					debug!(target = "snapview.session", error = %err, "logout of unverified session failed");
				}
				return Err(Error::SessionVerification { source: Box::new(source) });
			}
		};

		info!(target = "snapview.session", url = %self.config.url, user = %session.user_name, "session established");
		Ok(Connection { api, session })
	}

	async fn login_with_retry(&self, api: &dyn ManagementApi, cancel: &CancellationToken) -> Result<()> {
		let attempts = self.config.retry_attempts + 1;
		let delay = self.config.retry_delay();
		let mut attempt = 1;

		loop {
			let err = match wait::cancellable(cancel, "login", api.login(&self.config.username, &self.config.password)).await {
				Ok(_) => {
					debug!(target = "snapview.session", attempt, "login succeeded");
					return Ok(());
				}
				Err(err) if err.is_cancelled() => return Err(err),
				Err(err) => err,
			};

			warn!(target = "snapview.session", attempt, attempts, error = %err, "login attempt failed");
			if attempt >= attempts {
				return Err(Error::LoginExhausted {
					attempts,
					source: Box::new(err),
				});
			}
			wait::sleep(cancel, "login retry delay", delay).await?;
			attempt += 1;
		}
	}
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager").field("config", &self.config).finish_non_exhaustive()
	}
}
