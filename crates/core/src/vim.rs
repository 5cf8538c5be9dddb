//! vSphere VI/JSON transport.
//!
//! Every managed object is addressed as `<base>/<Type>/<id>/<property-or-method>`
//! under `https://<host>/sdk/vim25/<release>/`. Property reads are `GET`,
//! method calls are `POST` with a JSON body. The session token handed out by
//! `Login` travels in the `vmware-api-session-id` header.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use snapview_protocol::{LoginRequest, ManagedObjectReference, MethodFault, ServiceContent, UserSession};
use tracing::{debug, trace};
use url::Url;

use crate::api::{ConnectTarget, Connector, ManagementApi};
use crate::error::{Error, Result};

pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Fault types that mean "these credentials or this session are not good enough".
const AUTH_FAULTS: &[&str] = &["InvalidLogin", "NotAuthenticated", "NoPermission"];

/// Opens [`VimJsonClient`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct VimJsonConnector;

#[async_trait]
impl Connector for VimJsonConnector {
	async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn ManagementApi>> {
		Ok(Arc::new(VimJsonClient::open(target).await?))
	}
}

struct Transport {
	http: reqwest::Client,
	base: Url,
	host: String,
	session_id: Mutex<Option<String>>,
}

impl Transport {
	fn url(&self, object: &ManagedObjectReference, leaf: &str) -> Result<Url> {
		let mut url = self.base.clone();
		url.path_segments_mut()
			.map_err(|()| Error::Config(format!("{} cannot carry a path", self.base)))?
			.pop_if_empty()
			.push(&object.kind)
			.push(&object.value)
			.push(leaf);
		Ok(url)
	}

	async fn get(&self, url: Url) -> Result<Value> {
		trace!(target = "snapview.vim", %url, "GET");
		let (_, value) = self.send(self.http.get(url)).await?;
		Ok(value)
	}

	async fn post(&self, url: Url, body: &Value) -> Result<(HeaderMap, Value)> {
		trace!(target = "snapview.vim", %url, "POST");
		self.send(self.http.post(url).json(body)).await
	}

	async fn send(&self, request: RequestBuilder) -> Result<(HeaderMap, Value)> {
		let session = self.session_id.lock().clone();
		let request = match session {
			Some(id) => request.header(SESSION_HEADER, id),
			None => request,
		};

		let response = request.send().await.map_err(|err| self.transport_error(&err))?;
		let status = response.status();
		let headers = response.headers().clone();
		let body = response.bytes().await.map_err(|err| self.transport_error(&err))?;

		if !status.is_success() {
			return Err(fault_error(status, &body));
		}
		if body.is_empty() {
			return Ok((headers, Value::Null));
		}
		let value = serde_json::from_slice(&body).map_err(|err| Error::Protocol(format!("invalid JSON from {}: {err}", self.host)))?;
		Ok((headers, value))
	}

	fn transport_error(&self, err: &reqwest::Error) -> Error {
		let message = if err.is_timeout() {
			format!("request timed out: {err}")
		} else {
			err.to_string()
		};
		Error::Connection {
			target: self.host.clone(),
			message,
		}
	}
}

/// One unauthenticated-until-login handle to a vCenter or ESXi endpoint.
pub struct VimJsonClient {
	transport: Transport,
	content: ServiceContent,
}

impl VimJsonClient {
	/// Builds the HTTP client and fetches the service content.
	pub async fn open(target: &ConnectTarget) -> Result<Self> {
		let http = reqwest::Client::builder()
			.danger_accept_invalid_certs(target.insecure)
			.timeout(target.request_timeout)
			.user_agent(concat!("snapview/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(|err| Error::Connection {
				target: target.host.clone(),
				message: err.to_string(),
			})?;

		let base = target
			.url
			.join(&format!("sdk/vim25/{}/", target.api_release))
			.map_err(|err| Error::Config(format!("api release '{}': {err}", target.api_release)))?;

		let transport = Transport {
			http,
			base,
			host: target.host.clone(),
			session_id: Mutex::new(None),
		};

		let instance = ManagedObjectReference::new("ServiceInstance", "ServiceInstance");
		let content = transport.get(transport.url(&instance, "content")?).await?;
		let content: ServiceContent =
			serde_json::from_value(content).map_err(|err| Error::Protocol(format!("service content from {}: {err}", target.host)))?;

		debug!(
			target = "snapview.vim",
			host = %target.host,
			about = ?content.about.as_ref().and_then(|about| about.full_name.as_deref()),
			"opened management endpoint"
		);

		Ok(Self { transport, content })
	}

	pub fn service_content(&self) -> &ServiceContent {
		&self.content
	}

	fn session_manager(&self) -> Result<&ManagedObjectReference> {
		self.content
			.session_manager
			.as_ref()
			.ok_or_else(|| Error::Protocol(format!("{} does not expose a session manager", self.transport.host)))
	}
}

#[async_trait]
impl ManagementApi for VimJsonClient {
	async fn login(&self, username: &str, password: &str) -> Result<UserSession> {
		let url = self.transport.url(self.session_manager()?, "Login")?;
		let body = serde_json::to_value(LoginRequest {
			user_name: username,
			password,
		})
		.map_err(|err| Error::Protocol(err.to_string()))?;

		let (headers, value) = self.transport.post(url, &body).await?;
		let token = headers
			.get(SESSION_HEADER)
			.and_then(|value| value.to_str().ok())
			.ok_or_else(|| Error::Protocol("login response carried no session token".into()))?;
		*self.transport.session_id.lock() = Some(token.to_string());

		serde_json::from_value(value).map_err(|err| Error::Protocol(format!("login response: {err}")))
	}

	async fn current_session(&self) -> Result<Option<UserSession>> {
		if self.transport.session_id.lock().is_none() {
			return Ok(None);
		}
		let url = self.transport.url(self.session_manager()?, "currentSession")?;
		match self.transport.get(url).await {
			Ok(Value::Null) => Ok(None),
			Ok(value) => serde_json::from_value(value)
				.map(Some)
				.map_err(|err| Error::Protocol(format!("current session: {err}"))),
			Err(Error::Authentication(_)) => Ok(None),
			Err(err) => Err(err),
		}
	}

	async fn logout(&self) -> Result<()> {
		let url = self.transport.url(self.session_manager()?, "Logout")?;
		let outcome = self.transport.post(url, &json!({})).await.map(|_| ());
		*self.transport.session_id.lock() = None;
		outcome
	}

	fn root_folder(&self) -> &ManagedObjectReference {
		&self.content.root_folder
	}

	async fn property(&self, object: &ManagedObjectReference, name: &str) -> Result<Value> {
		self.transport.get(self.transport.url(object, name)?).await
	}

	async fn find_by_uuid(&self, datacenter: Option<&ManagedObjectReference>, uuid: &str) -> Result<Option<ManagedObjectReference>> {
		let index = self
			.content
			.search_index
			.as_ref()
			.ok_or_else(|| Error::Protocol(format!("{} does not expose a search index", self.transport.host)))?;
		let mut body = json!({ "uuid": uuid, "vmSearch": true, "instanceUuid": false });
		if let Some(datacenter) = datacenter {
			body["datacenter"] = serde_json::to_value(datacenter).map_err(|err| Error::Protocol(err.to_string()))?;
		}
		let (_, value) = self.transport.post(self.transport.url(index, "FindByUuid")?, &body).await?;
		Ok(ManagedObjectReference::from_value(&value))
	}

	async fn invoke(&self, object: &ManagedObjectReference, method: &str, body: Value) -> Result<Value> {
		let (_, value) = self.transport.post(self.transport.url(object, method)?, &body).await?;
		Ok(value)
	}
}

/// Maps an error response to the error taxonomy.
fn fault_error(status: StatusCode, body: &[u8]) -> Error {
	match serde_json::from_slice::<MethodFault>(body) {
		Ok(fault) if !fault.type_name.is_empty() => {
			if AUTH_FAULTS.contains(&fault.type_name.as_str()) {
				Error::Authentication(format!("{}: {}", fault.type_name, fault.describe()))
			} else {
				Error::Remote {
					message: fault.describe(),
					fault: fault.type_name,
				}
			}
		}
		_ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => Error::Authentication(format!("HTTP {status}")),
		_ => {
			let text = String::from_utf8_lossy(body);
			let text: String = text.trim().chars().take(512).collect();
			Error::Remote {
				fault: format!("HTTP {}", status.as_u16()),
				message: if text.is_empty() { status.to_string() } else { text },
			}
		}
	}
}
