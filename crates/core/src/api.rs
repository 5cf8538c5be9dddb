//! The seam between this crate and the remote management plane.
//!
//! [`ManagementApi`] is deliberately small: authentication, property reads and
//! method invocation. Inventory walking, snapshot search and task waiting are
//! all built on top of it, so tests can swap in the in-memory endpoint
//! behind the `fake` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use snapview_protocol::{ManagedObjectReference, UserSession};
use url::Url;

use crate::config::VCenterConfig;
use crate::error::{Error, Result};

/// Where and how to open a transport handle.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
	/// Endpoint root, e.g. `https://vc.example.com/`.
	pub url: Url,
	/// Host (and non-default port) part of `url`.
	pub host: String,
	pub insecure: bool,
	pub request_timeout: Duration,
	pub api_release: String,
}

impl ConnectTarget {
	pub fn from_config(config: &VCenterConfig) -> Result<Self> {
		let mut url = Url::parse(&config.url).map_err(|err| Error::Config(format!("vcenter.url '{}': {err}", config.url)))?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(Error::Config(format!("vcenter.url must be http(s), got '{}'", url.scheme())));
		}
		url.set_path("/");
		url.set_query(None);
		url.set_fragment(None);
		url.set_username("")
			.and_then(|()| url.set_password(None))
			.map_err(|()| Error::Config(format!("vcenter.url '{}' cannot carry credentials", config.url)))?;

		Ok(Self {
			host: config.host()?,
			url,
			insecure: config.insecure_skip_verify,
			request_timeout: config.request_timeout(),
			api_release: config.api_release.clone(),
		})
	}
}

/// Remote object-management operations.
#[async_trait]
pub trait ManagementApi: Send + Sync {
	/// Authenticates this handle.
	async fn login(&self, username: &str, password: &str) -> Result<UserSession>;

	/// Identity of the current session, `None` when the handle is not authenticated.
	async fn current_session(&self) -> Result<Option<UserSession>>;

	async fn logout(&self) -> Result<()>;

	/// Top of the inventory tree.
	fn root_folder(&self) -> &ManagedObjectReference;

	/// Reads one property; unset properties come back as `Value::Null`.
	async fn property(&self, object: &ManagedObjectReference, name: &str) -> Result<Value>;

	async fn properties(&self, object: &ManagedObjectReference, names: &[&str]) -> Result<Map<String, Value>> {
		let mut values = Map::new();
		for name in names {
			values.insert((*name).to_string(), self.property(object, name).await?);
		}
		Ok(values)
	}

	/// Looks a virtual machine up by BIOS UUID.
	async fn find_by_uuid(&self, datacenter: Option<&ManagedObjectReference>, uuid: &str) -> Result<Option<ManagedObjectReference>>;

	/// Invokes `method` on `object` with a JSON request body.
	async fn invoke(&self, object: &ManagedObjectReference, method: &str, body: Value) -> Result<Value>;
}

/// Creates fresh, unauthenticated handles.
#[async_trait]
pub trait Connector: Send + Sync {
	async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn ManagementApi>>;
}

/// Reads a property and deserializes it, treating `null` as `T::default()`.
pub async fn property_as<T>(api: &dyn ManagementApi, object: &ManagedObjectReference, name: &str) -> Result<T>
where
	T: DeserializeOwned + Default,
{
	let value = api.property(object, name).await?;
	if value.is_null() {
		return Ok(T::default());
	}
	serde_json::from_value(value).map_err(|err| Error::Protocol(format!("{object}.{name}: {err}")))
}

/// Reads a reference-valued property.
pub async fn reference(api: &dyn ManagementApi, object: &ManagedObjectReference, name: &str) -> Result<Option<ManagedObjectReference>> {
	let value = api.property(object, name).await?;
	Ok(ManagedObjectReference::from_value(&value))
}

/// Reads an array-of-references property.
pub async fn references(api: &dyn ManagementApi, object: &ManagedObjectReference, name: &str) -> Result<Vec<ManagedObjectReference>> {
	let value = api.property(object, name).await?;
	Ok(ManagedObjectReference::list_from_value(&value))
}

/// Display name of any managed entity.
pub async fn object_name(api: &dyn ManagementApi, object: &ManagedObjectReference) -> Result<String> {
	match api.property(object, "name").await? {
		Value::String(name) => Ok(name),
		Value::Null => Err(Error::Protocol(format!("{object} has no name"))),
		other => Err(Error::Protocol(format!("{object}.name is not a string: {other}"))),
	}
}
