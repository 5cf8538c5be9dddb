//! Session identity types.

use serde::{Deserialize, Serialize};

/// Identity of an authenticated session, returned by `Login` and `currentSession`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSession {
	pub key: String,
	pub user_name: String,
	pub full_name: Option<String>,
	pub login_time: Option<String>,
	pub last_active_time: Option<String>,
}

/// Body of a `SessionManager.Login` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
	pub user_name: &'a str,
	pub password: &'a str,
}
