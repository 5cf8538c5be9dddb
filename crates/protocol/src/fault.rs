//! Method fault payloads.

use serde::{Deserialize, Serialize};

/// Error body returned by the endpoint for a failed call.
///
/// ```json
/// { "_typeName": "InvalidLogin", "faultMessage": [{ "key": "...", "message": "Cannot complete login" }] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodFault {
	#[serde(rename = "_typeName")]
	pub type_name: String,
	pub fault_message: Vec<LocalizableMessage>,
	pub message: Option<String>,
}

impl MethodFault {
	/// Best human-readable message, falling back to the fault type.
	pub fn describe(&self) -> String {
		if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
			return message.to_string();
		}
		let joined = self
			.fault_message
			.iter()
			.filter_map(|m| m.message.as_deref())
			.filter(|m| !m.is_empty())
			.collect::<Vec<_>>()
			.join("; ");
		if joined.is_empty() { self.type_name.clone() } else { joined }
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizableMessage {
	pub key: Option<String>,
	pub message: Option<String>,
}

/// Fault attached to a failed task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalizedMethodFault {
	pub localized_message: Option<String>,
	pub fault: Option<MethodFault>,
}

impl LocalizedMethodFault {
	pub fn describe(&self) -> String {
		match (&self.localized_message, &self.fault) {
			(Some(message), _) if !message.is_empty() => message.clone(),
			(_, Some(fault)) => fault.describe(),
			_ => "unknown fault".to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn describe_prefers_fault_messages_over_type() {
		let fault: MethodFault = serde_json::from_value(json!({
			"_typeName": "InvalidLogin",
			"faultMessage": [{"message": "Cannot complete login due to an incorrect user name or password."}]
		}))
		.unwrap();
		assert_eq!(fault.describe(), "Cannot complete login due to an incorrect user name or password.");
	}

	#[test]
	fn describe_falls_back_to_type_name() {
		let fault: MethodFault = serde_json::from_value(json!({"_typeName": "NotAuthenticated"})).unwrap();
		assert_eq!(fault.describe(), "NotAuthenticated");
	}
}
