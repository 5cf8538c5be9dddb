use std::time::Instant;

use serde::Serialize;

use crate::output::format::OutputFormat;
use crate::output::model::{CommandError, CommandResult};

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	/// Measures the duration from `start` instead of from construction.
	pub fn started_at(mut self, start: Instant) -> Self {
		self.start_time = start;
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code: code.into(),
			message: message.into(),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			ok: self.error.is_none(),
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: Some(self.start_time.elapsed().as_millis() as u64),
		}
	}
}

/// Print a command result to stdout in the specified format.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => print_result_text(result),
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	if let Some(error) = &result.error {
		eprintln!("{} failed [{}]: {}", result.command, error.code, error.message);
		return;
	}
	let Some(data) = &result.data else {
		println!("{}: ok", result.command);
		return;
	};
	match serde_json::to_value(data) {
		Ok(serde_json::Value::Object(fields)) => {
			for (key, value) in fields {
				println!("{key}: {}", render_text_value(&value));
			}
		}
		Ok(value) => println!("{}", render_text_value(&value)),
		Err(_) => println!("{}: ok", result.command),
	}
}

fn render_text_value(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(s) => s.clone(),
		serde_json::Value::Array(items) if items.iter().all(|item| item.is_string()) => {
			items.iter().filter_map(|item| item.as_str()).collect::<Vec<_>>().join(", ")
		}
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn success_envelope_shape() {
		let result = ResultBuilder::new("resolve").data(json!({"vmId": "vm-42"})).build();
		let value = serde_json::to_value(&result).unwrap();

		assert_eq!(value["ok"], true);
		assert_eq!(value["command"], "resolve");
		assert_eq!(value["data"]["vmId"], "vm-42");
		assert!(value.get("error").is_none());
		assert!(value["durationMs"].is_u64());
	}

	#[test]
	fn failure_envelope_has_code_and_no_data() {
		let result = ResultBuilder::<serde_json::Value>::new("export")
			.error("EXPORT_PROCESS", "export process exited before ready")
			.build();
		let value = serde_json::to_value(&result).unwrap();

		assert_eq!(value["ok"], false);
		assert_eq!(value["error"]["code"], "EXPORT_PROCESS");
		assert!(value.get("data").is_none());
	}

	#[test]
	fn text_arrays_of_strings_are_joined() {
		assert_eq!(render_text_value(&json!(["a", "b"])), "a, b");
		assert_eq!(render_text_value(&json!(3)), "3");
	}
}
