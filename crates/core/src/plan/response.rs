//! The response envelope: data congruent with the request's selection set,
//! plus structured error entries for denied or failed positions.

use serde::Serialize;
use serde_json::Value;

/// One structured error entry.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseError {
	pub message: String,
	/// Position of the failed field: aliases and list indices
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub path: Vec<Value>,
}

/// A complete gateway response.
///
/// Field-scoped failures leave `data` populated with `null` at the failed
/// position; whole-request failures carry no `data` at all.
#[derive(Debug, Serialize)]
pub struct Response {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<ResponseError>,
}

impl Response {
	pub fn new(data: Value, errors: Vec<ResponseError>) -> Self {
		Self {
			data: Some(data),
			errors,
		}
	}

	/// A whole-request failure: no partial data.
	pub fn request_error(err: &anyhow::Error) -> Self {
		Self {
			data: None,
			errors: vec![ResponseError {
				message: format!("{err:#}"),
				path: Vec::new(),
			}],
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn field_errors_keep_data() {
		let response = Response::new(
			serde_json::json!({"user": null}),
			vec![ResponseError {
				message: "denied".to_string(),
				path: vec![serde_json::json!("user")],
			}],
		);
		let json = serde_json::to_value(&response).unwrap();
		assert_eq!(json["data"], serde_json::json!({"user": null}));
		assert_eq!(json["errors"][0]["path"], serde_json::json!(["user"]));
	}

	#[test]
	fn request_errors_have_no_data_key() {
		let response = Response::request_error(&anyhow::anyhow!("rate limited"));
		let json = serde_json::to_value(&response).unwrap();
		assert!(json.get("data").is_none());
		assert_eq!(json["errors"][0]["message"], "rate limited");
	}
}
