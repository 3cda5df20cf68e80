//! Message types exchanged between the host and a guest instance.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One operation registered with a guest instance at init time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatInfo {
	/// Name the planner dispatches under
	pub op_name: String,
	/// Content hash of the materializer definition
	pub mat_hash: String,
	/// Human-readable title, used in error messages only
	pub mat_title: String,
	/// Serialized [`MatData`] describing the guest-side binding
	pub mat_data_json: String,
}

impl MatInfo {
	/// Parse the serialized materializer data.
	pub fn data(&self) -> Result<MatData> {
		let data = serde_json::from_str(&self.mat_data_json)?;
		Ok(data)
	}
}

/// How a registered operation binds to guest code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ty", rename_all = "snake_case")]
pub enum MatData {
	/// An anonymous single-expression body
	Lambda {
		source: String,
	},
	/// A named function with a body
	Def {
		name: String,
		source: String,
	},
	/// Import a module and call a named export
	Module {
		module: String,
		export: String,
		#[serde(default)]
		deps: Vec<String>,
	},
}

/// Where the guest module bytes come from.
#[derive(Debug, Clone)]
pub enum ModuleLocation {
	/// A `.wasm` (or `.wat`) artifact on disk
	Path(PathBuf),
	/// Module bytes held in memory, e.g. received with a typegraph deploy
	Bytes(Vec<u8>),
}

/// Init payload transferred to `wire_init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InitPayload {
	pub instance_id: String,
	pub ops: Vec<MatInfo>,
}

/// Call payload transferred to `wire_handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HandlePayload {
	pub op: String,
	pub args: serde_json::Value,
}

/// Response envelope read back from the guest. Externally tagged so a
/// legitimate `null` result stays distinguishable from a raised error.
#[derive(Debug, Deserialize)]
pub(crate) enum ReplyEnvelope {
	#[serde(rename = "ok")]
	Ok(serde_json::Value),
	#[serde(rename = "err")]
	Err(GuestRaised),
}

/// A guest-raised error carried inside the reply envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuestRaised {
	#[serde(default)]
	pub kind: Option<GuestErrorKind>,
	pub message: String,
}

/// Classification of a failed guest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestErrorKind {
	/// The guest raised an application-level exception
	Exception,
	/// The guest exhausted its call stack
	RecursionLimit,
	/// The guest exceeded the hard wall-clock deadline and was preempted
	Timeout,
	/// The guest trapped in a way that invalidates the instance
	Crash,
	/// The guest violated the wit-wire ABI contract
	Protocol,
}

/// A guest call failure, converted at the host boundary.
#[derive(Error, Debug, Clone)]
#[error("Guest execution failed ({kind:?}): {message}")]
pub struct GuestError {
	pub kind: GuestErrorKind,
	pub message: String,
}

impl GuestError {
	pub(crate) fn new(kind: GuestErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}

	/// Whether this failure leaves the instance unusable.
	///
	/// Preempted and trapped instances are torn down; an exception or an
	/// exhausted call stack leaves the instance serviceable.
	pub fn corrupts_instance(&self) -> bool {
		matches!(self.kind, GuestErrorKind::Timeout | GuestErrorKind::Crash)
	}
}
