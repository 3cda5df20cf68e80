//! Instance lifecycle: one [`WireHost`] owns the wasmtime engine, the epoch
//! ticker used for preemption, and the registry of live guest instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use wasmtime::{Config, Engine, Module};

use crate::cnf;
use crate::controller::{Controller, classify_failure};
use crate::protocol::{
	GuestError, GuestErrorKind, HandlePayload, InitPayload, MatInfo, ModuleLocation, ReplyEnvelope,
};

/// Lifecycle of one guest VM. `Handling` is implicit while the state lock is
/// held by an in-flight call.
enum InstanceState {
	Ready(Box<Controller>),
	Disposed,
}

struct InstanceEntry {
	ops: Arc<HashMap<String, MatInfo>>,
	cell: Arc<Mutex<InstanceState>>,
}

/// Token returned by [`WireHost::init`]; all calls go through it.
#[derive(Debug, Clone)]
pub struct WireHandle {
	id: String,
}

impl WireHandle {
	pub fn instance_id(&self) -> &str {
		&self.id
	}
}

/// Host for sandboxed wit-wire guest instances.
///
/// All instances share one engine so a single background ticker drives epoch
/// preemption for every store. Calls on independent instances run
/// concurrently; calls on the same instance serialize on its state lock.
pub struct WireHost {
	engine: Engine,
	instances: DashMap<String, InstanceEntry>,
	// Dropped with the host; the ticker thread exits when it can no longer
	// upgrade its weak reference.
	ticker_alive: Arc<()>,
}

impl WireHost {
	pub fn new() -> Result<Self> {
		let mut config = Config::new();
		config.epoch_interruption(true);
		let engine = Engine::new(&config)?;
		let ticker_alive = Arc::new(());
		let alive = Arc::downgrade(&ticker_alive);
		let ticker_engine = engine.clone();
		std::thread::Builder::new()
			.name("wire-epoch-ticker".to_string())
			.spawn(move || {
				let tick = Duration::from_millis((*cnf::WIRE_EPOCH_TICK_MS).max(1));
				while alive.upgrade().is_some() {
					ticker_engine.increment_epoch();
					std::thread::sleep(tick);
				}
			})
			.context("failed to spawn the epoch ticker")?;
		Ok(Self {
			engine,
			instances: DashMap::new(),
			ticker_alive,
		})
	}

	/// Compile and instantiate a guest module, then register its ops.
	///
	/// Re-initializing an existing instance id replaces the previous VM,
	/// which is disposed deterministically.
	pub async fn init(
		&self,
		location: ModuleLocation,
		instance_id: &str,
		ops: Vec<MatInfo>,
	) -> Result<WireHandle> {
		let payload = serde_json::to_vec(&InitPayload {
			instance_id: instance_id.to_string(),
			ops: ops.clone(),
		})?;
		let engine = self.engine.clone();
		// Compilation and the guest's own init run on the blocking pool.
		let controller = tokio::task::spawn_blocking(move || -> Result<Controller> {
			let module = match location {
				ModuleLocation::Path(path) => Module::from_file(&engine, &path)
					.with_context(|| format!("failed to load guest module {}", path.display()))?,
				ModuleLocation::Bytes(bytes) => {
					Module::new(&engine, &bytes).context("failed to compile guest module")?
				}
			};
			let mut controller = Controller::new(&engine, &module)?;
			controller.init(&payload)?;
			Ok(controller)
		})
		.await
		.context("guest init task aborted")??;

		let ops = ops.into_iter().map(|op| (op.op_name.clone(), op)).collect();
		let entry = InstanceEntry {
			ops: Arc::new(ops),
			cell: Arc::new(Mutex::new(InstanceState::Ready(Box::new(controller)))),
		};
		if let Some(previous) = self.instances.insert(instance_id.to_string(), entry) {
			debug!(instance_id, "replacing an existing wire instance");
			dispose_entry(&previous);
		}
		Ok(WireHandle {
			id: instance_id.to_string(),
		})
	}

	/// Invoke a registered op with the given resolver args.
	///
	/// Failures cross the boundary as [`GuestError`] only; a corrupting
	/// failure disposes the instance before returning.
	pub async fn handle(
		&self,
		handle: &WireHandle,
		op_name: &str,
		args: serde_json::Value,
	) -> Result<serde_json::Value, GuestError> {
		let (ops, cell) = match self.instances.get(&handle.id) {
			Some(entry) => (Arc::clone(&entry.ops), Arc::clone(&entry.cell)),
			None => {
				return Err(GuestError::new(
					GuestErrorKind::Protocol,
					format!("unknown wire instance '{}'", handle.id),
				));
			}
		};
		if !ops.contains_key(op_name) {
			return Err(GuestError::new(
				GuestErrorKind::Protocol,
				format!("op '{op_name}' is not registered on instance '{}'", handle.id),
			));
		}
		let payload = serde_json::to_vec(&HandlePayload {
			op: op_name.to_string(),
			args,
		})
		.map_err(|e| GuestError::new(GuestErrorKind::Protocol, e.to_string()))?;

		let op = op_name.to_string();
		tokio::task::spawn_blocking(move || {
			let mut state = cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			let controller = match &mut *state {
				InstanceState::Ready(controller) => controller,
				InstanceState::Disposed => {
					return Err(GuestError::new(
						GuestErrorKind::Protocol,
						"instance was disposed and must be reinitialized",
					));
				}
			};
			match controller.handle(&payload) {
				Ok(bytes) => parse_reply(&bytes),
				Err(err) => {
					let guest_err = classify_failure(&err);
					if guest_err.corrupts_instance() {
						warn!(%op, kind = ?guest_err.kind, "disposing corrupted wire instance");
						*state = InstanceState::Disposed;
					}
					Err(guest_err)
				}
			}
		})
		.await
		.map_err(|e| GuestError::new(GuestErrorKind::Crash, format!("guest call panicked: {e}")))?
	}

	/// Dispose one instance, reclaiming its VM immediately.
	pub fn dispose(&self, handle: &WireHandle) {
		if let Some((_, entry)) = self.instances.remove(&handle.id) {
			dispose_entry(&entry);
		}
	}

	/// Dispose every instance, e.g. when a typegraph generation is replaced.
	pub fn dispose_all(&self) {
		let ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
		for id in ids {
			if let Some((_, entry)) = self.instances.remove(&id) {
				dispose_entry(&entry);
			}
		}
	}

	/// Whether an instance id currently maps to a live (non-disposed) VM.
	pub fn is_live(&self, instance_id: &str) -> bool {
		match self.instances.get(instance_id) {
			Some(entry) => {
				let state = entry.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
				matches!(*state, InstanceState::Ready(_))
			}
			None => false,
		}
	}

	// Used by drop-order assertions in tests.
	#[doc(hidden)]
	pub fn instance_count(&self) -> usize {
		self.instances.len()
	}
}

impl Drop for WireHost {
	fn drop(&mut self) {
		// Instances hold no references back into the host; dropping the map
		// reclaims every VM. Keep the ticker token alive until here.
		let _ = &self.ticker_alive;
	}
}

fn dispose_entry(entry: &InstanceEntry) {
	let mut state = entry.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
	*state = InstanceState::Disposed;
}

/// Parse a guest reply envelope into a value or a raised error.
fn parse_reply(bytes: &[u8]) -> Result<serde_json::Value, GuestError> {
	match serde_json::from_slice::<ReplyEnvelope>(bytes) {
		Ok(ReplyEnvelope::Ok(value)) => Ok(value),
		Ok(ReplyEnvelope::Err(raised)) => Err(GuestError::new(
			raised.kind.unwrap_or(GuestErrorKind::Exception),
			raised.message,
		)),
		Err(err) => Err(GuestError::new(
			GuestErrorKind::Protocol,
			format!("guest reply was not a valid envelope: {err}"),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_reply_ok() {
		let value = parse_reply(br#"{"ok":{"answer":42}}"#).unwrap();
		assert_eq!(value["answer"], 42);
	}

	#[test]
	fn parse_reply_guest_raised() {
		let err = parse_reply(br#"{"err":{"kind":"exception","message":"boom"}}"#).unwrap_err();
		assert_eq!(err.kind, GuestErrorKind::Exception);
		assert_eq!(err.message, "boom");
	}

	#[test]
	fn parse_reply_garbage_is_protocol_error() {
		let err = parse_reply(b"not json").unwrap_err();
		assert_eq!(err.kind, GuestErrorKind::Protocol);
	}
}
