//! Function-host runtime adapter. One wit-wire guest instance serves every
//! materializer registered on its runtime; the instance lives as long as the
//! typegraph generation and is disposed deterministically with it.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use witwire::{MatInfo, ModuleLocation, WireHandle, WireHost};

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::ctx::RequestContext;
use crate::err::Error;
use crate::typegraph::{MaterializerId, RuntimeDef, RuntimeId, Typegraph};

pub struct WireAdapter {
	name: String,
	host: Arc<WireHost>,
	handle: WireHandle,
	/// Materializer id to the op name registered at init
	ops: HashMap<MaterializerId, String>,
}

impl WireAdapter {
	/// Instantiate the guest and register every materializer bound to this
	/// runtime, all in one init call.
	pub async fn init(
		tg: &Typegraph,
		runtime_id: RuntimeId,
		def: &RuntimeDef,
		host: Arc<WireHost>,
	) -> Result<Self> {
		let location = module_location(&def.name, &def.config)?;

		let mut ops = HashMap::new();
		let mut infos = Vec::new();
		for (index, mat) in tg.materializers().iter().enumerate() {
			if mat.runtime != runtime_id {
				continue;
			}
			let mat_data_json = serde_json::to_string(&Value::Object(mat.data.clone()))?;
			let op_name = format!("{}_{index}", mat.name);
			infos.push(MatInfo {
				op_name: op_name.clone(),
				mat_hash: content_hash(&op_name, &mat_data_json),
				mat_title: mat.name.clone(),
				mat_data_json,
			});
			ops.insert(MaterializerId(index as u32), op_name);
		}

		// Generation-unique instance id: a redeploy never reuses a VM.
		let instance_id = format!("{}/{}/{}", tg.name, def.name, Uuid::new_v4());
		let handle = host.init(location, &instance_id, infos).await?;
		info!(runtime = %def.name, instance = %instance_id, ops = ops.len(), "wire instance ready");
		Ok(Self {
			name: def.name.clone(),
			host,
			handle,
			ops,
		})
	}
}

#[async_trait]
impl RuntimeAdapter for WireAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	async fn dispatch(&self, call: DispatchCall, ctx: &RequestContext) -> Result<Value> {
		let op = self.ops.get(&call.materializer).ok_or_else(|| {
			runtime_err(&self.name, format!("materializer {} is not registered", call.materializer))
		})?;
		// Resolver args carry the field arguments plus the reserved metadata
		// key with parent and context data.
		let mut args = call.args;
		args.insert(
			"_".to_string(),
			serde_json::json!({
				"parent": call.parent.as_deref().cloned().unwrap_or(Value::Null),
				"context": Value::Object(ctx.claims.clone()),
			}),
		);
		self.host
			.handle(&self.handle, op, Value::Object(args))
			.await
			.map_err(|guest| anyhow::Error::new(Error::Guest(guest)))
	}
}

impl Drop for WireAdapter {
	fn drop(&mut self) {
		// Scoped teardown: the generation owning this adapter is gone.
		self.host.dispose(&self.handle);
	}
}

fn module_location(
	runtime: &str,
	config: &serde_json::Map<String, Value>,
) -> Result<ModuleLocation> {
	if let Some(path) = config.get("module").and_then(Value::as_str) {
		return Ok(ModuleLocation::Path(PathBuf::from(path)));
	}
	if let Some(text) = config.get("module_inline").and_then(Value::as_str) {
		return Ok(ModuleLocation::Bytes(text.as_bytes().to_vec()));
	}
	Err(runtime_err(runtime, "wire runtime config requires 'module' or 'module_inline'"))
}

fn content_hash(op_name: &str, mat_data_json: &str) -> String {
	let mut hasher = DefaultHasher::new();
	op_name.hash(&mut hasher);
	mat_data_json.hash(&mut hasher);
	format!("{:016x}", hasher.finish())
}
