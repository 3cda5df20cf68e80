//! Narrow workflow-engine service and its adapter: start a run, signal it,
//! read its status. Orchestration semantics belong to the engine behind the
//! service, not to the gateway.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::ctx::RequestContext;

#[async_trait]
pub trait WorkflowService: Send + Sync {
	/// Start a run; returns the run id.
	async fn start(&self, workflow: &str, input: Value) -> Result<String>;
	async fn signal(&self, run_id: &str, signal: &str, payload: Value) -> Result<()>;
	async fn status(&self, run_id: &str) -> Result<Value>;
}

/// In-process workflow registry for tests and demos.
#[derive(Default)]
pub struct MemoryWorkflows {
	runs: DashMap<String, Value>,
}

#[async_trait]
impl WorkflowService for MemoryWorkflows {
	async fn start(&self, workflow: &str, input: Value) -> Result<String> {
		let run_id = Uuid::new_v4().to_string();
		self.runs.insert(
			run_id.clone(),
			serde_json::json!({
				"workflow": workflow,
				"input": input,
				"state": "running",
				"signals": [],
			}),
		);
		Ok(run_id)
	}

	async fn signal(&self, run_id: &str, signal: &str, payload: Value) -> Result<()> {
		let mut run = self
			.runs
			.get_mut(run_id)
			.ok_or_else(|| anyhow::anyhow!("unknown workflow run '{run_id}'"))?;
		if let Some(signals) = run.get_mut("signals").and_then(Value::as_array_mut) {
			signals.push(serde_json::json!({"signal": signal, "payload": payload}));
		}
		Ok(())
	}

	async fn status(&self, run_id: &str) -> Result<Value> {
		self.runs
			.get(run_id)
			.map(|run| run.clone())
			.ok_or_else(|| anyhow::anyhow!("unknown workflow run '{run_id}'"))
	}
}

pub struct WorkflowAdapter {
	name: String,
	service: Arc<dyn WorkflowService>,
}

impl WorkflowAdapter {
	pub fn new(name: &str, service: Arc<dyn WorkflowService>) -> Self {
		Self {
			name: name.to_string(),
			service,
		}
	}
}

#[async_trait]
impl RuntimeAdapter for WorkflowAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	async fn dispatch(&self, call: DispatchCall, _ctx: &RequestContext) -> Result<Value> {
		match call.op_name.as_str() {
			"start" => {
				let workflow = call
					.data
					.get("workflow")
					.and_then(Value::as_str)
					.ok_or_else(|| {
						runtime_err(&self.name, "materializer config requires a 'workflow'")
					})?;
				let input = call.args.get("input").cloned().unwrap_or(Value::Null);
				let run_id = self.service.start(workflow, input).await?;
				Ok(serde_json::json!({"run_id": run_id}))
			}
			"signal" => {
				let run_id = str_arg(&self.name, &call, "run_id")?;
				let signal = str_arg(&self.name, &call, "signal")?;
				let payload = call.args.get("payload").cloned().unwrap_or(Value::Null);
				self.service.signal(&run_id, &signal, payload).await?;
				Ok(serde_json::json!({"ok": true}))
			}
			"status" => {
				let run_id = str_arg(&self.name, &call, "run_id")?;
				self.service.status(&run_id).await
			}
			other => Err(runtime_err(&self.name, format!("unknown workflow op '{other}'"))),
		}
	}
}

fn str_arg(runtime: &str, call: &DispatchCall, name: &str) -> Result<String> {
	call.args
		.get(name)
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| runtime_err(runtime, format!("workflow op requires a '{name}' argument")))
}
