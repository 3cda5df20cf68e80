//! Runtime adapters: thin translators between the planner's dispatch calls
//! and each backend executor.
//!
//! One adapter instance exists per runtime entry of the typegraph, shared by
//! every materializer referencing it. An adapter that declares batching
//! support receives whole groups of sibling calls in one `dispatch_batch`
//! invocation, which is the engine's primary lever for collapsing
//! cross-backend round trips.

pub mod database;
pub mod graphql;
pub mod http;
pub mod objects;
pub mod value;
pub mod wire;
pub mod workflow;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
pub use database::{DatabaseService, MemoryDatabase};
use serde_json::Value;
pub use workflow::{MemoryWorkflows, WorkflowService};

use crate::ctx::RequestContext;
use crate::err::Error;
use crate::typegraph::{Effect, MaterializerId, RuntimeId, RuntimeKind, Typegraph};

/// One planned call into a runtime.
#[derive(Debug, Clone)]
pub struct DispatchCall {
	pub materializer: MaterializerId,
	/// The materializer's operation name
	pub op_name: String,
	/// The materializer's runtime-specific config
	pub data: serde_json::Map<String, Value>,
	pub effect: Effect,
	/// Fully resolved arguments (client values plus injections)
	pub args: serde_json::Map<String, Value>,
	/// Nearest ancestor value, forwarded to runtimes that consume it
	pub parent: Option<Arc<Value>>,
	/// Rendered sub-selection for upstream GraphQL runtimes
	pub selection: Option<String>,
}

/// A backend executor the planner can dispatch into.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
	fn name(&self) -> &str;

	/// Whether sibling calls may be collapsed into one `dispatch_batch`.
	fn supports_batching(&self) -> bool {
		false
	}

	async fn dispatch(&self, call: DispatchCall, ctx: &RequestContext) -> Result<Value>;

	/// Dispatch a group of calls. The default runs them sequentially; batching
	/// adapters override this with a single round trip.
	async fn dispatch_batch(
		&self,
		calls: Vec<DispatchCall>,
		ctx: &RequestContext,
	) -> Vec<Result<Value>> {
		let mut results = Vec::with_capacity(calls.len());
		for call in calls {
			results.push(self.dispatch(call, ctx).await);
		}
		results
	}
}

/// Wrap an adapter failure into the engine's error taxonomy.
pub(crate) fn runtime_err(runtime: &str, message: impl fmt::Display) -> anyhow::Error {
	anyhow::Error::new(Error::Runtime {
		runtime: runtime.to_string(),
		message: message.to_string(),
	})
}

/// Explicit capability struct for the native services the narrow adapters
/// translate into. Constructed once at startup and passed by reference; no
/// process-wide singletons.
#[derive(Clone)]
pub struct NativeServices {
	pub database: Arc<dyn DatabaseService>,
	pub objects: Arc<dyn object_store::ObjectStore>,
	pub workflows: Arc<dyn WorkflowService>,
}

impl NativeServices {
	/// All-in-memory services, for tests and demos.
	pub fn in_memory() -> Self {
		Self {
			database: Arc::new(MemoryDatabase::default()),
			objects: Arc::new(object_store::memory::InMemory::new()),
			workflows: Arc::new(MemoryWorkflows::default()),
		}
	}
}

/// The per-generation set of runtime adapters, indexed by runtime id.
pub struct Dispatcher {
	adapters: Vec<Arc<dyn RuntimeAdapter>>,
}

impl Dispatcher {
	/// Construct one adapter per runtime entry of the typegraph.
	pub async fn build(
		tg: &Typegraph,
		services: &NativeServices,
		wire_host: Arc<witwire::WireHost>,
	) -> Result<Self> {
		let mut adapters: Vec<Arc<dyn RuntimeAdapter>> = Vec::with_capacity(tg.runtimes().len());
		for (index, def) in tg.runtimes().iter().enumerate() {
			let id = RuntimeId(index as u32);
			let adapter: Arc<dyn RuntimeAdapter> = match def.kind {
				RuntimeKind::Value => Arc::new(value::ValueAdapter::new(&def.name)),
				RuntimeKind::Http => Arc::new(http::HttpAdapter::new(&def.name, &def.config)?),
				RuntimeKind::GraphqlUpstream => {
					Arc::new(graphql::GraphqlAdapter::new(&def.name, &def.config)?)
				}
				RuntimeKind::Wire => Arc::new(
					wire::WireAdapter::init(tg, id, def, Arc::clone(&wire_host)).await?,
				),
				RuntimeKind::Database => Arc::new(database::DatabaseAdapter::new(
					&def.name,
					Arc::clone(&services.database),
				)),
				RuntimeKind::ObjectStore => Arc::new(objects::ObjectStoreAdapter::new(
					&def.name,
					Arc::clone(&services.objects),
				)),
				RuntimeKind::Workflow => Arc::new(workflow::WorkflowAdapter::new(
					&def.name,
					Arc::clone(&services.workflows),
				)),
			};
			adapters.push(adapter);
		}
		Ok(Self {
			adapters,
		})
	}

	/// Assemble a dispatcher from pre-built adapters, position = runtime id.
	pub fn from_adapters(adapters: Vec<Arc<dyn RuntimeAdapter>>) -> Self {
		Self {
			adapters,
		}
	}

	pub fn adapter(&self, id: RuntimeId) -> Result<&Arc<dyn RuntimeAdapter>> {
		self.adapters.get(id.index()).ok_or_else(|| {
			anyhow::Error::new(Error::UnknownRuntimeId {
				id: id.0,
			})
		})
	}

	/// Dispatch a single call, wrapping adapter failures with the runtime
	/// name unless they already carry engine context.
	pub async fn dispatch(
		&self,
		runtime: RuntimeId,
		call: DispatchCall,
		ctx: &RequestContext,
	) -> Result<Value> {
		let adapter = self.adapter(runtime)?;
		adapter.dispatch(call, ctx).await.map_err(|err| annotate(adapter.name(), err))
	}
}

/// Keep taxonomy errors intact; wrap anything else as a runtime failure.
pub(crate) fn annotate(runtime: &str, err: anyhow::Error) -> anyhow::Error {
	if err.downcast_ref::<Error>().is_some() {
		err
	} else {
		runtime_err(runtime, format!("{err:#}"))
	}
}
