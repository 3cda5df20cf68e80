//! The `typewire` binary: load a typegraph document, build the gateway and
//! serve it over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use typewire_core::Gateway;
use typewire_core::rt::NativeServices;
use typewire_core::typegraph::TypegraphDoc;
use typewire_server::AppState;
use witwire::WireHost;

#[derive(Parser)]
#[command(name = "typewire", version, about = "Declarative GraphQL/REST gateway")]
struct Cli {
	#[command(subcommand)]
	command: Command,

	/// Log filter, e.g. `info` or `typewire_core=trace`
	#[arg(long, global = true, env = "TYPEWIRE_LOG", default_value = "info")]
	log: String,
}

#[derive(Subcommand)]
enum Command {
	/// Start the gateway
	Start {
		/// Address to listen on
		#[arg(long, env = "TYPEWIRE_BIND", default_value = "0.0.0.0:7891")]
		bind: String,

		/// Path to the serialized typegraph document
		#[arg(long, env = "TYPEWIRE_TYPEGRAPH")]
		typegraph: PathBuf,
	},
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_new(&cli.log)
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	with_enough_stack(async move {
		match cli.command {
			Command::Start {
				bind,
				typegraph,
			} => match start(&bind, &typegraph).await {
				Ok(()) => ExitCode::SUCCESS,
				Err(err) => {
					error!("{err:#}");
					ExitCode::FAILURE
				}
			},
		}
	})
}

/// Deeply nested typegraphs plan recursively; run on a larger stack than the
/// 2MiB default.
fn with_enough_stack(fut: impl Future<Output = ExitCode> + Send) -> ExitCode {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.thread_stack_size(10 * 1024 * 1024)
		.build()
		.expect("failed to start the async runtime")
		.block_on(fut)
}

async fn start(bind: &str, typegraph: &PathBuf) -> Result<()> {
	let raw = std::fs::read_to_string(typegraph)
		.with_context(|| format!("failed to read {}", typegraph.display()))?;
	let doc: TypegraphDoc = serde_json::from_str(&raw)
		.with_context(|| format!("failed to parse {}", typegraph.display()))?;

	let services = NativeServices::in_memory();
	let wire = Arc::new(WireHost::new()?);
	let gateway = Gateway::new(doc, &services, Arc::clone(&wire)).await?;
	info!(typegraph = %gateway.typegraph().name, "typegraph loaded");

	let state = AppState::new(gateway, services, wire);
	typewire_server::serve(bind, state).await
}
