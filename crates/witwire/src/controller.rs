//! Low-level wasmtime plumbing for one guest instance.

use anyhow::{Context as _, Result, bail};
use wasmtime::{Engine, Instance, Linker, Module, Store, Trap, TypedFunc};

use crate::cnf;
use crate::protocol::{GuestError, GuestErrorKind};

/// Per-store host state. The wit-wire ABI is message-passing only, so the
/// store carries no host bindings beyond what wasmtime itself needs.
pub(crate) struct StoreData;

/// Owns the store, instance and exported entry points of one guest VM.
pub(crate) struct Controller {
	store: Store<StoreData>,
	instance: Instance,
	memory: wasmtime::Memory,
	alloc: TypedFunc<i32, i32>,
	free: Option<TypedFunc<(i32, i32), ()>>,
	handle: TypedFunc<(i32, i32), i64>,
}

/// Epoch ticks for a millisecond budget, always at least one tick.
fn ticks(timeout_ms: u64) -> u64 {
	(timeout_ms / (*cnf::WIRE_EPOCH_TICK_MS).max(1)).max(1)
}

impl Controller {
	/// Instantiate a compiled module and resolve the wit-wire exports.
	pub(crate) fn new(engine: &Engine, module: &Module) -> Result<Self> {
		let linker: Linker<StoreData> = Linker::new(engine);
		let mut store = Store::new(engine, StoreData);
		// Instantiation may run a start function; give it the init budget.
		store.set_epoch_deadline(ticks(*cnf::WIRE_INIT_TIMEOUT_MS));
		let instance = linker
			.instantiate(&mut store, module)
			.context("failed to instantiate guest module")?;
		let memory = instance
			.get_memory(&mut store, "memory")
			.context("guest module must export 'memory'")?;
		let alloc = instance
			.get_typed_func::<i32, i32>(&mut store, "wire_alloc")
			.context("guest module must export 'wire_alloc'")?;
		let free = instance.get_typed_func::<(i32, i32), ()>(&mut store, "wire_free").ok();
		let handle = instance
			.get_typed_func::<(i32, i32), i64>(&mut store, "wire_handle")
			.context("guest module must export 'wire_handle'")?;
		Ok(Self {
			store,
			instance,
			memory,
			alloc,
			free,
			handle,
		})
	}

	/// Copy a payload into guest memory, returning its (ptr, len).
	fn transfer(&mut self, payload: &[u8]) -> Result<(i32, i32)> {
		let len = i32::try_from(payload.len()).context("payload exceeds guest address space")?;
		let ptr = self.alloc.call(&mut self.store, len)?;
		if ptr < 0 {
			bail!("guest allocation of {len} bytes failed");
		}
		let start = ptr as usize;
		let mem = self.memory.data_mut(&mut self.store);
		let end = start.checked_add(payload.len()).context("guest pointer overflow")?;
		if end > mem.len() {
			bail!("guest returned an out-of-bounds allocation");
		}
		mem[start..end].copy_from_slice(payload);
		Ok((ptr, len))
	}

	/// Read a guest buffer back out of linear memory.
	fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>> {
		if len as usize > *cnf::WIRE_MAX_RESPONSE_SIZE {
			bail!("guest response of {len} bytes exceeds the configured maximum");
		}
		let start = ptr as usize;
		let end = start.checked_add(len as usize).context("guest pointer overflow")?;
		let mem = self.memory.data(&self.store);
		if end > mem.len() {
			bail!("guest returned an out-of-bounds response buffer");
		}
		Ok(mem[start..end].to_vec())
	}

	fn release(&mut self, ptr: i32, len: i32) {
		if let Some(free) = &self.free {
			// A failing free is not actionable for the caller.
			let _ = free.call(&mut self.store, (ptr, len));
		}
	}

	/// Run `wire_init` with the given payload under the init deadline.
	pub(crate) fn init(&mut self, payload: &[u8]) -> Result<()> {
		let init = self
			.instance
			.get_typed_func::<(i32, i32), i32>(&mut self.store, "wire_init")
			.context("guest module must export 'wire_init'")?;
		self.store.set_epoch_deadline(ticks(*cnf::WIRE_INIT_TIMEOUT_MS));
		let (ptr, len) = self.transfer(payload)?;
		let status = init.call(&mut self.store, (ptr, len))?;
		self.release(ptr, len);
		if status != 0 {
			bail!("guest init rejected the op registration (status {status})");
		}
		Ok(())
	}

	/// Run `wire_handle` with the given payload under the call deadline.
	///
	/// Returns the raw response bytes; envelope parsing and trap
	/// classification belong to the caller.
	pub(crate) fn handle(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
		self.store.set_epoch_deadline(ticks(*cnf::WIRE_CALL_TIMEOUT_MS));
		let (ptr, len) = self.transfer(payload)?;
		let packed = self.handle.call(&mut self.store, (ptr, len))?;
		self.release(ptr, len);
		if packed == 0 {
			bail!("guest returned no response buffer");
		}
		let out_ptr = (packed >> 32) as u32;
		let out_len = (packed & 0xffff_ffff) as u32;
		let bytes = self.read(out_ptr, out_len)?;
		self.release(out_ptr as i32, out_len as i32);
		Ok(bytes)
	}
}

/// Convert a failed wasm call into a [`GuestError`].
///
/// Epoch preemption and stack exhaustion have dedicated classes; every other
/// trap invalidates the instance.
pub(crate) fn classify_failure(err: &anyhow::Error) -> GuestError {
	match err.downcast_ref::<Trap>() {
		Some(Trap::Interrupt) => {
			GuestError::new(GuestErrorKind::Timeout, "guest call exceeded its deadline")
		}
		Some(Trap::StackOverflow) => {
			GuestError::new(GuestErrorKind::RecursionLimit, "guest exhausted its call stack")
		}
		Some(trap) => GuestError::new(GuestErrorKind::Crash, format!("guest trapped: {trap}")),
		None => GuestError::new(GuestErrorKind::Protocol, format!("{err:#}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tick_conversion_never_zero() {
		assert!(ticks(0) >= 1);
		assert!(ticks(1) >= 1);
	}

	#[test]
	fn classify_interrupt_as_timeout() {
		let err = anyhow::Error::new(Trap::Interrupt);
		assert_eq!(classify_failure(&err).kind, GuestErrorKind::Timeout);
	}

	#[test]
	fn classify_stack_overflow_as_recursion() {
		let err = anyhow::Error::new(Trap::StackOverflow);
		assert_eq!(classify_failure(&err).kind, GuestErrorKind::RecursionLimit);
	}

	#[test]
	fn classify_other_trap_as_crash() {
		let err = anyhow::Error::new(Trap::UnreachableCodeReached);
		assert_eq!(classify_failure(&err).kind, GuestErrorKind::Crash);
	}

	#[test]
	fn classify_non_trap_as_protocol() {
		let err = anyhow::anyhow!("guest returned no response buffer");
		assert_eq!(classify_failure(&err).kind, GuestErrorKind::Protocol);
	}
}
