//! # witwire
//!
//! Host side of the wit-wire protocol: initializes sandboxed WASM guest
//! instances, registers the operations they serve, and routes per-call
//! messages into them with a hard wall-clock deadline.
//!
//! A guest module exports a small linear-memory ABI:
//!
//! - `memory`: the guest linear memory.
//! - `wire_alloc(len) -> ptr`: allocate a buffer for a host payload.
//! - `wire_free(ptr, len)`: optional; reclaim a transferred buffer.
//! - `wire_init(ptr, len) -> status`: receive the init payload (instance id
//!   plus the operations registered for this instance); `0` is success.
//! - `wire_handle(ptr, len) -> packed`: receive a call payload and return a
//!   response buffer packed as `ptr << 32 | len`, or `0` on failure.
//!
//! Payloads are JSON both ways. A response is an envelope: `{"ok": value}`
//! for success or `{"err": {"kind": ..., "message": ...}}` for a guest-raised
//! error. Traps at the WASM boundary are classified into [`GuestErrorKind`]
//! by the host; a guest that exceeds its deadline is preempted through
//! wasmtime epoch interruption and its instance is disposed.

#[macro_use]
extern crate tracing;

pub mod cnf;
mod controller;
pub mod protocol;
mod runtime;

pub use protocol::{GuestError, GuestErrorKind, MatData, MatInfo, ModuleLocation};
pub use runtime::{WireHandle, WireHost};
