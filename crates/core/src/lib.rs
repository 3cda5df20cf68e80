//! # Typewire Core
//!
//! This crate is the query resolution engine behind the typewire gateway.
//! It owns the compiled typegraph IR, plans incoming GraphQL/REST operations
//! into dependency-ordered dispatches across runtime adapters, evaluates
//! per-field policies, scores requests against the rate limiter, and merges
//! runtime results back into one response.
//!
//! The HTTP surface lives in `typewire-server`; the sandboxed function host
//! lives in `witwire` and is consumed here as one more runtime adapter.

#[macro_use]
extern crate tracing;

pub mod cnf;
pub mod ctx;
pub mod err;
pub mod gateway;
pub mod injection;
pub mod plan;
pub mod policy;
pub mod rate;
pub mod rt;
pub mod typegraph;

pub use err::Error;
pub use gateway::{Gateway, GatewayRequest};
pub use plan::{Response, ResponseError};
