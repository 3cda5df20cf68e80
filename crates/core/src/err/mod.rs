use serde::Serialize;
use thiserror::Error;

/// An error originating from the typewire resolution engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The engine encountered unreachable logic
	#[error("The engine encountered unreachable logic: {0}")]
	Unreachable(String),

	/// The typegraph document could not be parsed or is inconsistent
	#[error("Invalid typegraph document: {0}")]
	InvalidTypegraph(String),

	/// A type id points outside the current typegraph generation
	#[error("Type #{id} is referenced but does not exist in this typegraph generation")]
	UnknownTypeId {
		id: u32,
	},

	/// A materializer id points outside the current typegraph generation
	#[error("Materializer #{id} is referenced but does not exist in this typegraph generation")]
	UnknownMaterializerId {
		id: u32,
	},

	/// A runtime id points outside the current typegraph generation
	#[error("Runtime #{id} is referenced but does not exist in this typegraph generation")]
	UnknownRuntimeId {
		id: u32,
	},

	/// A policy id points outside the current typegraph generation
	#[error("Policy #{id} is referenced but does not exist in this typegraph generation")]
	UnknownPolicyId {
		id: u32,
	},

	/// A policy effect slot references a materializer that is not predicate-shaped
	#[error("Policy '{policy}' references materializer #{materializer} which is not a predicate")]
	InvalidPolicyPredicate {
		policy: String,
		materializer: u32,
	},

	/// A `Secret` injection names a secret the typegraph does not declare
	#[error("Secret '{0}' is injected but not declared by this typegraph")]
	UndeclaredSecret(String),

	/// The GraphQL request could not be parsed
	#[error("Parse error: {0}")]
	InvalidQuery(String),

	/// The named operation does not exist in the request document
	#[error("Unknown operation '{0}'")]
	UnknownOperation(String),

	/// The document holds several operations and none was selected
	#[error("The request must name which operation to run")]
	AmbiguousOperation,

	/// Subscriptions and other unsupported operation kinds
	#[error("Unsupported operation type '{0}'")]
	UnsupportedOperation(String),

	/// A selected field does not exist on the targeted type
	#[error("Field '{field}' does not exist on type '{ty}'")]
	UnknownField {
		ty: String,
		field: String,
	},

	/// A scalar field was selected with a nested selection set
	#[error("Field '{field}' of type '{ty}' does not accept a selection set")]
	UnexpectedSelection {
		ty: String,
		field: String,
	},

	/// A composite field was selected without a selection set
	#[error("Field '{field}' of type '{ty}' requires a selection set")]
	MissingSelection {
		ty: String,
		field: String,
	},

	/// A union/either selection must discriminate members with inline fragments
	#[error("Selection on '{ty}' must use inline fragments to discriminate members")]
	UndiscriminatedUnion {
		ty: String,
	},

	/// An inline fragment names a type that is not a member of the union
	#[error("Type '{variant}' is not a member of '{ty}'")]
	UnknownUnionMember {
		ty: String,
		variant: String,
	},

	/// A required argument was not provided
	#[error("Missing required argument '{name}' for field '{field}'")]
	MissingArgument {
		field: String,
		name: String,
	},

	/// An argument value does not match its declared input type
	#[error("Invalid value for argument '{name}' of field '{field}': expected {expected}")]
	InvalidArgument {
		field: String,
		name: String,
		expected: String,
	},

	/// An argument was provided that the input type does not declare
	#[error("Unknown argument '{name}' for field '{field}'")]
	UnexpectedArgument {
		field: String,
		name: String,
	},

	/// An argument is supplied by injection and must not come from the client
	#[error("Argument '{name}' of field '{field}' is injected and cannot be supplied")]
	InjectedArgument {
		field: String,
		name: String,
	},

	/// A query selected an effectful field, or a mutation a pure one
	#[error("A {operation} operation cannot select field '{field}'")]
	EffectMismatch {
		operation: String,
		field: String,
	},

	/// A referenced query variable is missing from the request
	#[error("Variable '{0}' is not defined by the request")]
	UndefinedVariable(String),

	/// Access denied by the policy chain
	#[error("Access to '{field}' was denied by policy '{policy}'")]
	PolicyDenied {
		field: String,
		policy: String,
	},

	/// A single request exceeds the per-query budget; rejected before dispatch
	#[error("This query scores {score}, exceeding the per-query budget of {limit}")]
	QueryBudgetExceeded {
		score: u32,
		limit: u32,
	},

	/// The identity's sliding window is exhausted
	#[error("Rate limit exceeded; retry once the current window has passed")]
	RateLimitExceeded,

	/// A runtime adapter failed to produce a value
	#[error("Runtime '{runtime}' failed: {message}")]
	Runtime {
		runtime: String,
		message: String,
	},

	/// A sandboxed function call failed at the host boundary
	#[error(transparent)]
	Guest(#[from] witwire::GuestError),

	/// The request was cancelled before this field was dispatched
	#[error("The request was cancelled before this field was dispatched")]
	Cancelled,

	/// A `Secret` injection has no value in the secrets store
	#[error("Secret '{0}' has no value for this typegraph")]
	UnknownSecret(String),

	/// A `Context` injection key is absent from the request context
	#[error("Context key '{0}' is not present in the request context")]
	UnknownContextKey(String),

	/// A `FromParent` injection names a field no ancestor produced
	#[error("Field '{child}' injects parent field '{field}', which no ancestor produced")]
	UnknownParentField {
		child: String,
		field: String,
	},

	/// A runtime produced a value that does not fit the declared output type
	#[error("Runtime produced a value that does not match type '{ty}': {detail}")]
	OutputShape {
		ty: String,
		detail: String,
	},
}

impl Error {
	pub fn unreachable(message: impl Into<String>) -> Self {
		Self::Unreachable(message.into())
	}

	/// Whether this error aborts the whole request before any dispatch.
	///
	/// Everything else is field-scoped and surfaces as a `null` leaf with an
	/// error entry at its position.
	pub fn is_request_fatal(&self) -> bool {
		#[rustfmt::skip]
		let fatal = matches!(
			self,
			Error::InvalidTypegraph(_)
			| Error::InvalidQuery(_)
			| Error::UnknownOperation(_)
			| Error::AmbiguousOperation
			| Error::UnsupportedOperation(_)
			| Error::UnknownField { .. }
			| Error::UnexpectedSelection { .. }
			| Error::MissingSelection { .. }
			| Error::UndiscriminatedUnion { .. }
			| Error::UnknownUnionMember { .. }
			| Error::MissingArgument { .. }
			| Error::InvalidArgument { .. }
			| Error::UnexpectedArgument { .. }
			| Error::InjectedArgument { .. }
			| Error::EffectMismatch { .. }
			| Error::UndefinedVariable(_)
			| Error::QueryBudgetExceeded { .. }
			| Error::RateLimitExceeded
		);
		fatal
	}
}

impl Serialize for Error {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation_errors_abort_the_request() {
		assert!(
			Error::UnknownField {
				ty: "user".to_string(),
				field: "nope".to_string(),
			}
			.is_request_fatal()
		);
		assert!(Error::RateLimitExceeded.is_request_fatal());
		assert!(
			Error::QueryBudgetExceeded {
				score: 26,
				limit: 25,
			}
			.is_request_fatal()
		);
	}

	#[test]
	fn field_errors_do_not_abort_the_request() {
		assert!(
			!Error::PolicyDenied {
				field: "user".to_string(),
				policy: "admin_only".to_string(),
			}
			.is_request_fatal()
		);
		assert!(
			!Error::Runtime {
				runtime: "http".to_string(),
				message: "upstream 502".to_string(),
			}
			.is_request_fatal()
		);
		assert!(!Error::Cancelled.is_request_fatal());
	}
}
