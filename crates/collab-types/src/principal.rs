//! The authenticated identity attached to a provider at construction, and the trait the
//! factory uses to resolve it.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::CollabResult;

/// `{userId, role}` or the distinguished anonymous principal.
///
/// The client never enforces authorization on this value — it is a UI hint. The backing
/// store's row-level policies are the actual authority (see §4.7, §6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Principal {
	Anonymous,
	User { user_id: Box<str>, role: Option<Box<str>> },
}

impl Principal {
	pub fn user(user_id: impl Into<Box<str>>, role: Option<impl Into<Box<str>>>) -> Self {
		Principal::User { user_id: user_id.into(), role: role.map(Into::into) }
	}

	pub fn is_anonymous(&self) -> bool {
		matches!(self, Principal::Anonymous)
	}
}

/// Injected source of the current principal. Implementations talk to whatever
/// authentication service the embedding application uses; this crate treats it as an opaque
/// interface per §1 ("Authentication service ... treated as a source of `{userId, role}` or
/// unauthenticated").
///
/// Resolution failure is not propagated as an error to the factory: per §4.7 the factory
/// MUST fail closed to `Principal::Anonymous` rather than let a broken auth source block
/// provider construction or escalate privilege.
#[async_trait]
pub trait AuthSource: Debug + Send + Sync {
	async fn resolve(&self) -> CollabResult<Principal>;
}

/// An `AuthSource` that always yields `Anonymous`. Useful for tests and for callers that
/// genuinely have no authentication layer.
#[derive(Debug, Default)]
pub struct AnonymousAuthSource;

#[async_trait]
impl AuthSource for AnonymousAuthSource {
	async fn resolve(&self) -> CollabResult<Principal> {
		Ok(Principal::Anonymous)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn anonymous_source_resolves_to_anonymous() {
		let principal = AnonymousAuthSource.resolve().await.expect("resolve never fails here");
		assert!(principal.is_anonymous());
	}
}
