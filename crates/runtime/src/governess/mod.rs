//! Rule stores and enforcement strategies.
//!
//! A [`Governess`] owns a [`Rulebook`], answers allow/deny questions about
//! actions, and is the interception point every protected call passes
//! through ([`Governess::governed`]). The variants differ only in how they
//! interpose themselves around that call:
//!
//! - [`BaseGoverness`]: runs the operation untouched.
//! - [`PermissiveGoverness`]: starts unguarded; only matched forbid rules block.
//! - [`AutoGuardAllGoverness`]: guards the exposed operation name before every call.
//! - [`CountBalancedGoverness`]: detects calls that never guarded, after the fact.
//! - [`MiddlewareGoverness`]: runs a host-supplied middleware before every call.

mod rulebook;
mod strategy;
mod variants;

pub use rulebook::{Decision, Rulebook};
pub use strategy::{Middleware, Strategy};
pub use variants::{
    AutoGuardAllGoverness, BaseGoverness, CountBalancedGoverness, MiddlewareGoverness,
    PermissiveGoverness,
};

use crate::{Error, Operation, Perimeter, Result};
use policy::Rule;
use serde_json::Value;
use std::sync::Arc;

/// Rule store and enforcement strategy.
///
/// Implementations provide a [`Rulebook`]; every other method has a
/// default built on it. Variants override [`Governess::governed`] (and
/// occasionally [`Governess::guard`] or [`Governess::decide`]) to change
/// how protected calls are enforced.
pub trait Governess: Send + Sync {
    /// Rules and guard flag backing this governess.
    fn rulebook(&self) -> &Rulebook;

    /// A fresh, rule-less instance of the same concrete type.
    fn fresh(&self) -> Arc<dyn Governess>;

    /// Short strategy name, as accepted by [`Strategy::from_name`].
    fn strategy_name(&self) -> &'static str;

    /// Evaluate an action into a [`Decision`].
    fn decide(&self, action: &str, args: &[Value]) -> Decision {
        self.rulebook().decide(action, args)
    }

    fn is_allowed(&self, action: &str, args: &[Value]) -> bool {
        self.decide(action, args).is_allowed()
    }

    fn is_not_allowed(&self, action: &str, args: &[Value]) -> bool {
        !self.is_allowed(action, args)
    }

    /// Return the first argument if the action is allowed, else fail with
    /// [`Error::AccessDenied`].
    fn guard(&self, action: &str, args: &[Value]) -> Result<Value> {
        check(self, action, args)
    }

    /// Run a protected operation. This is the interception seam.
    fn governed(&self, operation: &Operation, args: &[Value], context: &Perimeter) -> Result<Value> {
        operation.invoke(context, args)
    }

    /// Learn every rule of `perimeter` not already learned from it.
    fn learn_rules(&self, perimeter: &Perimeter) -> usize {
        let learned = self.rulebook().learn(perimeter.id(), perimeter.rules());
        tracing::trace!(
            perimeter = perimeter.name(),
            strategy = self.strategy_name(),
            learned,
            "learned perimeter rules"
        );
        learned
    }

    fn add_rule(&self, rule: Rule) {
        self.rulebook().add(rule);
    }

    fn has_any_rules(&self) -> bool {
        !self.rulebook().is_empty()
    }

    fn is_unguarded(&self) -> bool {
        self.rulebook().is_unguarded()
    }

    fn set_unguarded(&self, unguarded: bool) {
        self.rulebook().set_unguarded(unguarded);
    }
}

impl<'a> dyn Governess + 'a {
    /// Run `f` with enforcement bypassed, restoring the previous guard
    /// state afterwards, including when `f` fails or panics.
    ///
    /// The flag is shared: interleaved call chains on one governess can
    /// clobber each other's restore.
    pub fn do_unguarded<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = UnguardedScope::enter(self.rulebook());
        f()
    }
}

struct UnguardedScope<'a> {
    book: &'a Rulebook,
    saved: bool,
}

impl<'a> UnguardedScope<'a> {
    fn enter(book: &'a Rulebook) -> Self {
        let saved = book.is_unguarded();
        book.set_unguarded(true);
        Self { book, saved }
    }
}

impl Drop for UnguardedScope<'_> {
    fn drop(&mut self) {
        self.book.set_unguarded(self.saved);
    }
}

/// The base guard: the shared body of [`Governess::guard`], callable from
/// overrides.
pub fn check<G: Governess + ?Sized>(governess: &G, action: &str, args: &[Value]) -> Result<Value> {
    match governess.decide(action, args) {
        Decision::Allow { .. } => Ok(args.first().cloned().unwrap_or(Value::Null)),
        Decision::Deny { reason, .. } => {
            tracing::debug!(action, %reason, "access denied");
            Err(Error::AccessDenied {
                action: action.to_string(),
                target: args.first().and_then(printable),
            })
        }
    }
}

/// Textual form of a scalar target.
fn printable(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
