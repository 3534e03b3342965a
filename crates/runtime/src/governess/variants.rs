//! The concrete enforcement strategies.

use super::{Decision, Governess, Middleware, Rulebook, check};
use crate::{Error, Operation, Perimeter, Result};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Plain enforcement: protected calls run untouched and must guard
/// themselves.
#[derive(Debug, Default)]
pub struct BaseGoverness {
    book: Rulebook,
}

impl BaseGoverness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Governess for BaseGoverness {
    fn rulebook(&self) -> &Rulebook {
        &self.book
    }

    fn fresh(&self) -> Arc<dyn Governess> {
        Arc::new(Self::new())
    }

    fn strategy_name(&self) -> &'static str {
        "default"
    }
}

/// Starts unguarded. While unguarded only a matched forbid rule blocks;
/// once guarded it decides like [`BaseGoverness`].
#[derive(Debug)]
pub struct PermissiveGoverness {
    book: Rulebook,
}

impl PermissiveGoverness {
    pub fn new() -> Self {
        Self {
            book: Rulebook::unguarded(),
        }
    }
}

impl Default for PermissiveGoverness {
    fn default() -> Self {
        Self::new()
    }
}

impl Governess for PermissiveGoverness {
    fn rulebook(&self) -> &Rulebook {
        &self.book
    }

    fn fresh(&self) -> Arc<dyn Governess> {
        Arc::new(Self::new())
    }

    fn strategy_name(&self) -> &'static str {
        "permissive"
    }

    fn decide(&self, action: &str, args: &[Value]) -> Decision {
        if self.book.is_unguarded() {
            self.book.screen_forbidden(action, args)
        } else {
            self.book.decide(action, args)
        }
    }
}

/// Guards every protected call under the exposed name it was reached
/// through, before running it.
#[derive(Debug, Default)]
pub struct AutoGuardAllGoverness {
    book: Rulebook,
}

impl AutoGuardAllGoverness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Governess for AutoGuardAllGoverness {
    fn rulebook(&self) -> &Rulebook {
        &self.book
    }

    fn fresh(&self) -> Arc<dyn Governess> {
        Arc::new(Self::new())
    }

    fn strategy_name(&self) -> &'static str {
        "auto_guard_all"
    }

    fn governed(&self, operation: &Operation, args: &[Value], context: &Perimeter) -> Result<Value> {
        let name = context.exposed_name_of(operation).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "operation is not exposed by perimeter {}",
                context.name()
            ))
        })?;
        self.guard(name, args)?;
        operation.invoke(context, args)
    }
}

/// Counts guard calls against governed calls and fails a call that ran
/// without a matching guard.
///
/// The operation has already run when the failure is raised: this detects
/// a missing guard, it does not prevent the side effect.
#[derive(Debug, Default)]
pub struct CountBalancedGoverness {
    book: Rulebook,
    guards: AtomicUsize,
    calls: AtomicUsize,
}

impl CountBalancedGoverness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard_count(&self) -> usize {
        self.guards.load(Ordering::SeqCst)
    }

    pub fn governed_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Governess for CountBalancedGoverness {
    fn rulebook(&self) -> &Rulebook {
        &self.book
    }

    fn fresh(&self) -> Arc<dyn Governess> {
        Arc::new(Self::new())
    }

    fn strategy_name(&self) -> &'static str {
        "count_balanced"
    }

    fn guard(&self, action: &str, args: &[Value]) -> Result<Value> {
        self.guards.fetch_add(1, Ordering::SeqCst);
        check(self, action, args)
    }

    fn governed(&self, operation: &Operation, args: &[Value], context: &Perimeter) -> Result<Value> {
        let output = operation.invoke(context, args)?;
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if calls > self.guards.load(Ordering::SeqCst) && !self.book.is_unguarded() {
            self.guards.store(0, Ordering::SeqCst);
            self.calls.store(0, Ordering::SeqCst);
            let action = context.exposed_name_of(operation).unwrap_or("<unexposed>");
            tracing::debug!(perimeter = context.name(), action, "governed call never guarded");
            return Err(Error::AccessDenied {
                action: action.to_string(),
                target: None,
            });
        }
        Ok(output)
    }
}

/// Runs a middleware before every protected call. The middleware may
/// guard, inspect, or abort the call by returning an error.
pub struct MiddlewareGoverness {
    book: Rulebook,
    middleware: Middleware,
}

impl MiddlewareGoverness {
    pub fn new(middleware: Middleware) -> Self {
        Self {
            book: Rulebook::new(),
            middleware,
        }
    }
}

impl std::fmt::Debug for MiddlewareGoverness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareGoverness")
            .field("book", &self.book)
            .finish_non_exhaustive()
    }
}

impl Governess for MiddlewareGoverness {
    fn rulebook(&self) -> &Rulebook {
        &self.book
    }

    fn fresh(&self) -> Arc<dyn Governess> {
        Arc::new(Self::new(Arc::clone(&self.middleware)))
    }

    fn strategy_name(&self) -> &'static str {
        "middleware"
    }

    fn governed(&self, operation: &Operation, args: &[Value], context: &Perimeter) -> Result<Value> {
        let governess: &dyn Governess = self;
        (self.middleware)(governess, operation, args, context)?;
        operation.invoke(context, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{Definition, Rule, RuleContext};
    use serde_json::json;

    fn permit(g: &dyn Governess, text: &str, def: impl Into<Definition>) {
        g.add_rule(Rule::new(text, def.into(), RuleContext::default()).unwrap());
    }

    #[test]
    fn test_guard_returns_target() {
        let g = BaseGoverness::new();
        permit(&g, "permit read", true);
        assert_eq!(g.guard("read", &[json!("notes.txt")]).unwrap(), json!("notes.txt"));
        assert_eq!(g.guard("read", &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_guard_denial_names_action_and_target() {
        let g = BaseGoverness::new();
        let err = g.guard("write", &[json!("notes.txt")]).unwrap_err();
        assert!(err.is_access_denied());
        assert_eq!(err.to_string(), "access denied: write (notes.txt)");

        let err = g.guard("write", &[json!({ "path": "x" })]).unwrap_err();
        assert_eq!(err.to_string(), "access denied: write");
    }

    #[test]
    fn test_permissive_only_forbids_block() {
        let g = PermissiveGoverness::new();
        assert!(g.is_unguarded());
        assert!(g.is_allowed("anything", &[]));

        permit(&g, "forbid delete", Definition::items(["/etc"]).unwrap());
        assert!(g.is_allowed("delete", &[json!("/tmp")]));
        assert!(g.is_not_allowed("delete", &[json!("/etc")]));
    }

    #[test]
    fn test_permissive_guarded_behaves_like_base() {
        let g = PermissiveGoverness::new();
        g.set_unguarded(false);
        assert!(g.is_not_allowed("anything", &[]));
        permit(&g, "permit anything", true);
        assert!(g.is_allowed("anything", &[]));
    }

    #[test]
    fn test_do_unguarded_restores_state() {
        let g: Arc<dyn Governess> = Arc::new(BaseGoverness::new());
        assert!(g.is_not_allowed("act", &[]));
        let inside = g.do_unguarded(|| g.is_allowed("act", &[]));
        assert!(inside);
        assert!(!g.is_unguarded());

        let failed: Result<()> = g.do_unguarded(|| Err(Error::Operation("boom".into())));
        assert!(failed.is_err());
        assert!(!g.is_unguarded());
    }

    #[test]
    fn test_do_unguarded_restores_after_panic() {
        let g: Arc<dyn Governess> = Arc::new(BaseGoverness::new());
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: () = g.do_unguarded(|| panic!("inside"));
        }));
        assert!(caught.is_err());
        assert!(!g.is_unguarded());
    }

    #[test]
    fn test_do_unguarded_nested_keeps_outer_state() {
        let g: Arc<dyn Governess> = Arc::new(PermissiveGoverness::new());
        g.set_unguarded(false);
        g.do_unguarded(|| {
            g.do_unguarded(|| assert!(g.is_unguarded()));
            assert!(g.is_unguarded());
        });
        assert!(!g.is_unguarded());
    }

    #[test]
    fn test_fresh_has_same_strategy_and_no_rules() {
        let g = CountBalancedGoverness::new();
        permit(&g, "permit a", true);
        let fresh = g.fresh();
        assert_eq!(fresh.strategy_name(), "count_balanced");
        assert!(!fresh.has_any_rules());
        assert!(g.has_any_rules());
    }

    #[test]
    fn test_auto_guard_all_rejects_unexposed_operation() {
        let files = Perimeter::builder("files")
            .permit("read", true)
            .expose("read", |_, _| Ok(json!("contents")))
            .governess(Arc::new(AutoGuardAllGoverness::new()))
            .build()
            .unwrap();

        let exposed = files.operation("read").unwrap().clone();
        assert_eq!(files.governed(&exposed, &[]).unwrap(), json!("contents"));

        // Same behavior, different closure: identity is what counts.
        let stray = Operation::new(|_, _| Ok(json!("contents")));
        let err = files.governed(&stray, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref msg) if msg.contains("files")));
    }

    #[test]
    fn test_count_balanced_counts_guards() {
        let g = CountBalancedGoverness::new();
        permit(&g, "permit a", true);
        g.guard("a", &[]).unwrap();
        let _ = g.guard("b", &[]);
        assert_eq!(g.guard_count(), 2);
    }
}
