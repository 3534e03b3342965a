//! Named capability surfaces.

use crate::sandbox::{SANDBOX_MEMBERS, SandboxInner};
use crate::{Error, Governess, Result, Sandbox, Strategy};
use policy::{Definition, Rule, RuleContext, RuleSet, RuleSpec, State, ident, merge_spec};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use uuid::Uuid;

type OperationFn = dyn Fn(&Perimeter, &[Value]) -> Result<Value> + Send + Sync;

/// A callable member of a perimeter.
///
/// Operations are always invoked with their owning perimeter as the
/// calling context. Identity is by reference: clones compare equal with
/// [`Operation::ptr_eq`].
#[derive(Clone)]
pub struct Operation(Arc<OperationFn>);

impl Operation {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Perimeter, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, context: &Perimeter, args: &[Value]) -> Result<Value> {
        (self.0)(context, args)
    }

    pub fn ptr_eq(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Operation(..)")
    }
}

type GovernessFactory = Box<dyn FnOnce() -> Result<Arc<dyn Governess>> + Send>;

enum GovernessSource {
    Instance(Arc<dyn Governess>),
    Factory(GovernessFactory),
}

/// Everything a [`Perimeter`] is built from.
///
/// Works both as the single options object (with [`PerimeterOptions::name`])
/// and as the options half of [`Perimeter::new`].
#[derive(Default)]
pub struct PerimeterOptions {
    name: Option<String>,
    rules: Vec<RuleSpec>,
    permit: Vec<RuleSpec>,
    forbid: Vec<RuleSpec>,
    expose: Vec<String>,
    operations: HashMap<String, Operation>,
    governess: Option<GovernessSource>,
    state: State,
}

impl PerimeterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare a rule by its full text, e.g. `"permit read"`.
    pub fn rule(mut self, text: impl Into<String>, definition: impl Into<Definition>) -> Self {
        merge_spec(&mut self.rules, RuleSpec::new(text, definition));
        self
    }

    /// Shorthand for `rule("permit <action>", definition)`.
    pub fn permit(mut self, action: &str, definition: impl Into<Definition>) -> Self {
        merge_spec(&mut self.permit, RuleSpec::new(format!("permit {action}"), definition));
        self
    }

    /// Shorthand for `rule("forbid <action>", definition)`.
    pub fn forbid(mut self, action: &str, definition: impl Into<Definition>) -> Self {
        merge_spec(&mut self.forbid, RuleSpec::new(format!("forbid {action}"), definition));
        self
    }

    /// Add every rule of a declarative rule set.
    pub fn rule_set(mut self, set: &RuleSet) -> Result<Self> {
        for spec in set.to_specs()? {
            merge_spec(&mut self.rules, spec);
        }
        Ok(self)
    }

    /// Register an operation and expose it under `name`.
    pub fn expose<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Perimeter, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.operation(name.clone(), f).exposing([name])
    }

    /// Register an operation without exposing it.
    pub fn operation<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Perimeter, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.operations.insert(name.into(), Operation::new(f));
        self
    }

    /// Expose names; each must resolve to a registered operation when the
    /// perimeter is attached.
    pub fn exposing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.expose.contains(&name) {
                self.expose.push(name);
            }
        }
        self
    }

    /// Use this governess instead of the container's.
    pub fn governess(mut self, governess: Arc<dyn Governess>) -> Self {
        self.governess = Some(GovernessSource::Instance(governess));
        self
    }

    /// Build an own governess from `strategy`.
    pub fn strategy(self, strategy: Strategy) -> Self {
        self.governess(strategy.build())
    }

    /// Build an own governess lazily at construction. A failing factory
    /// leaves the perimeter without one.
    pub fn governess_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Governess>> + Send + 'static,
    {
        self.governess = Some(GovernessSource::Factory(Box::new(factory)));
        self
    }

    /// Perimeter-local state, visible to operations and rule predicates.
    pub fn state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> Result<Arc<Perimeter>> {
        Perimeter::from_options(self)
    }
}

/// A named capability surface: exposed operations, the rules that govern
/// them, and optionally its own governess.
pub struct Perimeter {
    id: Uuid,
    name: String,
    specs: Vec<RuleSpec>,
    rules: Vec<Arc<Rule>>,
    exposed: Vec<String>,
    operations: HashMap<String, Operation>,
    governess: RwLock<Option<Arc<dyn Governess>>>,
    shadow: OnceLock<Arc<dyn Governess>>,
    container: OnceLock<Weak<SandboxInner>>,
    state: State,
}

impl Perimeter {
    /// Build a perimeter from a name and options.
    pub fn new(name: impl Into<String>, options: PerimeterOptions) -> Result<Arc<Self>> {
        Self::from_options(options.name(name))
    }

    /// Start building a perimeter named `name`.
    pub fn builder(name: impl Into<String>) -> PerimeterOptions {
        PerimeterOptions::new().name(name)
    }

    /// Build a perimeter from an options object that carries the name.
    pub fn from_options(options: PerimeterOptions) -> Result<Arc<Self>> {
        let PerimeterOptions {
            name,
            rules,
            permit,
            forbid,
            expose,
            operations,
            governess,
            state,
        } = options;

        let name = name.ok_or_else(|| policy::Error::InvalidPerimeterName(String::new()))?;
        ident::validate_perimeter_name(&name, SANDBOX_MEMBERS)?;

        let mut specs = rules;
        for spec in permit.into_iter().chain(forbid) {
            merge_spec(&mut specs, spec);
        }

        let context = RuleContext::new(name.clone(), state.clone());
        let rules = specs
            .iter()
            .map(|spec| Rule::from_spec(spec, context.clone()).map(Arc::new))
            .collect::<policy::Result<Vec<_>>>()?;

        let governess = match governess {
            Some(GovernessSource::Instance(g)) => Some(g),
            Some(GovernessSource::Factory(factory)) => match factory() {
                Ok(g) => Some(g),
                Err(e) => {
                    tracing::debug!(perimeter = %name, error = %e, "governess factory failed");
                    None
                }
            },
            None => None,
        };

        let perimeter = Arc::new(Self {
            id: Uuid::new_v4(),
            name,
            specs,
            rules,
            exposed: expose,
            operations,
            governess: RwLock::new(None),
            shadow: OnceLock::new(),
            container: OnceLock::new(),
            state,
        });
        if let Some(g) = governess {
            perimeter.set_governess(g);
        }
        Ok(perimeter)
    }

    /// Identity used to deduplicate learned rules.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parsed rules, bound to this perimeter's context.
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// The declared rule specs, shorthands merged.
    pub fn rule_specs(&self) -> &[RuleSpec] {
        &self.specs
    }

    pub fn exposed_names(&self) -> &[String] {
        &self.exposed
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    /// The exposed name whose operation is `operation`, by identity.
    pub fn exposed_name_of(&self, operation: &Operation) -> Option<&str> {
        self.exposed
            .iter()
            .find(|name| {
                self.operations
                    .get(name.as_str())
                    .is_some_and(|op| op.ptr_eq(operation))
            })
            .map(String::as_str)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The context this perimeter's rules are evaluated in.
    pub fn rule_context(&self) -> RuleContext {
        RuleContext::new(self.name.clone(), self.state.clone())
    }

    pub fn own_governess(&self) -> Option<Arc<dyn Governess>> {
        self.governess
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the own governess and teach it this perimeter's rules.
    /// Returns how many rules it learned.
    pub fn set_governess(&self, governess: Arc<dyn Governess>) -> usize {
        let learned = governess.learn_rules(self);
        *self.governess.write().unwrap_or_else(PoisonError::into_inner) = Some(governess);
        learned
    }

    /// The governess enforcing this perimeter: its own, else its sandbox's.
    pub fn governess(&self) -> Result<Arc<dyn Governess>> {
        if let Some(g) = self.own_governess() {
            return Ok(g);
        }
        self.sandbox().map(|s| s.governess()).ok_or_else(|| {
            Error::InvalidSandbox(format!(
                "perimeter {} has no governess and no sandbox",
                self.name
            ))
        })
    }

    /// The standalone governess its purpose consults when there is no own
    /// governess. Created on first attachment.
    pub fn shadow_governess(&self) -> Option<Arc<dyn Governess>> {
        self.shadow.get().cloned()
    }

    pub fn sandbox(&self) -> Option<Sandbox> {
        self.container
            .get()
            .and_then(Weak::upgrade)
            .map(Sandbox::from_inner)
    }

    /// The sandbox subject, if attached and of type `T`.
    pub fn subject<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.sandbox().and_then(|s| s.subject_as::<T>())
    }

    pub fn guard(&self, action: &str, args: &[Value]) -> Result<Value> {
        self.governess()?.guard(action, args)
    }

    /// Run `operation` through the enforcing governess with this
    /// perimeter as the calling context.
    pub fn governed(&self, operation: &Operation, args: &[Value]) -> Result<Value> {
        self.governess()?.governed(operation, args, self)
    }

    /// Unresolvable governess reads as deny.
    pub fn is_allowed(&self, action: &str, args: &[Value]) -> bool {
        self.governess()
            .map(|g| g.is_allowed(action, args))
            .unwrap_or(false)
    }

    pub fn is_not_allowed(&self, action: &str, args: &[Value]) -> bool {
        !self.is_allowed(action, args)
    }

    pub(crate) fn is_bound_elsewhere(&self, inner: &Arc<SandboxInner>) -> bool {
        self.container
            .get()
            .is_some_and(|bound| !std::ptr::eq(bound.as_ptr(), Arc::as_ptr(inner)))
    }

    /// Bind to a container. Binding happens once; a second, different
    /// container is rejected.
    pub(crate) fn bind(&self, inner: &Arc<SandboxInner>) -> Result<()> {
        if self.is_bound_elsewhere(inner) {
            return Err(Error::AlreadyAttached(self.name.clone()));
        }
        let _ = self.container.set(Arc::downgrade(inner));
        Ok(())
    }

    pub(crate) fn shadow_or_init(
        &self,
        init: impl FnOnce() -> Arc<dyn Governess>,
    ) -> Arc<dyn Governess> {
        Arc::clone(self.shadow.get_or_init(init))
    }
}

impl fmt::Debug for Perimeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Perimeter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rules", &self.rules)
            .field("exposed", &self.exposed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BaseGoverness, Strategy};
    use serde_json::json;

    #[test]
    fn test_name_plus_options_and_options_object() {
        let a = Perimeter::new("files", PerimeterOptions::new().permit("read", true)).unwrap();
        let b = PerimeterOptions::new()
            .name("files")
            .permit("read", true)
            .build()
            .unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(a.rules().len(), b.rules().len());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_missing_or_invalid_name() {
        assert!(matches!(
            PerimeterOptions::new().build(),
            Err(Error::Policy(policy::Error::InvalidPerimeterName(_)))
        ));
        assert!(matches!(
            Perimeter::builder("no spaces").build(),
            Err(Error::Policy(policy::Error::InvalidPerimeterName(_)))
        ));
        assert!(matches!(
            Perimeter::builder("attach_perimeter").build(),
            Err(Error::Policy(policy::Error::RestrictedIdentifier(_)))
        ));
    }

    #[test]
    fn test_shorthands_merge_into_rule_specs() {
        let p = Perimeter::builder("files")
            .rule("permit read", Definition::items(["a"]).unwrap())
            .permit("list", true)
            .forbid("write", true)
            .build()
            .unwrap();
        let texts: Vec<_> = p.rule_specs().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["permit read", "permit list", "forbid write"]);
        assert!(p.rules().iter().all(|r| r.context().origin() == Some("files")));
    }

    #[test]
    fn test_invalid_rule_fails_construction() {
        let err = Perimeter::builder("files")
            .rule("allow read", true)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Policy(policy::Error::InvalidRuleDefinition(_))));
    }

    #[test]
    fn test_own_governess_learns_at_construction() {
        let g: Arc<dyn Governess> = Arc::new(BaseGoverness::new());
        let p = Perimeter::builder("files")
            .permit("read", true)
            .governess(Arc::clone(&g))
            .build()
            .unwrap();
        assert!(g.is_allowed("read", &[]));
        assert!(p.is_allowed("read", &[]));
        assert!(p.is_not_allowed("write", &[]));
    }

    #[test]
    fn test_failing_factory_is_swallowed() {
        let p = Perimeter::builder("files")
            .permit("read", true)
            .governess_factory(|| Err(Error::InvalidGoverness("nope".into())))
            .build()
            .unwrap();
        assert!(p.own_governess().is_none());
        assert!(matches!(p.guard("read", &[]), Err(Error::InvalidSandbox(_))));
        assert!(!p.is_allowed("read", &[]));
    }

    #[test]
    fn test_factory_governess_is_used() {
        let p = Perimeter::builder("files")
            .permit("read", true)
            .governess_factory(|| Ok(Strategy::Permissive.build()))
            .build()
            .unwrap();
        assert_eq!(p.own_governess().unwrap().strategy_name(), "permissive");
    }

    #[test]
    fn test_set_governess_reteaches_rules() {
        let p = Perimeter::builder("files").permit("read", true).build().unwrap();
        let g: Arc<dyn Governess> = Arc::new(BaseGoverness::new());
        assert_eq!(p.set_governess(Arc::clone(&g)), 1);
        assert_eq!(g.learn_rules(&p), 0);
        assert_eq!(p.guard("read", &[json!("x")]).unwrap(), json!("x"));
    }

    #[test]
    fn test_exposed_name_of_uses_identity() {
        let p = Perimeter::builder("files")
            .expose("read", |_, _| Ok(json!("r")))
            .operation("helper", |_, _| Ok(json!("h")))
            .build()
            .unwrap();
        let read = p.operation("read").unwrap().clone();
        let helper = p.operation("helper").unwrap();
        let lookalike = Operation::new(|_, _| Ok(json!("r")));

        assert_eq!(p.exposed_name_of(&read), Some("read"));
        assert_eq!(p.exposed_name_of(helper), None);
        assert_eq!(p.exposed_name_of(&lookalike), None);
    }

    #[test]
    fn test_predicate_sees_perimeter_state() {
        let p = Perimeter::builder("bank")
            .permit(
                "withdraw",
                Definition::predicate(|ctx, args| {
                    let balance = ctx.state().get("balance").and_then(|v| v.as_i64());
                    let amount = args.first().and_then(Value::as_i64);
                    matches!((balance, amount), (Some(b), Some(a)) if a <= b)
                }),
            )
            .strategy(Strategy::Default)
            .build()
            .unwrap();
        p.state().set("balance", 10);
        assert!(p.is_allowed("withdraw", &[json!(5)]));
        assert!(p.is_not_allowed("withdraw", &[json!(50)]));
    }
}
