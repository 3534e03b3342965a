//! Dispatch bridges between callers and perimeter operations.

use crate::sandbox::SandboxInner;
use crate::{Decision, Error, Governess, Operation, Perimeter, Result, Sandbox};
use policy::ident;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Names an exposed operation may not take.
pub(crate) const PURPOSE_MEMBERS: &[&str] = &[
    "name",
    "call",
    "guard",
    "is_allowed",
    "is_not_allowed",
    "decide",
    "attach_perimeter",
    "operation_names",
    "has_operation",
    "perimeter",
    "sandbox",
];

/// A bound call route: run `operation` through `perimeter`'s enforcement.
#[derive(Clone)]
struct Trampoline {
    perimeter: Arc<Perimeter>,
    operation: Operation,
}

impl Trampoline {
    fn call(&self, args: &[Value]) -> Result<Value> {
        self.perimeter.governed(&self.operation, args)
    }
}

/// The caller-facing side of a capability: a registry of trampolines, one
/// per exposed operation name.
///
/// One purpose exists per (sandbox, capability name); attaching further
/// perimeters under the same name reuses it.
pub struct Purpose {
    name: String,
    container: Weak<SandboxInner>,
    trampolines: RwLock<HashMap<String, Trampoline>>,
    perimeter: RwLock<Option<Arc<Perimeter>>>,
}

impl Purpose {
    pub(crate) fn new(name: impl Into<String>, container: Weak<SandboxInner>) -> Self {
        Self {
            name: name.into(),
            container,
            trampolines: RwLock::default(),
            perimeter: RwLock::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sandbox(&self) -> Option<Sandbox> {
        self.container.upgrade().map(Sandbox::from_inner)
    }

    /// The perimeter most recently attached under this name.
    pub fn perimeter(&self) -> Option<Arc<Perimeter>> {
        self.perimeter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a trampoline for every exposed operation of `perimeter`.
    ///
    /// All names are validated before anything is installed. An operation
    /// name already routed to another perimeter is overwritten with a
    /// warning.
    pub fn attach_perimeter(&self, perimeter: &Arc<Perimeter>) -> Result<()> {
        let routes = check_exposure(perimeter)?;

        let mut trampolines = self.trampolines.write().unwrap_or_else(PoisonError::into_inner);
        for (name, operation) in routes {
            let replaced = trampolines.insert(
                name.clone(),
                Trampoline {
                    perimeter: Arc::clone(perimeter),
                    operation,
                },
            );
            if let Some(old) = replaced
                && old.perimeter.id() != perimeter.id()
            {
                tracing::warn!(
                    purpose = %self.name,
                    operation = %name,
                    "exposed operation overwritten by another perimeter"
                );
            }
        }
        drop(trampolines);

        *self.perimeter.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(perimeter));
        Ok(())
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.trampolines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Installed operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .trampolines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Invoke an exposed operation through its governess.
    pub fn call(&self, operation: &str, args: &[Value]) -> Result<Value> {
        let trampoline = self
            .trampolines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned()
            .ok_or_else(|| Error::UnknownOperation {
                purpose: self.name.clone(),
                operation: operation.to_string(),
            })?;
        trampoline.call(args)
    }

    pub fn guard(&self, action: &str, args: &[Value]) -> Result<Value> {
        self.standalone_governess()?.guard(action, args)
    }

    /// Evaluate an action without running or guarding anything.
    pub fn decide(&self, action: &str, args: &[Value]) -> Result<Decision> {
        Ok(self.standalone_governess()?.decide(action, args))
    }

    pub fn is_allowed(&self, action: &str, args: &[Value]) -> bool {
        self.standalone_governess()
            .map(|g| g.is_allowed(action, args))
            .unwrap_or(false)
    }

    pub fn is_not_allowed(&self, action: &str, args: &[Value]) -> bool {
        !self.is_allowed(action, args)
    }

    /// The perimeter's own governess, else its shadow. Never the
    /// sandbox's main governess.
    fn standalone_governess(&self) -> Result<Arc<dyn Governess>> {
        let perimeter = self
            .perimeter()
            .ok_or_else(|| Error::InvalidSandbox(format!("purpose {} has no perimeter", self.name)))?;
        perimeter
            .own_governess()
            .or_else(|| perimeter.shadow_governess())
            .ok_or_else(|| {
                Error::InvalidGoverness(format!(
                    "perimeter {} has neither own nor shadow governess",
                    perimeter.name()
                ))
            })
    }
}

/// Resolve every exposed name of `perimeter` to its operation.
pub(crate) fn check_exposure(perimeter: &Perimeter) -> Result<Vec<(String, Operation)>> {
    perimeter
        .exposed_names()
        .iter()
        .map(|name| {
            ident::ensure_unrestricted(name, PURPOSE_MEMBERS)?;
            let operation = perimeter
                .operation(name)
                .ok_or_else(|| Error::MissingExposedOperation {
                    perimeter: perimeter.name().to_string(),
                    operation: name.clone(),
                })?;
            Ok((name.clone(), operation.clone()))
        })
        .collect()
}

impl fmt::Debug for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Purpose")
            .field("name", &self.name)
            .field("operations", &self.operation_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BaseGoverness, PerimeterOptions};
    use serde_json::json;

    fn detached(name: &str) -> Purpose {
        Purpose::new(name, Weak::new())
    }

    #[test]
    fn test_missing_exposed_operation() {
        let p = Perimeter::builder("files").exposing(["read"]).build().unwrap();
        let err = detached("files").attach_perimeter(&p).unwrap_err();
        assert!(matches!(err, Error::MissingExposedOperation { operation, .. } if operation == "read"));
    }

    #[test]
    fn test_restricted_exposed_name() {
        let p = Perimeter::builder("files")
            .expose("guard", |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        assert!(matches!(
            detached("files").attach_perimeter(&p),
            Err(Error::Policy(policy::Error::RestrictedIdentifier(_)))
        ));

        let p = Perimeter::builder("files")
            .expose("toString", |_, _| Ok(Value::Null))
            .build()
            .unwrap();
        assert!(detached("files").attach_perimeter(&p).is_err());
    }

    #[test]
    fn test_failed_attach_installs_nothing() {
        let p = Perimeter::builder("files")
            .expose("read", |_, _| Ok(Value::Null))
            .exposing(["write"])
            .build()
            .unwrap();
        let purpose = detached("files");
        assert!(purpose.attach_perimeter(&p).is_err());
        assert!(purpose.operation_names().is_empty());
        assert!(purpose.perimeter().is_none());
    }

    #[test]
    fn test_call_routes_through_own_governess() {
        let p = PerimeterOptions::new()
            .name("files")
            .permit("read", true)
            .expose("read", |p, args| p.guard("read", args))
            .governess(Arc::new(BaseGoverness::new()))
            .build()
            .unwrap();
        let purpose = detached("files");
        purpose.attach_perimeter(&p).unwrap();

        assert_eq!(purpose.operation_names(), ["read"]);
        assert_eq!(purpose.call("read", &[json!("a.txt")]).unwrap(), json!("a.txt"));
        assert!(purpose.is_allowed("read", &[]));
        assert!(matches!(
            purpose.call("write", &[]),
            Err(Error::UnknownOperation { .. })
        ));
    }

    #[test]
    fn test_overwrite_by_other_perimeter() {
        let first = Perimeter::builder("files")
            .expose("read", |_, _| Ok(json!(1)))
            .strategy(crate::Strategy::Permissive)
            .build()
            .unwrap();
        let second = Perimeter::builder("files")
            .expose("read", |_, _| Ok(json!(2)))
            .strategy(crate::Strategy::Permissive)
            .build()
            .unwrap();
        let purpose = detached("files");
        purpose.attach_perimeter(&first).unwrap();
        purpose.attach_perimeter(&second).unwrap();

        assert_eq!(purpose.call("read", &[]).unwrap(), json!(2));
        assert_eq!(purpose.perimeter().unwrap().id(), second.id());
    }

    #[test]
    fn test_standalone_queries_without_governess() {
        let p = Perimeter::builder("files").permit("read", true).build().unwrap();
        let purpose = detached("files");
        purpose.attach_perimeter(&p).unwrap();
        assert!(purpose.is_not_allowed("read", &[]));
        assert!(matches!(purpose.guard("read", &[]), Err(Error::InvalidGoverness(_))));
    }
}
