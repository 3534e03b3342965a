//! The composition root.

use crate::purpose::{Purpose, check_exposure};
use crate::{BaseGoverness, Error, Governess, Perimeter, Result, Strategy};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Names a perimeter may not take.
pub(crate) const SANDBOX_MEMBERS: &[&str] = &[
    "subject",
    "governess",
    "assign_governess",
    "attach_perimeter",
    "get_perimeter",
    "has_perimeter",
    "perimeters",
    "purpose",
    "purposes",
    "call",
    "guard",
    "is_allowed",
    "is_not_allowed",
    "do_unguarded",
];

pub(crate) struct SandboxInner {
    subject: Arc<dyn Any + Send + Sync>,
    governess: RwLock<Arc<dyn Governess>>,
    perimeters: RwLock<Vec<Arc<Perimeter>>>,
    purposes: RwLock<HashMap<String, Arc<Purpose>>>,
}

/// Holds the subject, the main governess, and every attached perimeter.
///
/// Cloning yields another handle to the same sandbox.
///
/// # Example
///
/// ```
/// use runtime::{Perimeter, Sandbox};
/// use serde_json::json;
///
/// let sandbox = Sandbox::new(());
/// let files = Perimeter::builder("files")
///     .permit("read", true)
///     .expose("read", |p, args| p.guard("read", args))
///     .build()?;
/// sandbox.attach_perimeter([files])?;
///
/// let out = sandbox.call("files", "read", &[json!("notes.txt")])?;
/// assert_eq!(out, json!("notes.txt"));
/// # Ok::<(), runtime::Error>(())
/// ```
#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<SandboxInner>,
}

impl Sandbox {
    /// A sandbox around `subject` enforced by a [`BaseGoverness`].
    pub fn new<S: Any + Send + Sync>(subject: S) -> Self {
        Self::with_governess(subject, Arc::new(BaseGoverness::new()))
    }

    pub fn with_strategy<S: Any + Send + Sync>(subject: S, strategy: Strategy) -> Self {
        Self::with_governess(subject, strategy.build())
    }

    pub fn with_governess<S: Any + Send + Sync>(subject: S, governess: Arc<dyn Governess>) -> Self {
        Self {
            inner: Arc::new(SandboxInner {
                subject: Arc::new(subject),
                governess: RwLock::new(governess),
                perimeters: RwLock::default(),
                purposes: RwLock::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SandboxInner>) -> Self {
        Self { inner }
    }

    pub fn subject(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.inner.subject)
    }

    pub fn subject_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.subject().downcast::<T>().ok()
    }

    /// The main governess.
    pub fn governess(&self) -> Arc<dyn Governess> {
        self.inner
            .governess
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the main governess and teach it every attached perimeter's
    /// rules. Returns how many rules it learned.
    pub fn assign_governess(&self, governess: Arc<dyn Governess>) -> usize {
        let learned = self
            .perimeters()
            .iter()
            .map(|p| governess.learn_rules(p))
            .sum();
        *self
            .inner
            .governess
            .write()
            .unwrap_or_else(PoisonError::into_inner) = governess;
        learned
    }

    /// Attach perimeters. A perimeter whose name is already attached is
    /// skipped. Returns how many were newly attached.
    pub fn attach_perimeter<I>(&self, perimeters: I) -> Result<usize>
    where
        I: IntoIterator<Item = Arc<Perimeter>>,
    {
        let mut attached = 0;
        for perimeter in perimeters {
            if self.has_perimeter(perimeter.name()) {
                tracing::debug!(perimeter = perimeter.name(), "perimeter already attached");
                continue;
            }
            if perimeter.is_bound_elsewhere(&self.inner) {
                return Err(Error::AlreadyAttached(perimeter.name().to_string()));
            }
            check_exposure(&perimeter)?;

            if let Some(own) = perimeter.own_governess() {
                own.learn_rules(&perimeter);
            }
            let main = self.governess();
            let shadow = perimeter.shadow_or_init(|| main.fresh());
            shadow.learn_rules(&perimeter);
            main.learn_rules(&perimeter);

            perimeter.bind(&self.inner)?;
            self.inner
                .perimeters
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&perimeter));

            self.purpose_or_create(perimeter.name())
                .attach_perimeter(&perimeter)?;
            tracing::debug!(
                perimeter = perimeter.name(),
                exposed = perimeter.exposed_names().len(),
                "perimeter attached"
            );
            attached += 1;
        }
        Ok(attached)
    }

    pub fn get_perimeter(&self, name: &str) -> Option<Arc<Perimeter>> {
        self.inner
            .perimeters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn has_perimeter(&self, name: &str) -> bool {
        self.get_perimeter(name).is_some()
    }

    /// Attached perimeters in attachment order.
    pub fn perimeters(&self) -> Vec<Arc<Perimeter>> {
        self.inner
            .perimeters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn purpose(&self, name: &str) -> Result<Arc<Purpose>> {
        self.inner
            .purposes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPurpose(name.to_string()))
    }

    /// Call an exposed operation: `sandbox.call("files", "read", args)`.
    pub fn call(&self, purpose: &str, operation: &str, args: &[Value]) -> Result<Value> {
        self.purpose(purpose)?.call(operation, args)
    }

    pub fn guard(&self, action: &str, args: &[Value]) -> Result<Value> {
        self.governess().guard(action, args)
    }

    pub fn is_allowed(&self, action: &str, args: &[Value]) -> bool {
        self.governess().is_allowed(action, args)
    }

    pub fn is_not_allowed(&self, action: &str, args: &[Value]) -> bool {
        !self.is_allowed(action, args)
    }

    /// Run `f` with the main governess unguarded.
    pub fn do_unguarded<R>(&self, f: impl FnOnce() -> R) -> R {
        self.governess().do_unguarded(f)
    }

    fn purpose_or_create(&self, name: &str) -> Arc<Purpose> {
        let mut purposes = self
            .inner
            .purposes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            purposes
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Purpose::new(name, Arc::downgrade(&self.inner)))),
        )
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .perimeters()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        f.debug_struct("Sandbox")
            .field("governess", &self.governess().strategy_name())
            .field("perimeters", &names)
            .finish_non_exhaustive()
    }
}
