//! Rule storage and verdict evaluation.

use policy::{Polarity, Rule};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Result of evaluating an action, with the rule texts behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `permitted_by` is empty when no rule was consulted (unguarded).
    Allow { permitted_by: Vec<String> },
    Deny {
        reason: String,
        blocked_by: Vec<String>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// One-line account of the verdict and the rules that produced it.
    pub fn explain(&self) -> String {
        match self {
            Decision::Allow { permitted_by } if permitted_by.is_empty() => "allow".to_string(),
            Decision::Allow { permitted_by } => {
                format!("allow: permitted by {}", quoted(permitted_by))
            }
            Decision::Deny { reason, blocked_by } if blocked_by.is_empty() => {
                format!("deny: {reason}")
            }
            Decision::Deny { blocked_by, .. } => {
                format!("deny: blocked by {}", quoted(blocked_by))
            }
        }
    }

    fn allow() -> Self {
        Decision::Allow {
            permitted_by: Vec::new(),
        }
    }
}

fn blocked_reason(blocked_by: &[String]) -> Option<String> {
    blocked_by
        .first()
        .map(|text| format!("blocked by rule {text:?}"))
}

fn quoted(texts: &[String]) -> String {
    texts
        .iter()
        .map(|t| format!("{t:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug)]
struct Entry {
    rule: Arc<Rule>,
    origin: Option<Uuid>,
}

/// Append-only rule list plus the unguarded flag.
///
/// Rules learned from a perimeter are deduplicated per (rule text,
/// perimeter); rules added directly are always appended.
#[derive(Debug, Default)]
pub struct Rulebook {
    entries: RwLock<Vec<Entry>>,
    unguarded: AtomicBool,
}

impl Rulebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rulebook that starts unguarded.
    pub fn unguarded() -> Self {
        Self {
            entries: RwLock::default(),
            unguarded: AtomicBool::new(true),
        }
    }

    pub fn is_unguarded(&self) -> bool {
        self.unguarded.load(Ordering::SeqCst)
    }

    pub fn set_unguarded(&self, unguarded: bool) {
        self.unguarded.store(unguarded, Ordering::SeqCst);
    }

    pub fn add(&self, rule: Rule) {
        self.write().push(Entry {
            rule: Arc::new(rule),
            origin: None,
        });
    }

    /// Learn `rules` from the perimeter `origin`, skipping texts already
    /// learned from it. Returns how many were new.
    pub fn learn(&self, origin: Uuid, rules: &[Arc<Rule>]) -> usize {
        let mut entries = self.write();
        let mut learned = 0;
        for rule in rules {
            let known = entries
                .iter()
                .any(|e| e.origin == Some(origin) && e.rule.text() == rule.text());
            if !known {
                entries.push(Entry {
                    rule: Arc::clone(rule),
                    origin: Some(origin),
                });
                learned += 1;
            }
        }
        learned
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Rules that apply to `action`, in learning order.
    pub fn rules_for(&self, action: &str) -> Vec<Arc<Rule>> {
        self.read()
            .iter()
            .filter(|e| e.rule.applies_to(action))
            .map(|e| Arc::clone(&e.rule))
            .collect()
    }

    /// Every rule, in learning order.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.read().iter().map(|e| Arc::clone(&e.rule)).collect()
    }

    /// The standard verdict.
    ///
    /// Unguarded: allow. Otherwise the action needs at least one verified
    /// permit rule and no strict rule that failed to verify.
    pub fn decide(&self, action: &str, args: &[Value]) -> Decision {
        if self.is_unguarded() {
            return Decision::allow();
        }

        let mut permitted_by = Vec::new();
        let mut blocked_by = Vec::new();
        // Rules are copied out first so predicates may re-enter the governess.
        for rule in self.rules_for(action) {
            let verified = rule.verify(args);
            if verified && rule.polarity() == Polarity::Permit {
                permitted_by.push(rule.text().to_string());
            }
            if !verified && rule.is_strict() {
                blocked_by.push(rule.text().to_string());
            }
        }

        if let Some(reason) = blocked_reason(&blocked_by) {
            Decision::Deny { reason, blocked_by }
        } else if permitted_by.is_empty() {
            Decision::Deny {
                reason: format!("no rule permits {action}"),
                blocked_by,
            }
        } else {
            Decision::Allow { permitted_by }
        }
    }

    /// Forbid-only screening: allow unless a forbid rule matched.
    pub fn screen_forbidden(&self, action: &str, args: &[Value]) -> Decision {
        let blocked_by: Vec<String> = self
            .rules_for(action)
            .into_iter()
            .filter(|rule| rule.polarity() == Polarity::Forbid && !rule.verify(args))
            .map(|rule| rule.text().to_string())
            .collect();
        match blocked_reason(&blocked_by) {
            Some(reason) => Decision::Deny { reason, blocked_by },
            None => Decision::allow(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
