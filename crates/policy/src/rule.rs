//! Parsed permit/forbid rules.

use crate::{Definition, DefinitionKind, Error, Result, ident};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

static RULE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"^((?i:permit|forbid|can|cannot)) ([A-Za-z_$][A-Za-z0-9_$]*)$").unwrap()
    });

/// Whether a rule grants or withholds an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Permit,
    Forbid,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Permit => f.write_str("permit"),
            Polarity::Forbid => f.write_str("forbid"),
        }
    }
}

/// Shared, mutable key/value state owned by a perimeter.
///
/// Cloning yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct State(Arc<RwLock<Map<String, Value>>>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Set a key, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// The context a rule is evaluated in.
///
/// Normally this is the perimeter that declared the rule, so predicates can
/// read perimeter-local state.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    origin: Option<String>,
    state: State,
}

impl RuleContext {
    pub fn new(origin: impl Into<String>, state: State) -> Self {
        Self {
            origin: Some(origin.into()),
            state,
        }
    }

    /// Name of the perimeter the rule came from, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

/// A declared but not yet parsed rule: raw rule text plus its definition.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub text: String,
    pub definition: Definition,
}

impl RuleSpec {
    pub fn new(text: impl Into<String>, definition: impl Into<Definition>) -> Self {
        Self {
            text: text.into(),
            definition: definition.into(),
        }
    }
}

/// Insert or replace a spec by rule text, keeping first-insertion order.
pub fn merge_spec(specs: &mut Vec<RuleSpec>, spec: RuleSpec) {
    match specs.iter_mut().find(|s| s.text == spec.text) {
        Some(existing) => *existing = spec,
        None => specs.push(spec),
    }
}

/// An atomic, parsed rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    text: String,
    polarity: Polarity,
    action: String,
    definition: Definition,
    strict: bool,
    context: RuleContext,
}

impl Rule {
    /// Parse `text` (`"permit <action>"` / `"forbid <action>"`, or the
    /// `can`/`cannot` aliases) and bind it to `definition` and `context`.
    pub fn new(text: &str, definition: Definition, context: RuleContext) -> Result<Self> {
        let caps = RULE_TEXT
            .captures(text)
            .ok_or_else(|| Error::InvalidRuleDefinition(format!("malformed rule {text:?}")))?;

        let polarity = match caps[1].to_ascii_lowercase().as_str() {
            "permit" | "can" => Polarity::Permit,
            _ => Polarity::Forbid,
        };
        let action = caps[2].to_string();
        if ident::is_restricted(&action, &[]) {
            return Err(Error::InvalidRuleDefinition(format!(
                "restricted action name {action:?}"
            )));
        }

        let strict = polarity == Polarity::Forbid || definition.is_strict();
        Ok(Self {
            text: text.to_string(),
            polarity,
            action,
            definition,
            strict,
            context,
        })
    }

    /// Build a rule from a declared spec.
    pub fn from_spec(spec: &RuleSpec, context: RuleContext) -> Result<Self> {
        Self::new(&spec.text, spec.definition.clone(), context)
    }

    /// The raw rule text as written.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn kind(&self) -> DefinitionKind {
        self.definition.kind()
    }

    /// Strict rules block the action whenever they fail to verify.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn context(&self) -> &RuleContext {
        &self.context
    }

    pub fn applies_to(&self, action: &str) -> bool {
        self.action == action
    }

    /// Raw definition match, ignoring polarity.
    pub fn matches(&self, args: &[Value]) -> bool {
        self.definition.matches(&self.context, args)
    }

    /// Whether the rule is satisfied: the match for permit rules, its
    /// negation for forbid rules.
    pub fn verify(&self, args: &[Value]) -> bool {
        self.verify_in(&self.context, args)
    }

    /// Like [`Rule::verify`], evaluated in an explicit context.
    pub fn verify_in(&self, context: &RuleContext, args: &[Value]) -> bool {
        let matched = self.definition.matches(context, args);
        match self.polarity {
            Polarity::Permit => matched,
            Polarity::Forbid => !matched,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.polarity, self.action, self.kind())
    }
}
