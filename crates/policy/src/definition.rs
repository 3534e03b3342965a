//! Rule definitions: what a rule tests its arguments against.

use crate::{Error, Result, RuleContext};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A custom rule predicate.
///
/// Receives the rule's evaluation context and every argument of the
/// protected call.
pub type Predicate = Arc<dyn Fn(&RuleContext, &[Value]) -> bool + Send + Sync>;

/// The JSON kinds an [`Item::Kind`] can match by membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// The kind of a concrete value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

/// One entry of an item-set definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Matches a value equal to this one.
    Equals(Value),
    /// Matches any value of this kind.
    Kind(ValueKind),
}

impl Item {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Item::Equals(expected) => same_value(expected, value),
            Item::Kind(kind) => ValueKind::of(value) == *kind,
        }
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::Equals(value)
    }
}

impl From<&str> for Item {
    fn from(value: &str) -> Self {
        Item::Equals(Value::String(value.to_string()))
    }
}

impl From<ValueKind> for Item {
    fn from(kind: ValueKind) -> Self {
        Item::Kind(kind)
    }
}

/// Classification of a [`Definition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Always,
    ItemSet,
    Pattern,
    Predicate,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionKind::Always => "always",
            DefinitionKind::ItemSet => "item_set",
            DefinitionKind::Pattern => "pattern",
            DefinitionKind::Predicate => "predicate",
        };
        f.write_str(name)
    }
}

/// What a rule tests the arguments of a protected call against.
#[derive(Clone)]
pub enum Definition {
    /// A fixed outcome, independent of the arguments.
    Always(bool),
    /// The first argument must match one of the items.
    Items(Vec<Item>),
    /// The stringified first argument must match the pattern.
    Pattern(Regex),
    /// A custom function over all arguments.
    Predicate(Predicate),
}

impl Definition {
    /// Build an item-set definition. The set must not be empty.
    pub fn items<I, T>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        let items: Vec<Item> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Err(Error::InvalidRuleDefinition(
                "item set must not be empty".to_string(),
            ));
        }
        Ok(Definition::Items(items))
    }

    /// Build a pattern definition from a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Definition::Pattern)
            .map_err(|e| Error::InvalidRuleDefinition(format!("bad pattern {pattern:?}: {e}")))
    }

    /// Build a predicate definition.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&RuleContext, &[Value]) -> bool + Send + Sync + 'static,
    {
        Definition::Predicate(Arc::new(f))
    }

    /// Classify a declarative definition value.
    ///
    /// Booleans become [`Definition::Always`], non-empty arrays become item
    /// sets and `{ "pattern": "..." }` objects become patterns. Anything
    /// else is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(Definition::Always(b)),
            Value::Array(items) => Self::items(items),
            Value::Object(mut map) if map.len() == 1 && map.contains_key("pattern") => {
                match map.remove("pattern") {
                    Some(Value::String(p)) => Self::pattern(&p),
                    other => Err(Error::InvalidRuleDefinition(format!(
                        "pattern must be a string, got {other:?}"
                    ))),
                }
            }
            other => Err(Error::InvalidRuleDefinition(format!(
                "cannot classify definition {other}"
            ))),
        }
    }

    pub fn kind(&self) -> DefinitionKind {
        match self {
            Definition::Always(_) => DefinitionKind::Always,
            Definition::Items(_) => DefinitionKind::ItemSet,
            Definition::Pattern(_) => DefinitionKind::Pattern,
            Definition::Predicate(_) => DefinitionKind::Predicate,
        }
    }

    /// Pattern and predicate definitions are strict even on permit rules.
    pub fn is_strict(&self) -> bool {
        matches!(self, Definition::Pattern(_) | Definition::Predicate(_))
    }

    /// Test the definition against call arguments, ignoring polarity.
    pub fn matches(&self, context: &RuleContext, args: &[Value]) -> bool {
        match self {
            Definition::Always(b) => *b,
            Definition::Items(items) => args
                .first()
                .is_some_and(|target| items.iter().any(|item| item.accepts(target))),
            Definition::Pattern(re) => args
                .first()
                .and_then(stringlike)
                .is_some_and(|s| re.is_match(&s)),
            Definition::Predicate(f) => f(context, args),
        }
    }
}

impl From<bool> for Definition {
    fn from(value: bool) -> Self {
        Definition::Always(value)
    }
}

impl From<Regex> for Definition {
    fn from(re: Regex) -> Self {
        Definition::Pattern(re)
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Always(b) => f.debug_tuple("Always").field(b).finish(),
            Definition::Items(items) => f.debug_tuple("Items").field(items).finish(),
            Definition::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Definition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// JSON equality, except that numbers compare by value (`1` equals `1.0`).
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_f64() || y.is_f64() => {
            x.as_f64() == y.as_f64()
        }
        _ => a == b,
    }
}

/// Textual form of a scalar value; `None` for values with no natural string form.
fn stringlike(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RuleContext {
        RuleContext::default()
    }

    #[test]
    fn test_from_value_classification() {
        assert_eq!(Definition::from_value(json!(true)).unwrap().kind(), DefinitionKind::Always);
        assert_eq!(
            Definition::from_value(json!(["a", "b"])).unwrap().kind(),
            DefinitionKind::ItemSet
        );
        assert_eq!(
            Definition::from_value(json!({ "pattern": "^a" })).unwrap().kind(),
            DefinitionKind::Pattern
        );
    }

    #[test]
    fn test_from_value_rejects_unclassifiable() {
        for value in [json!([]), json!("text"), json!(3), json!(null), json!({ "x": 1 })] {
            assert!(matches!(
                Definition::from_value(value),
                Err(Error::InvalidRuleDefinition(_))
            ));
        }
        assert!(Definition::from_value(json!({ "pattern": "(" })).is_err());
    }

    #[test]
    fn test_item_set_matches_first_argument() {
        let def = Definition::items(["notes.txt", "todo.md"]).unwrap();
        assert!(def.matches(&ctx(), &[json!("notes.txt"), json!("ignored")]));
        assert!(!def.matches(&ctx(), &[json!("secrets.env")]));
        assert!(!def.matches(&ctx(), &[]));
    }

    #[test]
    fn test_item_numbers_compare_by_value() {
        let def = Definition::items([json!(1), json!(2.5)]).unwrap();
        assert!(def.matches(&ctx(), &[json!(1)]));
        assert!(def.matches(&ctx(), &[json!(1.0)]));
        assert!(def.matches(&ctx(), &[json!(2.5)]));
        assert!(!def.matches(&ctx(), &[json!(1.5)]));
        assert!(!def.matches(&ctx(), &[json!("1")]));
    }

    #[test]
    fn test_item_set_type_membership() {
        let def = Definition::items([Item::Kind(ValueKind::Number), Item::from("all")]).unwrap();
        assert!(def.matches(&ctx(), &[json!(42)]));
        assert!(def.matches(&ctx(), &[json!("all")]));
        assert!(!def.matches(&ctx(), &[json!("some")]));
    }

    #[test]
    fn test_pattern_stringifies_scalars() {
        let def = Definition::pattern(r"^\d+$").unwrap();
        assert!(def.matches(&ctx(), &[json!("123")]));
        assert!(def.matches(&ctx(), &[json!(123)]));
        assert!(!def.matches(&ctx(), &[json!("12a")]));
        assert!(!def.matches(&ctx(), &[json!([1])]));
        assert!(!def.matches(&ctx(), &[]));
    }

    #[test]
    fn test_predicate_receives_all_arguments() {
        let def = Definition::predicate(|_, args| args.len() == 2 && args[1] == json!(7));
        assert!(def.matches(&ctx(), &[json!("x"), json!(7)]));
        assert!(!def.matches(&ctx(), &[json!("x")]));
    }

    #[test]
    fn test_strictness_by_kind() {
        assert!(!Definition::Always(true).is_strict());
        assert!(!Definition::items(["a"]).unwrap().is_strict());
        assert!(Definition::pattern("a").unwrap().is_strict());
        assert!(Definition::predicate(|_, _| true).is_strict());
    }
}
