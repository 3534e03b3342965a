//! Declarative rule sets loaded from TOML.

use crate::{Definition, Error, Result, RuleSpec, merge_spec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Rules declared as data.
///
/// `rules` holds full rule texts; `permit` and `forbid` are shorthands whose
/// keys are action names.
///
/// ```toml
/// [rules]
/// "permit read" = ["notes.txt", "todo.md"]
///
/// [permit]
/// list = true
///
/// [forbid]
/// write = { pattern = "^/etc/" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Full rule texts mapped to their definitions.
    #[serde(default)]
    pub rules: BTreeMap<String, Value>,

    /// Actions permitted under the given definition.
    #[serde(default)]
    pub permit: BTreeMap<String, Value>,

    /// Actions forbidden under the given definition.
    #[serde(default)]
    pub forbid: BTreeMap<String, Value>,
}

impl RuleSet {
    /// Load a rule set from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a rule set from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.permit.is_empty() && self.forbid.is_empty()
    }

    /// Classify every definition and merge the shorthands into rule specs.
    ///
    /// Later entries replace earlier ones with the same rule text, in the
    /// order `rules`, `permit`, `forbid`.
    pub fn to_specs(&self) -> Result<Vec<RuleSpec>> {
        let mut specs = Vec::new();
        for (text, value) in &self.rules {
            merge_spec(&mut specs, spec(text.clone(), value)?);
        }
        for (action, value) in &self.permit {
            merge_spec(&mut specs, spec(format!("permit {action}"), value)?);
        }
        for (action, value) in &self.forbid {
            merge_spec(&mut specs, spec(format!("forbid {action}"), value)?);
        }
        Ok(specs)
    }
}

fn spec(text: String, value: &Value) -> Result<RuleSpec> {
    let definition = Definition::from_value(value.clone())
        .map_err(|e| Error::InvalidRuleDefinition(format!("{text}: {e}")))?;
    Ok(RuleSpec { text, definition })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DefinitionKind;

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[rules]
"permit read" = ["notes.txt", "todo.md"]

[permit]
list = true

[forbid]
write = { pattern = "^/etc/" }
"#;
        let set = RuleSet::parse(toml).unwrap();
        let specs = set.to_specs().unwrap();

        let texts: Vec<_> = specs.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["permit read", "permit list", "forbid write"]);
        assert_eq!(specs[0].definition.kind(), DefinitionKind::ItemSet);
        assert_eq!(specs[1].definition.kind(), DefinitionKind::Always);
        assert_eq!(specs[2].definition.kind(), DefinitionKind::Pattern);
    }

    #[test]
    fn test_shorthand_overrides_rule_map() {
        let toml = r#"
[rules]
"permit list" = false

[permit]
list = true
"#;
        let specs = RuleSet::parse(toml).unwrap().to_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert!(matches!(specs[0].definition, Definition::Always(true)));
    }

    #[test]
    fn test_unclassifiable_definition() {
        let set = RuleSet::parse("[permit]\nread = \"yes\"\n").unwrap();
        let err = set.to_specs().unwrap_err();
        assert!(matches!(err, Error::InvalidRuleDefinition(msg) if msg.starts_with("permit read")));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(RuleSet::parse("[permit"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_empty() {
        assert!(RuleSet::default().is_empty());
    }
}
