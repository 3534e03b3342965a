//! Sandbox descriptions loaded from TOML.

use policy::RuleSet;
use runtime::{Perimeter, Sandbox, Strategy};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
///
/// ```toml
/// governess = "default"
///
/// [[perimeter]]
/// name = "files"
///
/// [perimeter.permit]
/// read = ["notes.txt"]
///
/// [perimeter.forbid]
/// write = { pattern = "^/etc/" }
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Strategy of the sandbox's main governess.
    #[serde(default = "default_strategy")]
    pub governess: String,

    /// Perimeters to attach, in order.
    #[serde(default, rename = "perimeter")]
    pub perimeters: Vec<PerimeterConfig>,
}

/// One declared perimeter.
#[derive(Debug, Deserialize)]
pub struct PerimeterConfig {
    pub name: String,

    /// Strategy of an own governess; the sandbox's is used when absent.
    pub governess: Option<String>,

    /// Rule maps (`rules`, `permit`, `forbid`).
    #[serde(flatten)]
    pub rules: RuleSet,
}

fn default_strategy() -> String {
    "default".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build a sandbox with every declared perimeter attached.
    pub fn build(&self) -> runtime::Result<Sandbox> {
        let sandbox = Sandbox::with_strategy((), Strategy::from_name(&self.governess)?);
        for declared in &self.perimeters {
            let mut options = Perimeter::builder(&declared.name).rule_set(&declared.rules)?;
            if let Some(name) = &declared.governess {
                options = options.strategy(Strategy::from_name(name)?);
            }
            sandbox.attach_perimeter([options.build()?])?;
        }
        Ok(sandbox)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
governess = "default"

[[perimeter]]
name = "files"

[perimeter.permit]
read = ["notes.txt", "todo.md"]

[perimeter.forbid]
read = { pattern = "^/etc/" }

[[perimeter]]
name = "net"
governess = "permissive"

[perimeter.forbid]
fetch = ["evil.example"]
"#;

    #[test]
    fn test_parse_and_build() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.perimeters.len(), 2);
        assert_eq!(config.perimeters[1].governess.as_deref(), Some("permissive"));

        let sandbox = config.build().unwrap();
        let files = sandbox.purpose("files").unwrap();
        assert!(files.is_allowed("read", &[json!("notes.txt")]));
        assert!(files.is_not_allowed("read", &[json!("/etc/passwd")]));

        let net = sandbox.purpose("net").unwrap();
        assert!(net.is_allowed("fetch", &[json!("example.org")]));
        assert!(net.is_not_allowed("fetch", &[json!("evil.example")]));
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.governess, "default");
        assert!(config.perimeters.is_empty());
    }

    #[test]
    fn test_unknown_strategy() {
        let config = Config::parse("governess = \"lenient\"").unwrap();
        assert!(matches!(
            config.build(),
            Err(runtime::Error::InvalidGoverness(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::parse("[[perimeter]"),
            Err(ConfigError::Parse(_))
        ));
    }
}
