//! Explicit selection of an enforcement strategy.

use super::{
    AutoGuardAllGoverness, BaseGoverness, CountBalancedGoverness, Governess, MiddlewareGoverness,
    PermissiveGoverness,
};
use crate::{Error, Operation, Perimeter, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Host-supplied hook run by [`MiddlewareGoverness`] before every
/// protected call. Returning an error aborts the call.
pub type Middleware =
    Arc<dyn Fn(&dyn Governess, &Operation, &[Value], &Perimeter) -> Result<()> + Send + Sync>;

/// Which governess variant to build.
#[derive(Clone, Default)]
pub enum Strategy {
    #[default]
    Default,
    Permissive,
    AutoGuardAll,
    CountBalanced,
    Middleware(Middleware),
}

impl Strategy {
    /// Wrap a middleware closure.
    pub fn middleware<F>(f: F) -> Self
    where
        F: Fn(&dyn Governess, &Operation, &[Value], &Perimeter) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Strategy::Middleware(Arc::new(f))
    }

    /// Look up a strategy by name. Middleware cannot be named.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "default" | "base" => Ok(Strategy::Default),
            "permissive" => Ok(Strategy::Permissive),
            "auto_guard_all" => Ok(Strategy::AutoGuardAll),
            "count_balanced" => Ok(Strategy::CountBalanced),
            other => Err(Error::InvalidGoverness(format!(
                "unknown strategy {other:?}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Default => "default",
            Strategy::Permissive => "permissive",
            Strategy::AutoGuardAll => "auto_guard_all",
            Strategy::CountBalanced => "count_balanced",
            Strategy::Middleware(_) => "middleware",
        }
    }

    /// Build a new, rule-less governess.
    pub fn build(&self) -> Arc<dyn Governess> {
        match self {
            Strategy::Default => Arc::new(BaseGoverness::new()),
            Strategy::Permissive => Arc::new(PermissiveGoverness::new()),
            Strategy::AutoGuardAll => Arc::new(AutoGuardAllGoverness::new()),
            Strategy::CountBalanced => Arc::new(CountBalancedGoverness::new()),
            Strategy::Middleware(m) => Arc::new(MiddlewareGoverness::new(Arc::clone(m))),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for name in ["default", "permissive", "auto_guard_all", "count_balanced"] {
            let strategy = Strategy::from_name(name).unwrap();
            assert_eq!(strategy.name(), name);
            assert_eq!(strategy.build().strategy_name(), name);
        }
    }

    #[test]
    fn test_unknown_and_middleware_names_rejected() {
        assert!(matches!(
            Strategy::from_name("middleware"),
            Err(Error::InvalidGoverness(_))
        ));
        assert!("lenient".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_build_permissive_starts_unguarded() {
        assert!(Strategy::Permissive.build().is_unguarded());
        assert!(!Strategy::Default.build().is_unguarded());
    }
}
