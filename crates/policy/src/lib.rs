//! Rule representation for the governess authorization runtime.
//!
//! A [`Rule`] is an atomic predicate over an action name: a polarity
//! (permit or forbid) and a [`Definition`] that its call arguments are tested
//! against. Rules are parsed from rule texts such as `"permit read"` or
//! `"forbid delete"`, and can be declared as data through a [`RuleSet`].
//!
//! # Example
//!
//! ```
//! use policy::{Definition, Rule, RuleContext};
//! use serde_json::json;
//!
//! let rule = Rule::new(
//!     "permit read",
//!     Definition::items(["notes.txt", "todo.md"])?,
//!     RuleContext::default(),
//! )?;
//! assert!(rule.verify(&[json!("notes.txt")]));
//! assert!(!rule.verify(&[json!("secrets.env")]));
//! # Ok::<(), policy::Error>(())
//! ```

mod definition;
mod error;
pub mod ident;
mod rule;
mod ruleset;

pub use definition::{Definition, DefinitionKind, Item, Predicate, ValueKind};
pub use error::{Error, Result};
pub use rule::{Polarity, Rule, RuleContext, RuleSpec, State, merge_spec};
pub use ruleset::RuleSet;
