//! Governess runtime: in-process enforcement of declarative rules.
//!
//! This crate wires a host application's operations into a controlled
//! capability surface and checks a rule set before each call runs.
//!
//! # Overview
//!
//! - **Sandbox**: the composition root. Holds the subject object, the main
//!   governess, and every attached perimeter.
//! - **Perimeter**: a named capability surface. Declares its rules, the
//!   operations it exposes, and optionally its own governess.
//! - **Purpose**: the dispatch bridge created per capability name. Every
//!   exposed call is routed through the enforcing governess.
//! - **Governess**: the rule store and enforcement strategy; see
//!   [`Strategy`] for the available variants.
//!
//! Everything is synchronous and process-local.
//!
//! # Example
//!
//! ```
//! use runtime::{Perimeter, Sandbox, Strategy};
//! use policy::Definition;
//! use serde_json::json;
//!
//! let sandbox = Sandbox::with_strategy((), Strategy::AutoGuardAll);
//! let files = Perimeter::builder("files")
//!     .permit("read", Definition::pattern(r"\.txt$")?)
//!     .expose("read", |_, args| Ok(json!(format!("contents of {}", args[0]))))
//!     .build()?;
//! sandbox.attach_perimeter([files])?;
//!
//! assert!(sandbox.call("files", "read", &[json!("notes.txt")]).is_ok());
//! assert!(sandbox.call("files", "read", &[json!("id_rsa")]).is_err());
//! # Ok::<(), runtime::Error>(())
//! ```

mod error;
mod governess;
mod perimeter;
mod purpose;
mod sandbox;

pub use error::{Error, Result};
pub use governess::{
    AutoGuardAllGoverness, BaseGoverness, CountBalancedGoverness, Decision, Governess, Middleware,
    MiddlewareGoverness, PermissiveGoverness, Rulebook, Strategy, check,
};
pub use perimeter::{Operation, Perimeter, PerimeterOptions};
pub use purpose::Purpose;
pub use sandbox::Sandbox;
