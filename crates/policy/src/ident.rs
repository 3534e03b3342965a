//! Identifier validation.
//!
//! Perimeter names, exposed operation names and rule actions all share the
//! same ASCII grammar (`^[A-Za-z_$][A-Za-z0-9_$]*$`) and the same denylist.
//! A name is additionally restricted when it collides with a member of the
//! object it is about to be attached to; callers pass those member names in.

use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Reserved words of the host language.
const RESERVED_WORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield",
];

/// Names that must never be installed on a bridge object.
const UNSAFE_NAMES: &[&str] = &[
    "constructor",
    "prototype",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "toLocaleString",
    "toString",
    "valueOf",
    "new",
    "drop",
    "clone",
    "fmt",
];

/// Returns true if `name` matches the identifier grammar.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Returns true if `name` is reserved, unsafe, or one of `members`.
pub fn is_restricted(name: &str, members: &[&str]) -> bool {
    RESERVED_WORDS.contains(&name) || UNSAFE_NAMES.contains(&name) || members.contains(&name)
}

/// Fails with [`Error::RestrictedIdentifier`] if `name` is restricted.
pub fn ensure_unrestricted(name: &str, members: &[&str]) -> Result<()> {
    if is_restricted(name, members) {
        return Err(Error::RestrictedIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validates a perimeter (capability) name against the grammar and denylist.
pub fn validate_perimeter_name(name: &str, members: &[&str]) -> Result<()> {
    if !is_identifier(name) {
        return Err(Error::InvalidPerimeterName(name.to_string()));
    }
    ensure_unrestricted(name, members)
}
