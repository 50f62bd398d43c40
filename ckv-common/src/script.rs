//! # Server-Side Scripts
//!
//! Purpose: Name the Lua bodies the lock manager ships to the store and
//! describe the reply shape of a script evaluation.
//!
//! ## Design Principles
//! 1. **Static Bodies**: Scripts are `&'static str` constants so the exact
//!    bytes sent to the server never change between calls.
//! 2. **Recognisable Builtins**: Backends without a scripting runtime match on
//!    [`BuiltinScript`] and run an equivalent atomic primitive instead.

use std::borrow::Cow;

/// Deletes `KEYS[1]` only when its value equals `ARGV[1]`.
///
/// Returns 1 when the key was removed, 0 otherwise.
pub const COMPARE_AND_DELETE: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then \
return redis.call('del', KEYS[1]) else return 0 end";

/// Sets a TTL of `ARGV[2]` milliseconds on `KEYS[1]` only when its value
/// equals `ARGV[1]`.
///
/// Returns 1 when the TTL was applied, 0 otherwise.
pub const COMPARE_AND_EXPIRE: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then \
return redis.call('pexpire', KEYS[1], ARGV[2]) else return 0 end";

/// Atomic primitives a backend may implement natively instead of running Lua.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinScript {
    CompareAndDelete,
    CompareAndExpire,
}

/// A script body to evaluate on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    body: Cow<'static, str>,
}

impl Script {
    /// Wraps an arbitrary script body.
    pub fn new(body: impl Into<Cow<'static, str>>) -> Self {
        Script { body: body.into() }
    }

    /// Ownership-checked delete used to release locks.
    pub const fn compare_and_delete() -> Self {
        Script {
            body: Cow::Borrowed(COMPARE_AND_DELETE),
        }
    }

    /// Ownership-checked TTL refresh used to renew locks.
    pub const fn compare_and_expire() -> Self {
        Script {
            body: Cow::Borrowed(COMPARE_AND_EXPIRE),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Identifies the body when it is one of the shipped builtins.
    pub fn builtin(&self) -> Option<BuiltinScript> {
        match self.body.as_ref() {
            COMPARE_AND_DELETE => Some(BuiltinScript::CompareAndDelete),
            COMPARE_AND_EXPIRE => Some(BuiltinScript::CompareAndExpire),
            _ => None,
        }
    }
}

/// Value returned by a script evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptReply {
    Nil,
    Integer(i64),
    Status(String),
    Bulk(Vec<u8>),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScriptReply::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_builtins() {
        assert_eq!(
            Script::compare_and_delete().builtin(),
            Some(BuiltinScript::CompareAndDelete)
        );
        assert_eq!(
            Script::compare_and_expire().builtin(),
            Some(BuiltinScript::CompareAndExpire)
        );
        assert_eq!(Script::new("return 1").builtin(), None);
    }

    #[test]
    fn owned_body_matches_builtin() {
        let script = Script::new(COMPARE_AND_DELETE.to_string());
        assert_eq!(script.builtin(), Some(BuiltinScript::CompareAndDelete));
    }

    #[test]
    fn integer_accessor() {
        assert_eq!(ScriptReply::Integer(1).as_integer(), Some(1));
        assert_eq!(ScriptReply::Nil.as_integer(), None);
    }
}
