// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-state optional result for cached data.
//!
//! [`Reply`] is deliberately distinct from the error field of a state
//! snapshot: a failed refresh can still expose the last good value
//! (stale-while-error), because "no data yet" and "latest attempt failed"
//! are independent facts.
//!
//! # Example
//!
//! ```
//! use swr_engine::Reply;
//!
//! let a = Reply::Some(2);
//! let b = Reply::Some(3);
//! assert_eq!(Reply::combine2(a, b, |x, y| x * y), Reply::Some(6));
//!
//! let none: Reply<i32> = Reply::None;
//! assert_eq!(Reply::combine2(none, Reply::Some(3), |x, y| x * y), Reply::None);
//! ```

use crate::error::EngineError;

/// `None` (no data yet) or `Some(value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reply<T> {
    #[default]
    None,
    Some(T),
}

impl<T> Reply<T> {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn is_some(&self) -> bool {
        matches!(self, Self::Some(_))
    }

    /// Map the contained value, preserving `None`.
    #[must_use]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Reply<U> {
        match self {
            Self::None => Reply::None,
            Self::Some(v) => Reply::Some(f(v)),
        }
    }

    /// Return the value, or compute a fallback when `None`.
    pub fn get_or_else<F: FnOnce() -> T>(self, f: F) -> T {
        match self {
            Self::None => f(),
            Self::Some(v) => v,
        }
    }

    /// Return the value, or [`EngineError::NoValue`] when `None`.
    pub fn get_or_err(self) -> Result<T, EngineError> {
        match self {
            Self::None => Err(EngineError::NoValue),
            Self::Some(v) => Ok(v),
        }
    }

    #[must_use]
    pub fn as_ref(&self) -> Reply<&T> {
        match self {
            Self::None => Reply::None,
            Self::Some(v) => Reply::Some(v),
        }
    }

    /// Combine two replies; `Some` iff both inputs are `Some`.
    #[must_use]
    pub fn combine2<U, R, F>(a: Reply<T>, b: Reply<U>, f: F) -> Reply<R>
    where
        F: FnOnce(T, U) -> R,
    {
        match (a, b) {
            (Self::Some(x), Reply::Some(y)) => Reply::Some(f(x, y)),
            _ => Reply::None,
        }
    }

    /// Combine three replies; `Some` iff all inputs are `Some`.
    #[must_use]
    pub fn combine3<U, V, R, F>(a: Reply<T>, b: Reply<U>, c: Reply<V>, f: F) -> Reply<R>
    where
        F: FnOnce(T, U, V) -> R,
    {
        match (a, b, c) {
            (Self::Some(x), Reply::Some(y), Reply::Some(z)) => Reply::Some(f(x, y, z)),
            _ => Reply::None,
        }
    }
}

impl<T> From<Option<T>> for Reply<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Self::Some(v),
            None => Self::None,
        }
    }
}

impl<T> From<Reply<T>> for Option<T> {
    fn from(reply: Reply<T>) -> Self {
        match reply {
            Reply::Some(v) => Some(v),
            Reply::None => None,
        }
    }
}
