//! Result algebra for expected outcomes.
//!
//! `Maybe` marks absent/present values and `Either` marks failed/succeeded
//! outcomes. Neither ever panics to signal an expected absence or failure;
//! fatal conditions are reported through [`crate::Error`] instead.

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Marker for an operation that succeeded with no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit;

/// An optional value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Maybe<T> {
    /// A value is present.
    Some(T),
    /// No value.
    None,
}

impl<T> Maybe<T> {
    /// Check if a value is present.
    pub fn is_some(&self) -> bool {
        matches!(self, Maybe::Some(_))
    }

    /// Check if no value is present.
    pub fn is_none(&self) -> bool {
        matches!(self, Maybe::None)
    }

    /// Borrow the inner value.
    pub fn as_ref(&self) -> Maybe<&T> {
        match self {
            Maybe::Some(value) => Maybe::Some(value),
            Maybe::None => Maybe::None,
        }
    }

    /// Transform the present value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Maybe<U> {
        match self {
            Maybe::Some(value) => Maybe::Some(f(value)),
            Maybe::None => Maybe::None,
        }
    }

    /// Sequence a computation that may itself produce no value.
    pub fn bind<U, F: FnOnce(T) -> Maybe<U>>(self, f: F) -> Maybe<U> {
        match self {
            Maybe::Some(value) => f(value),
            Maybe::None => Maybe::None,
        }
    }

    /// Fold both branches into a single value.
    pub fn match_with<U>(self, none: impl FnOnce() -> U, some: impl FnOnce(T) -> U) -> U {
        match self {
            Maybe::Some(value) => some(value),
            Maybe::None => none(),
        }
    }

    /// Return the value or a default.
    pub fn some_or(self, default: T) -> T {
        match self {
            Maybe::Some(value) => value,
            Maybe::None => default,
        }
    }

    /// Run a side effect when a value is present.
    pub fn if_some<F: FnOnce(&T)>(self, f: F) -> Self {
        if let Maybe::Some(value) = &self {
            f(value);
        }
        self
    }

    /// Run an async side effect when a value is present.
    pub async fn if_some_async<F, Fut>(self, f: F)
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        if let Maybe::Some(value) = self {
            f(value).await;
        }
    }

    /// Convert to an `Either`, using `left` when no value is present.
    pub fn to_either<L>(self, left: impl FnOnce() -> L) -> Either<L, T> {
        match self {
            Maybe::Some(value) => Either::Right(value),
            Maybe::None => Either::Left(left()),
        }
    }

    /// Convert into a standard `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Maybe::Some(value) => Some(value),
            Maybe::None => None,
        }
    }
}

impl<T> Default for Maybe<T> {
    fn default() -> Self {
        Maybe::None
    }
}

impl<T> From<Option<T>> for Maybe<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Maybe::Some(value),
            None => Maybe::None,
        }
    }
}

/// Either a failure (`Left`) or a success (`Right`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    /// The operation failed with an expected error.
    Left(L),
    /// The operation succeeded.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Check if this is a failure.
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    /// Check if this is a success.
    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// Borrow both branches.
    pub fn as_ref(&self) -> Either<&L, &R> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => Either::Right(right),
        }
    }

    /// Transform the success value.
    pub fn map<U, F: FnOnce(R) -> U>(self, f: F) -> Either<L, U> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => Either::Right(f(right)),
        }
    }

    /// Transform the failure value.
    pub fn map_left<U, F: FnOnce(L) -> U>(self, f: F) -> Either<U, R> {
        match self {
            Either::Left(left) => Either::Left(f(left)),
            Either::Right(right) => Either::Right(right),
        }
    }

    /// Sequence a computation that may itself fail.
    pub fn bind<U, F: FnOnce(R) -> Either<L, U>>(self, f: F) -> Either<L, U> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => f(right),
        }
    }

    /// Sequence an async computation that may itself fail.
    pub async fn bind_async<U, F, Fut>(self, f: F) -> Either<L, U>
    where
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = Either<L, U>>,
    {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => f(right).await,
        }
    }

    /// Fold both branches into a single value.
    pub fn match_with<U>(self, left: impl FnOnce(L) -> U, right: impl FnOnce(R) -> U) -> U {
        match self {
            Either::Left(value) => left(value),
            Either::Right(value) => right(value),
        }
    }

    /// Run a side effect on success.
    pub fn do_right<F: FnOnce(&R)>(self, f: F) -> Self {
        if let Either::Right(value) = &self {
            f(value);
        }
        self
    }

    /// Run an async side effect on success.
    pub async fn do_right_async<F, Fut>(self, f: F) -> Self
    where
        F: FnOnce(&R) -> Fut,
        Fut: Future<Output = ()>,
    {
        if let Either::Right(value) = &self {
            f(value).await;
        }
        self
    }

    /// Return the success value or a default.
    pub fn right_or(self, default: R) -> R {
        match self {
            Either::Left(_) => default,
            Either::Right(value) => value,
        }
    }

    /// The failure value, if any.
    pub fn left(self) -> Maybe<L> {
        match self {
            Either::Left(value) => Maybe::Some(value),
            Either::Right(_) => Maybe::None,
        }
    }

    /// The success value, if any.
    pub fn right(self) -> Maybe<R> {
        match self {
            Either::Left(_) => Maybe::None,
            Either::Right(value) => Maybe::Some(value),
        }
    }

    /// Convert into a standard `Result`.
    pub fn into_result(self) -> std::result::Result<R, L> {
        match self {
            Either::Left(left) => Err(left),
            Either::Right(right) => Ok(right),
        }
    }
}

impl<L, R> From<std::result::Result<R, L>> for Either<L, R> {
    fn from(value: std::result::Result<R, L>) -> Self {
        match value {
            Ok(right) => Either::Right(right),
            Err(left) => Either::Left(left),
        }
    }
}
