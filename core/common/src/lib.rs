//! Common utilities and types shared across Sealdrop modules.
//!
//! This module provides the error taxonomy, the result algebra used for
//! expected failures (`Maybe`, `Either`, `Unit`) and small validated newtypes.

pub mod error;
pub mod monad;
pub mod types;

pub use error::{Error, Result};
pub use monad::{Either, Maybe, Unit};
pub use types::{EmailAddress, TransferId, Username};
