//! Common utilities and types shared across backsync modules.
//!
//! This module provides the error taxonomy used by every backend and by the
//! sync engine, plus small formatting helpers for run summaries.

pub mod clock;
pub mod error;

pub use clock::{format_clock, format_elapsed};
pub use error::{Error, Result};
