//! Utility module - shared helpers and types
//!
//! - [`AppError`] - HTTP-boundary error type
//! - [`logger`] - tracing setup
//! - [`validation`] - input validation helpers (text limits, phone, email)

pub mod error;
pub mod logger;
pub mod validation;

pub use error::{ok, AppError, AppResponse, AppResult};
