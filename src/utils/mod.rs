//! Shared utilities

pub mod error;
pub mod executor;
pub mod fs;

pub use error::{AppError, AppResult, ErrorResponse};
