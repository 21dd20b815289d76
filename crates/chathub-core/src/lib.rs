//! # chathub-core
//!
//! Core crate for ChatHub. Contains the unified, wire-serializable error
//! system, typed identifiers, configuration schemas and the enterprise
//! capability contracts that concrete editions plug in at startup.
//!
//! This crate has **no** internal dependencies on other ChatHub crates.

pub mod config;
pub mod einterfaces;
pub mod error;
pub mod result;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
