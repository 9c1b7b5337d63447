//! Core library for Orgdesk
//!
//! This crate contains the organization membership domain, including:
//! - Users, organizations and memberships
//! - Store traits with file-backed and PostgreSQL implementations
//! - The membership admission rules (validation, authorization, duplicate guard)

pub mod admission;
pub mod directory;
pub mod error;
pub mod id;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
