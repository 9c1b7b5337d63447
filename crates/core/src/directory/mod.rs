//! Directory module
//!
//! Users, organizations and memberships, and the stores that hold them.

mod file_store;
mod model;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

pub use file_store::FileDirectoryStore;
pub use model::*;
#[cfg(feature = "postgres")]
pub use postgres::PgDirectoryStore;
pub use repository::{DirectoryStore, MembershipRepository, OrganizationRepository, UserDirectory};
