//! Session tokens and per-request caller resolution.

mod context;
mod session;

pub use context::{CallerContext, IdentityResolver};
pub use session::{SessionClaims, SessionError, SessionKeys};
