//! Directory repository traits
//!
//! Defines the store operations the membership rules consume.

use async_trait::async_trait;

use super::model::{GlobalRole, Membership, NewUser, Organization, User};
use crate::Result;

/// Lookup and creation of user accounts
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by email (normalized by the store)
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Get a user by id
    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Create a user. The first user of an empty directory becomes a global admin.
    async fn create_user(&self, new_user: NewUser) -> Result<User>;

    /// Change a user's global role
    async fn set_global_role(&self, user_id: &str, role: GlobalRole) -> Result<User>;
}

/// Membership rows keyed by (user, organization)
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn find_membership(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Option<Membership>>;

    /// Insert a membership.
    ///
    /// Fails with [`crate::Error::Conflict`] when the (user, organization)
    /// pair already has a row.
    async fn insert_membership(&self, membership: Membership) -> Result<Membership>;

    /// All memberships of an organization, oldest first
    async fn list_members(&self, organization_id: &str) -> Result<Vec<Membership>>;
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Create an organization and make `creator_user_id` its owner
    async fn create_organization(
        &self,
        name: &str,
        slug: Option<&str>,
        creator_user_id: &str,
    ) -> Result<(Organization, Membership)>;

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>>;
}

/// Everything the HTTP layer needs from a store
pub trait DirectoryStore: UserDirectory + MembershipRepository + OrganizationRepository {}

impl<T> DirectoryStore for T where T: UserDirectory + MembershipRepository + OrganizationRepository {}
