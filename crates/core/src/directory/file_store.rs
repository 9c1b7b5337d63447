//! File-based directory storage implementation
//!
//! Keeps users, organizations and memberships in memory and writes the
//! whole state to a JSON file after every mutation. A mutation becomes
//! visible only once its file write has succeeded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::model::{
    normalize_email, normalize_slug, GlobalRole, Membership, NewUser, Organization, OrgRole, User,
};
use super::repository::{MembershipRepository, OrganizationRepository, UserDirectory};
use crate::id::new_id;
use crate::{Error, Result};

#[derive(Debug, Default, Clone)]
struct DirectoryState {
    users: HashMap<String, User>,
    organizations: HashMap<String, Organization>,
    memberships: HashMap<String, Membership>,
}

impl DirectoryState {
    fn membership_for(&self, user_id: &str, organization_id: &str) -> Option<&Membership> {
        self.memberships.values().find(|membership| {
            membership.user_id == user_id && membership.organization_id == organization_id
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredDirectoryState {
    users: Vec<User>,
    organizations: Vec<Organization>,
    memberships: Vec<Membership>,
}

impl From<StoredDirectoryState> for DirectoryState {
    fn from(value: StoredDirectoryState) -> Self {
        Self {
            users: value
                .users
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect(),
            organizations: value
                .organizations
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect(),
            memberships: value
                .memberships
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect(),
        }
    }
}

impl From<&DirectoryState> for StoredDirectoryState {
    fn from(value: &DirectoryState) -> Self {
        let mut stored = Self {
            users: value.users.values().cloned().collect(),
            organizations: value.organizations.values().cloned().collect(),
            memberships: value.memberships.values().cloned().collect(),
        };
        stored.users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stored
            .organizations
            .sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stored
            .memberships
            .sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stored
    }
}

/// File-backed store implementing every directory trait
#[derive(Clone)]
pub struct FileDirectoryStore {
    state: Arc<RwLock<DirectoryState>>,
    file_path: PathBuf,
}

impl FileDirectoryStore {
    /// Open (or start) the store in `base_dir`
    ///
    /// The state file is created on first write.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;

        let file_path = base_dir.join("directory.json");
        let state = load_state(&file_path).await?;
        debug!(
            path = %file_path.display(),
            users = state.users.len(),
            memberships = state.memberships.len(),
            "Loaded directory state"
        );

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl UserDirectory for FileDirectoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state.users.values().find(|user| user.email == email).cloned())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(id).cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let email = normalize_email(&new_user.email);
        if email.is_empty() {
            return Err(Error::InvalidInput("Email cannot be empty".to_string()));
        }

        let mut state = self.state.write().await;
        if state.users.values().any(|user| user.email == email) {
            return Err(Error::Conflict(format!("User '{}' already exists", email)));
        }

        let role = if state.users.is_empty() {
            GlobalRole::Admin
        } else {
            GlobalRole::User
        };
        let user = User {
            id: new_id(),
            email,
            name: new_user.name.trim().to_string(),
            role,
            created_at: Utc::now(),
        };
        let mut next = state.clone();
        next.users.insert(user.id.clone(), user.clone());
        commit(&self.file_path, &mut state, next).await?;

        if role == GlobalRole::Admin {
            info!(user_id = %user.id, "First user promoted to global admin");
        }
        Ok(user)
    }

    async fn set_global_role(&self, user_id: &str, role: GlobalRole) -> Result<User> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let user = next
            .users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        user.role = role;
        let user = user.clone();
        commit(&self.file_path, &mut state, next).await?;
        Ok(user)
    }
}

#[async_trait]
impl MembershipRepository for FileDirectoryStore {
    async fn find_membership(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state.membership_for(user_id, organization_id).cloned())
    }

    async fn insert_membership(&self, membership: Membership) -> Result<Membership> {
        let mut state = self.state.write().await;
        if state
            .membership_for(&membership.user_id, &membership.organization_id)
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "Membership for user {} in organization {} already exists",
                membership.user_id, membership.organization_id
            )));
        }
        if state.memberships.contains_key(&membership.id) {
            return Err(Error::Conflict(format!(
                "Membership with ID {} already exists",
                membership.id
            )));
        }
        let mut next = state.clone();
        next.memberships
            .insert(membership.id.clone(), membership.clone());
        commit(&self.file_path, &mut state, next).await?;
        Ok(membership)
    }

    async fn list_members(&self, organization_id: &str) -> Result<Vec<Membership>> {
        let state = self.state.read().await;
        let mut members: Vec<Membership> = state
            .memberships
            .values()
            .filter(|membership| membership.organization_id == organization_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(members)
    }
}

#[async_trait]
impl OrganizationRepository for FileDirectoryStore {
    async fn create_organization(
        &self,
        name: &str,
        slug: Option<&str>,
        creator_user_id: &str,
    ) -> Result<(Organization, Membership)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Organization name cannot be empty".to_string(),
            ));
        }
        let slug = normalize_slug(slug.unwrap_or(name))?;

        let mut state = self.state.write().await;
        if !state.users.contains_key(creator_user_id) {
            return Err(Error::UserNotFound(creator_user_id.to_string()));
        }
        if state.organizations.values().any(|org| org.slug == slug) {
            return Err(Error::Conflict(format!(
                "Organization slug '{}' already exists",
                slug
            )));
        }

        let organization = Organization {
            id: new_id(),
            name: name.to_string(),
            slug,
            created_at: Utc::now(),
        };
        let membership = Membership::new(creator_user_id, organization.id.clone(), OrgRole::Owner);
        let mut next = state.clone();
        next.organizations
            .insert(organization.id.clone(), organization.clone());
        next.memberships
            .insert(membership.id.clone(), membership.clone());
        commit(&self.file_path, &mut state, next).await?;
        Ok((organization, membership))
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let state = self.state.read().await;
        Ok(state.organizations.get(id).cloned())
    }
}

async fn load_state(path: &Path) -> Result<DirectoryState> {
    if !path.exists() {
        return Ok(DirectoryState::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(DirectoryState::default());
    }
    let stored: StoredDirectoryState = serde_json::from_str(&content)?;
    Ok(stored.into())
}

/// Write `next` to disk, then swap it in. On failure `current` is untouched.
async fn commit(path: &Path, current: &mut DirectoryState, next: DirectoryState) -> Result<()> {
    persist_state(path, &next).await?;
    *current = next;
    Ok(())
}

async fn persist_state(path: &Path, state: &DirectoryState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredDirectoryState::from(state))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}
