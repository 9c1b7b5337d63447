//! Membership admission
//!
//! Adds an existing user to an organization. The steps run in a fixed
//! order and each one short-circuits:
//!
//! 1. validate the request body (email, then role)
//! 2. authorize the caller against the target organization
//! 3. resolve the target user by email
//! 4. reject an existing (user, organization) membership
//! 5. insert the new membership
//!
//! Nothing is written before step 5, so a rejection never leaves state behind.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use validator::ValidateEmail;

use crate::directory::{DirectoryStore, GlobalRole, Membership, MembershipRepository, OrgRole, User};
use crate::Error;

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
pub const USER_NOT_FOUND_MESSAGE: &str = "User not found";
pub const ALREADY_MEMBER_MESSAGE: &str = "User is already a member of this organization";
pub const INVALID_EMAIL_MESSAGE: &str = "Invalid email format";
pub const REQUIRED_MESSAGE: &str = "Required";

/// Why an admission did not produce a membership
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("{0}")]
    Validation(String),

    /// Covers both a missing identity and an under-privileged caller.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("User not found")]
    UserNotFound,

    #[error("User is already a member of this organization")]
    AlreadyMember,

    #[error(transparent)]
    Store(#[from] Error),
}

/// Raw request body, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddMemberRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl AddMemberRequest {
    pub fn new(email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            role: Some(role.into()),
        }
    }

    /// Check the body and return the first problem found, email before role.
    pub fn validate(&self) -> Result<ValidAdmission, AdmissionError> {
        let email = match self.email.as_deref() {
            None => return Err(AdmissionError::Validation(REQUIRED_MESSAGE.to_string())),
            Some(email) if !email.validate_email() => {
                return Err(AdmissionError::Validation(INVALID_EMAIL_MESSAGE.to_string()))
            }
            Some(email) => email.to_string(),
        };

        let role = match self.role.as_deref() {
            None => return Err(AdmissionError::Validation(REQUIRED_MESSAGE.to_string())),
            Some(role) => role
                .parse::<OrgRole>()
                .map_err(|_| AdmissionError::Validation(invalid_role_message(role)))?,
        };

        Ok(ValidAdmission { email, role })
    }
}

fn invalid_role_message(received: &str) -> String {
    let expected = OrgRole::ALL
        .iter()
        .map(|role| format!("'{}'", role.as_str()))
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "Invalid enum value. Expected {}, received '{}'",
        expected, received
    )
}

/// A request body that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidAdmission {
    pub email: String,
    pub role: OrgRole,
}

/// The authenticated principal behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub email: String,
    pub role: GlobalRole,
}

impl From<&User> for CallerIdentity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Per-request authorization facts, resolved once before the handler runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    caller: Option<CallerIdentity>,
    global_admin: bool,
}

impl AuthContext {
    /// A request with no resolved identity
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A request from `caller`; the global-admin capability follows the
    /// caller's platform role.
    pub fn for_caller(caller: CallerIdentity) -> Self {
        let global_admin = caller.role == GlobalRole::Admin;
        Self {
            caller: Some(caller),
            global_admin,
        }
    }

    pub fn caller(&self) -> Option<&CallerIdentity> {
        self.caller.as_ref()
    }

    pub fn is_global_admin(&self) -> bool {
        self.global_admin
    }
}

/// Decide whether the caller may add members to `organization_id`.
///
/// Global admins pass without any lookup. Everyone else needs an owner or
/// admin membership in that exact organization.
pub async fn authorize_member_management<S>(
    store: &S,
    ctx: &AuthContext,
    organization_id: &str,
) -> Result<(), AdmissionError>
where
    S: MembershipRepository + ?Sized,
{
    if ctx.is_global_admin() {
        return Ok(());
    }

    let Some(caller) = ctx.caller() else {
        debug!(organization_id, "Rejecting anonymous member admission");
        return Err(AdmissionError::Unauthorized);
    };

    let membership = store
        .find_membership(&caller.user_id, organization_id)
        .await?;
    match membership {
        Some(membership) if membership.role.can_manage_members() => Ok(()),
        _ => {
            debug!(
                organization_id,
                user_id = %caller.user_id,
                "Caller lacks owner/admin role in organization"
            );
            Err(AdmissionError::Unauthorized)
        }
    }
}

/// Run the full admission for one request.
pub async fn admit_member<S>(
    store: &S,
    ctx: &AuthContext,
    organization_id: &str,
    request: &AddMemberRequest,
) -> Result<Membership, AdmissionError>
where
    S: DirectoryStore + ?Sized,
{
    let admission = request.validate()?;

    authorize_member_management(store, ctx, organization_id).await?;

    let user = store
        .find_user_by_email(&admission.email)
        .await?
        .ok_or(AdmissionError::UserNotFound)?;

    if store
        .find_membership(&user.id, organization_id)
        .await?
        .is_some()
    {
        return Err(AdmissionError::AlreadyMember);
    }

    let membership = Membership::new(user.id, organization_id, admission.role);
    // A concurrent admission can pass the check above; the store's own
    // uniqueness guarantee catches it here.
    let membership = store
        .insert_membership(membership)
        .await
        .map_err(|err| match err {
            Error::Conflict(_) => AdmissionError::AlreadyMember,
            other => AdmissionError::Store(other),
        })?;

    info!(
        membership_id = %membership.id,
        organization_id,
        user_id = %membership.user_id,
        role = %membership.role,
        "User added to organization"
    );
    Ok(membership)
}
