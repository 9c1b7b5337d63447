//! Organization routes: creation and member admission.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use orgdesk_core::admission::{
    admit_member, AddMemberRequest, AdmissionError, ALREADY_MEMBER_MESSAGE,
    UNAUTHORIZED_MESSAGE, USER_NOT_FOUND_MESSAGE,
};
use orgdesk_core::directory::Organization;
use orgdesk_core::Error;
use serde::Deserialize;
use tracing::{error, info};

use super::{
    bad_request, internal_error, not_found, unauthorized, MessageResponse, RouteError,
};
use crate::auth::CallerContext;
use crate::state::AppState;

const ADDED_MESSAGE: &str = "User added to organization successfully";

#[derive(Debug, Deserialize)]
struct CreateOrganizationRequest {
    name: String,
    #[serde(default)]
    slug: Option<String>,
}

fn map_admission_error(organization_id: &str, err: AdmissionError) -> RouteError {
    match err {
        AdmissionError::Validation(message) => bad_request(message),
        AdmissionError::Unauthorized => unauthorized(UNAUTHORIZED_MESSAGE),
        AdmissionError::UserNotFound => not_found(USER_NOT_FOUND_MESSAGE),
        AdmissionError::AlreadyMember => bad_request(ALREADY_MEMBER_MESSAGE),
        AdmissionError::Store(err) => {
            error!(organization_id, "Failed to add user to organization: {}", err);
            internal_error(err)
        }
    }
}

async fn add_user_to_organization(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    CallerContext(ctx): CallerContext,
    payload: Result<Json<AddMemberRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), RouteError> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;

    admit_member(state.store().as_ref(), &ctx, &organization_id, &request)
        .await
        .map_err(|err| map_admission_error(&organization_id, err))?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: ADDED_MESSAGE.to_string(),
        }),
    ))
}

async fn create_organization(
    State(state): State<AppState>,
    CallerContext(ctx): CallerContext,
    payload: Result<Json<CreateOrganizationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Organization>), RouteError> {
    let caller = ctx
        .caller()
        .ok_or_else(|| unauthorized(UNAUTHORIZED_MESSAGE))?;
    let Json(req) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;

    let (organization, _owner) = state
        .store()
        .create_organization(&req.name, req.slug.as_deref(), &caller.user_id)
        .await
        .map_err(|err| match err {
            Error::InvalidInput(message) | Error::Conflict(message) => bad_request(message),
            Error::UserNotFound(_) => unauthorized(UNAUTHORIZED_MESSAGE),
            other => {
                error!("Failed to create organization: {}", other);
                internal_error(other)
            }
        })?;

    info!(
        organization_id = %organization.id,
        owner_id = %caller.user_id,
        "Organization created"
    );
    Ok((StatusCode::CREATED, Json(organization)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/organizations", post(create_organization))
        .route(
            "/organizations/{organizationId}/users",
            post(add_user_to_organization),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use orgdesk_core::directory::{
        DirectoryStore, FileDirectoryStore, GlobalRole, Membership, MembershipRepository,
        NewUser, OrgRole, OrganizationRepository, User, UserDirectory,
    };
    use orgdesk_core::Error;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::{config::AppConfig, routes, state::AppState};

    struct TestApp {
        app: Router,
        state: AppState,
        store: FileDirectoryStore,
        _temp_dir: TempDir,
    }

    fn test_config() -> AppConfig {
        AppConfig::from_lookup(|name| match name {
            "BASE_URL" => Some("http://localhost:3001".to_string()),
            "AUTH_SECRET" => Some("route-test-secret".to_string()),
            _ => None,
        })
        .unwrap()
    }

    async fn build_app() -> TestApp {
        let temp_dir = TempDir::new().unwrap();
        let store = FileDirectoryStore::new(temp_dir.path().join("directory"))
            .await
            .unwrap();
        let config = test_config();
        let state = AppState::with_store(&config, Arc::new(store.clone()));
        TestApp {
            app: routes::app(&config, state.clone()),
            state,
            store,
            _temp_dir: temp_dir,
        }
    }

    impl TestApp {
        async fn user(&self, email: &str, name: &str) -> User {
            self.store
                .create_user(NewUser::new(email, name))
                .await
                .unwrap()
        }

        fn token_for(&self, user: &User) -> String {
            self.state.identity().keys().issue(&user.id).unwrap().0
        }

        async fn join(&self, user: &User, organization_id: &str, role: OrgRole) {
            self.store
                .insert_membership(Membership::new(user.id.clone(), organization_id, role))
                .await
                .unwrap();
        }

        async fn post(&self, uri: &str, token: Option<&str>, body: Body) -> (StatusCode, Value) {
            post_to(&self.app, uri, token, body).await
        }

        async fn add_user(
            &self,
            organization_id: &str,
            token: Option<&str>,
            body: Value,
        ) -> (StatusCode, Value) {
            self.post(
                &format!("/organizations/{}/users", organization_id),
                token,
                Body::from(body.to_string()),
            )
            .await
        }

        async fn member_count(&self, organization_id: &str) -> usize {
            self.store.list_members(organization_id).await.unwrap().len()
        }
    }

    async fn post_to(app: &Router, uri: &str, token: Option<&str>, body: Body) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, payload)
    }

    /// root (global admin), alice owning org_1, bob with no memberships
    async fn seeded() -> (TestApp, User, User, User) {
        let t = build_app().await;
        let root = t.user("root@x.com", "Root").await;
        let alice = t.user("alice@x.com", "Alice").await;
        let bob = t.user("bob@x.com", "Bob").await;
        t.join(&alice, "org_1", OrgRole::Owner).await;
        (t, root, alice, bob)
    }

    #[tokio::test]
    async fn owner_adds_member_and_repeat_is_rejected() {
        let (t, _root, alice, bob) = seeded().await;
        let token = t.token_for(&alice);
        let body = json!({ "email": "bob@x.com", "role": "member" });

        let (status, payload) = t.add_user("org_1", Some(&token), body.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payload, json!({ "message": "User added to organization successfully" }));

        let membership = t
            .store
            .find_membership(&bob.id, "org_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, OrgRole::Member);
        assert_eq!(membership.organization_id, "org_1");

        let (status, payload) = t.add_user("org_1", Some(&token), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload,
            json!({ "error": "User is already a member of this organization" })
        );
        assert_eq!(t.member_count("org_1").await, 2);
    }

    #[tokio::test]
    async fn session_cookie_is_accepted() {
        let (t, _root, alice, _bob) = seeded().await;
        let token = t.token_for(&alice);

        let response = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/organizations/org_1/users")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::COOKIE, format!("orgdesk.session_token={}", token))
                    .body(Body::from(
                        json!({ "email": "bob@x.com", "role": "admin" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn invalid_email_is_bad_request() {
        let (t, _root, alice, _bob) = seeded().await;
        let token = t.token_for(&alice);

        let (status, payload) = t
            .add_user("org_1", Some(&token), json!({ "email": "bob-at-x", "role": "member" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "Invalid email format");
        assert_eq!(t.member_count("org_1").await, 1);
    }

    #[tokio::test]
    async fn invalid_role_is_bad_request() {
        let (t, _root, alice, _bob) = seeded().await;
        let token = t.token_for(&alice);

        let (status, payload) = t
            .add_user("org_1", Some(&token), json!({ "email": "bob@x.com", "role": "superuser" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload["error"],
            "Invalid enum value. Expected 'admin' | 'member' | 'owner', received 'superuser'"
        );
        assert_eq!(t.member_count("org_1").await, 1);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (t, _root, alice, _bob) = seeded().await;
        let token = t.token_for(&alice);

        let (status, payload) = t
            .post("/organizations/org_1/users", Some(&token), Body::from("{not json"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload["error"].is_string());
        assert_eq!(t.member_count("org_1").await, 1);
    }

    #[tokio::test]
    async fn anonymous_caller_is_unauthorized() {
        let (t, _root, _alice, _bob) = seeded().await;

        for organization_id in ["org_1", "org_2", "anything"] {
            let (status, payload) = t
                .add_user(organization_id, None, json!({ "email": "bob@x.com", "role": "member" }))
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(payload, json!({ "error": "Unauthorized" }));
        }

        let (status, _) = t
            .add_user("org_1", Some("garbage-token"), json!({ "email": "bob@x.com", "role": "member" }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(t.member_count("org_1").await, 1);
    }

    #[tokio::test]
    async fn plain_member_is_unauthorized() {
        let (t, _root, _alice, bob) = seeded().await;
        t.join(&bob, "org_1", OrgRole::Member).await;
        t.user("carol@x.com", "Carol").await;

        let (status, payload) = t
            .add_user(
                "org_1",
                Some(&t.token_for(&bob)),
                json!({ "email": "carol@x.com", "role": "member" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["error"], "Unauthorized");
        assert_eq!(t.member_count("org_1").await, 2);
    }

    #[tokio::test]
    async fn owner_of_other_org_is_unauthorized() {
        let (t, _root, alice, _bob) = seeded().await;

        let (status, _) = t
            .add_user(
                "org_2",
                Some(&t.token_for(&alice)),
                json!({ "email": "bob@x.com", "role": "member" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(t.member_count("org_2").await, 0);
    }

    #[tokio::test]
    async fn org_admin_can_add_users() {
        let (t, _root, _alice, bob) = seeded().await;
        let carol = t.user("carol@x.com", "Carol").await;
        t.join(&carol, "org_1", OrgRole::Admin).await;

        let (status, _) = t
            .add_user(
                "org_1",
                Some(&t.token_for(&carol)),
                json!({ "email": "bob@x.com", "role": "owner" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let membership = t.store.find_membership(&bob.id, "org_1").await.unwrap();
        assert_eq!(membership.map(|m| m.role), Some(OrgRole::Owner));
    }

    #[tokio::test]
    async fn global_admin_can_add_to_any_organization() {
        let (t, root, _alice, bob) = seeded().await;
        assert_eq!(root.role, GlobalRole::Admin);

        let (status, _) = t
            .add_user(
                "org_without_root",
                Some(&t.token_for(&root)),
                json!({ "email": "bob@x.com", "role": "admin" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let members = t.store.list_members("org_without_root").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, bob.id);
        assert_eq!(members[0].role, OrgRole::Admin);
    }

    #[tokio::test]
    async fn unknown_email_is_not_found() {
        let (t, _root, alice, _bob) = seeded().await;

        let (status, payload) = t
            .add_user(
                "org_1",
                Some(&t.token_for(&alice)),
                json!({ "email": "nobody@x.com", "role": "member" }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload, json!({ "error": "User not found" }));
        assert_eq!(t.member_count("org_1").await, 1);
    }

    #[tokio::test]
    async fn creator_owns_new_organization() {
        let (t, _root, alice, bob) = seeded().await;
        let token = t.token_for(&alice);

        let (status, org) = t
            .post(
                "/organizations",
                Some(&token),
                Body::from(json!({ "name": "Frog Works" }).to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(org["slug"], "frog-works");
        let org_id = org["id"].as_str().unwrap().to_string();

        let owner = t.store.find_membership(&alice.id, &org_id).await.unwrap();
        assert_eq!(owner.map(|m| m.role), Some(OrgRole::Owner));

        let (status, _) = t
            .add_user(&org_id, Some(&token), json!({ "email": bob.email, "role": "member" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn create_organization_rejects_bad_requests() {
        let (t, _root, alice, _bob) = seeded().await;
        let token = t.token_for(&alice);

        let (status, _) = t
            .post(
                "/organizations",
                None,
                Body::from(json!({ "name": "Frog Works" }).to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, payload) = t
            .post(
                "/organizations",
                Some(&token),
                Body::from(json!({ "name": "   " }).to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "Organization name cannot be empty");

        let (status, _) = t
            .post(
                "/organizations",
                Some(&token),
                Body::from(json!({ "name": "Frog Works" }).to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = t
            .post(
                "/organizations",
                Some(&token),
                Body::from(json!({ "name": "Other", "slug": "frog works" }).to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let t = build_app().await;
        let response = t
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["status"], "ok");
    }

    #[tokio::test]
    async fn preflight_allows_trusted_origin() {
        let t = build_app().await;
        let response = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/organizations/org_1/users")
                    .header(header::ORIGIN, "http://localhost:3002")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3002"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .unwrap(),
            "true"
        );
    }

    /// File store with scripted misbehavior layered on top
    struct ScriptedStore {
        inner: FileDirectoryStore,
        /// Email lookups fail, as if the database went away
        unreachable_lookups: bool,
        /// Another request inserts the same membership between the
        /// duplicate check and the insert
        lose_insert_race: bool,
    }

    impl ScriptedStore {
        fn new(inner: FileDirectoryStore) -> Self {
            Self {
                inner,
                unreachable_lookups: false,
                lose_insert_race: false,
            }
        }
    }

    #[async_trait]
    impl UserDirectory for ScriptedStore {
        async fn find_user_by_email(&self, email: &str) -> orgdesk_core::Result<Option<User>> {
            if self.unreachable_lookups {
                return Err(Error::Storage("connection refused".to_string()));
            }
            self.inner.find_user_by_email(email).await
        }

        async fn get_user(&self, id: &str) -> orgdesk_core::Result<Option<User>> {
            self.inner.get_user(id).await
        }

        async fn create_user(&self, new_user: NewUser) -> orgdesk_core::Result<User> {
            self.inner.create_user(new_user).await
        }

        async fn set_global_role(
            &self,
            user_id: &str,
            role: GlobalRole,
        ) -> orgdesk_core::Result<User> {
            self.inner.set_global_role(user_id, role).await
        }
    }

    #[async_trait]
    impl MembershipRepository for ScriptedStore {
        async fn find_membership(
            &self,
            user_id: &str,
            organization_id: &str,
        ) -> orgdesk_core::Result<Option<Membership>> {
            self.inner.find_membership(user_id, organization_id).await
        }

        async fn insert_membership(
            &self,
            membership: Membership,
        ) -> orgdesk_core::Result<Membership> {
            if self.lose_insert_race {
                let rival = Membership::new(
                    membership.user_id.clone(),
                    membership.organization_id.clone(),
                    OrgRole::Admin,
                );
                self.inner.insert_membership(rival).await?;
            }
            self.inner.insert_membership(membership).await
        }

        async fn list_members(
            &self,
            organization_id: &str,
        ) -> orgdesk_core::Result<Vec<Membership>> {
            self.inner.list_members(organization_id).await
        }
    }

    #[async_trait]
    impl OrganizationRepository for ScriptedStore {
        async fn create_organization(
            &self,
            name: &str,
            slug: Option<&str>,
            creator_user_id: &str,
        ) -> orgdesk_core::Result<(orgdesk_core::directory::Organization, Membership)> {
            self.inner
                .create_organization(name, slug, creator_user_id)
                .await
        }

        async fn get_organization(
            &self,
            id: &str,
        ) -> orgdesk_core::Result<Option<orgdesk_core::directory::Organization>> {
            self.inner.get_organization(id).await
        }
    }

    /// App over a scripted store holding root (global admin) and bob
    async fn scripted_app(
        configure: impl FnOnce(&mut ScriptedStore),
    ) -> (Router, String, FileDirectoryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let inner = FileDirectoryStore::new(temp_dir.path()).await.unwrap();
        let root = inner
            .create_user(NewUser::new("root@x.com", "Root"))
            .await
            .unwrap();
        inner
            .create_user(NewUser::new("bob@x.com", "Bob"))
            .await
            .unwrap();

        let mut scripted = ScriptedStore::new(inner.clone());
        configure(&mut scripted);
        let config = test_config();
        let store: Arc<dyn DirectoryStore> = Arc::new(scripted);
        let state = AppState::with_store(&config, store);
        let token = state.identity().keys().issue(&root.id).unwrap().0;
        (routes::app(&config, state), token, inner, temp_dir)
    }

    #[tokio::test]
    async fn store_failure_is_internal_error() {
        let (app, token, _inner, _temp_dir) =
            scripted_app(|store| store.unreachable_lookups = true).await;

        let (status, payload) = post_to(
            &app,
            "/organizations/org_1/users",
            Some(&token),
            Body::from(json!({ "email": "bob@x.com", "role": "member" }).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload, json!({ "error": "Storage error: connection refused" }));
    }

    #[tokio::test]
    async fn losing_the_insert_race_reports_already_member() {
        let (app, token, inner, _temp_dir) =
            scripted_app(|store| store.lose_insert_race = true).await;

        let (status, payload) = post_to(
            &app,
            "/organizations/org_1/users",
            Some(&token),
            Body::from(json!({ "email": "bob@x.com", "role": "member" }).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload,
            json!({ "error": "User is already a member of this organization" })
        );

        // Only the concurrent writer's row exists.
        let members = inner.list_members("org_1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, OrgRole::Admin);
    }
}
