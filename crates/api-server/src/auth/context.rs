//! Caller resolution
//!
//! Turns the session token on a request into an [`AuthContext`]. A request
//! without a usable token is anonymous rather than rejected; the route
//! decides what anonymous callers may do.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use orgdesk_core::admission::{AuthContext, CallerIdentity};
use orgdesk_core::directory::{DirectoryStore, UserDirectory};
use tracing::{debug, error};

use super::session::SessionKeys;
use crate::routes::{internal_error, RouteError};
use crate::state::AppState;

/// Resolves callers from bearer tokens or the session cookie
#[derive(Clone)]
pub struct IdentityResolver {
    keys: SessionKeys,
    cookie_name: String,
}

impl IdentityResolver {
    pub fn new(keys: SessionKeys, cookie_name: impl Into<String>) -> Self {
        Self {
            keys,
            cookie_name: cookie_name.into(),
        }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Build the authorization context for one request.
    ///
    /// Only store failures are errors; bad or stale tokens give an
    /// anonymous context.
    pub async fn resolve(
        &self,
        store: &Arc<dyn DirectoryStore>,
        headers: &HeaderMap,
    ) -> orgdesk_core::Result<AuthContext> {
        let Some(token) = self.token_from_headers(headers) else {
            return Ok(AuthContext::anonymous());
        };

        let claims = match self.keys.verify(&token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("Ignoring session token: {}", err);
                return Ok(AuthContext::anonymous());
            }
        };

        match store.get_user(&claims.sub).await? {
            Some(user) => Ok(AuthContext::for_caller(CallerIdentity::from(&user))),
            None => {
                debug!(user_id = %claims.sub, "Session refers to unknown user");
                Ok(AuthContext::anonymous())
            }
        }
    }

    fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        bearer_token(headers).or_else(|| cookie_value(headers, &self.cookie_name))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Extractor handing the resolved [`AuthContext`] to a handler
pub struct CallerContext(pub AuthContext);

impl FromRequestParts<AppState> for CallerContext {
    type Rejection = RouteError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .identity()
            .resolve(state.store(), &parts.headers)
            .await
            .map(CallerContext)
            .map_err(|err| {
                error!("Failed to resolve caller: {}", err);
                internal_error(err)
            })
    }
}
