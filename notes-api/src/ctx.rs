use axum::{
    extract::{Extension, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    credentials::Credentials,
    users::{self, UserId},
    Error, DB,
};

#[derive(Clone, Debug, FromRequestParts)]
pub struct BaseParams {
    pub ctx: Ctx,
    #[from_request(via(Extension))]
    pub db: DB,
}

impl BaseParams {
    #[cfg(test)]
    pub fn new(db: DB, ctx: Ctx) -> Self {
        Self { db, ctx }
    }
}

/// Principal recovered from a verified bearer token.
#[derive(Debug, Serialize, Clone, JsonSchema)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub user: Option<User>,
}

impl Ctx {
    #[cfg(test)]
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }

    pub fn require_user(&self) -> crate::Result<&User> {
        self.user.as_ref().ok_or(Error::Unauthorized)
    }

    pub fn require_user_id(&self) -> crate::Result<UserId> {
        self.require_user().map(|u| u.id)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<Ctx>() {
            return Ok(ctx.clone());
        }

        let Some(token) = bearer_token(&parts.headers).map(str::to_owned) else {
            return Ok(Self { user: None });
        };

        let Extension(credentials) = parts
            .extract::<Extension<Credentials>>()
            .await
            .map_err(|e| Error::Unexpected(e.to_string()))?;

        // An invalid token is treated as anonymous; protected handlers answer 401.
        let claims = match credentials.verify_token(&token) {
            Ok(claims) => claims,
            Err(error) => {
                tracing::debug!("rejected bearer token: {error:?}");
                return Ok(Self { user: None });
            }
        };

        let Extension(db) = parts
            .extract::<Extension<DB>>()
            .await
            .map_err(|e| Error::Unexpected(e.to_string()))?;

        // The account may have been deleted after the token was issued.
        let user_id = claims.sub;
        let user = db
            .call(move |conn| users::find_by_id(conn, user_id).map_err(|e| e.into()))
            .await?
            .map(|user| User {
                id: user.id,
                username: user.username,
                email: user.email,
            });
        if user.is_none() {
            tracing::debug!("bearer token for unknown user {user_id}");
        }

        Ok(Self { user })
    }
}

/// Resolves the principal once per request; handlers reuse it from the
/// request extensions.
pub async fn with_ctx(ctx: Ctx, mut request: Request, next: Next) -> Response {
    if let Some(user) = &ctx.user {
        tracing::Span::current().record("user_id", tracing::field::display(user.id));
    }

    request.extensions_mut().insert(ctx);
    next.run(request).await
}
