use async_trait::async_trait;
use axum_core::{
    extract::FromRequestParts,
    response::{IntoResponse, Response},
};
use http::request::Parts;

use crate::{Auth, Error, Principal};

#[async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Auth>()
            .cloned()
            .ok_or(Error::ExtensionNotFound("Auth".into()))
    }
}

/// The logged-in principal. Rejects with `401` for anonymous sessions.
#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Auth::from_request_parts(parts, state)
            .await?
            .principal()?
            .ok_or(Error::Unauthenticated)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            Self::InvalidCredentials => (status, self.to_string()).into_response(),
            Self::CsrfMismatch | Self::Unauthenticated => status.into_response(),
            _ => {
                tracing::error!(err = %self);
                (status, "Internal error").into_response()
            }
        }
    }
}
