use http::{header, HeaderValue, StatusCode};

use crate::config::EntryPoint;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A mutating request carried no CSRF header, or one that doesn't match the session.
    #[error("csrf token missing or mismatched")]
    CsrfMismatch,
    /// A protected path was requested without a principal in the session.
    #[error("not authenticated")]
    Unauthenticated,
    /// The identity provider rejected the submitted credentials.
    #[error("Bad credentials")]
    InvalidCredentials,
    /// Maps the [`hmac::digest::InvalidLength`] error.
    #[error(transparent)]
    InvalidLength(#[from] hmac::digest::InvalidLength),
    /// An expected extension was missing.
    #[error("couldn't extract `{0}`. is `Latch` enabled?")]
    ExtensionNotFound(String),
    /// The session store failed.
    #[error("session store error: {0}")]
    Store(String),
    /// A session attribute couldn't be (de)serialized.
    #[error("session attribute error: {0}")]
    Serialization(String),
    /// A password couldn't be hashed.
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    /// The client controller couldn't reach the server.
    #[error("client error: {0}")]
    Client(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Status code this error maps to, for errors that aren't routed through an entry point.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::CsrfMismatch => StatusCode::FORBIDDEN,
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn make_layer_error<T: Default, E>(
        err: impl std::error::Error,
    ) -> Result<http::Response<T>, E> {
        tracing::error!(err = %err);

        let mut response = http::Response::default();
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;

        Ok(response)
    }

    pub(crate) fn make_layer_rejection<T: Default, E>(
        self,
        entry_point: &EntryPoint,
        xhr: bool,
    ) -> Result<http::Response<T>, E> {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            return Self::make_layer_error(self);
        }

        tracing::debug!(err = %self, "request rejected");

        let mut response = http::Response::default();

        match (&self, entry_point) {
            (Self::Unauthenticated, EntryPoint::Status(status)) => {
                *response.status_mut() = *status;
            }
            (Self::Unauthenticated, EntryPoint::Redirect(location)) if !xhr => {
                match HeaderValue::from_str(location) {
                    Ok(value) => {
                        *response.status_mut() = StatusCode::FOUND;
                        response.headers_mut().insert(header::LOCATION, value);
                    }
                    Err(err) => return Self::make_layer_error(err),
                }
            }
            _ => *response.status_mut() = self.status(),
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_mismatch_is_forbidden_regardless_of_entry_point() {
        let response: http::Response<()> = Error::CsrfMismatch
            .make_layer_rejection::<(), ()>(&EntryPoint::Redirect("/login.html".into()), false)
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn redirect_entry_point_redirects_browsers_but_not_xhr() {
        let entry_point = EntryPoint::Redirect("/login.html".into());

        let browser: http::Response<()> = Error::Unauthenticated
            .make_layer_rejection::<(), ()>(&entry_point, false)
            .unwrap();
        assert_eq!(browser.status(), StatusCode::FOUND);
        assert_eq!(browser.headers()[header::LOCATION], "/login.html");

        let xhr: http::Response<()> = Error::Unauthenticated
            .make_layer_rejection::<(), ()>(&entry_point, true)
            .unwrap();
        assert_eq!(xhr.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_errors_skip_the_entry_point() {
        let response: http::Response<()> = Error::Serialization("bad principal".into())
            .make_layer_rejection::<(), ()>(&EntryPoint::Redirect("/login.html".into()), false)
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn status_entry_point_is_honored() {
        let response: http::Response<()> = Error::Unauthenticated
            .make_layer_rejection::<(), ()>(&EntryPoint::Status(StatusCode::FORBIDDEN), false)
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
