use std::sync::Arc;

use http::StatusCode;
use tower_cookies::{
    cookie::{Expiration, SameSite},
    Cookie,
};

use crate::guard::Guard;

/// What an unauthenticated request to a protected path gets back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryPoint {
    /// Answer with a bare status code.
    Status(StatusCode),
    /// Redirect to a login page. XHR requests (`X-Requested-With: XMLHttpRequest`)
    /// get a `401` instead, so scripts can react without following the redirect.
    Redirect(String),
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self::Status(StatusCode::UNAUTHORIZED)
    }
}

#[derive(Clone)]
pub(crate) struct Config {
    pub(crate) secret: String,
    pub(crate) session_cookie_name: String,
    pub(crate) csrf_cookie_name: String,
    pub(crate) csrf_header_name: String,
    pub(crate) permitted: Vec<String>,
    pub(crate) entry_point: EntryPoint,
    pub(crate) expires: Expiration,
    pub(crate) same_site: SameSite,
    pub(crate) secure: bool,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
}

impl Config {
    pub(crate) fn new(secret: String) -> Self {
        Self {
            secret,
            session_cookie_name: "SESSION".into(),
            csrf_cookie_name: "XSRF-TOKEN".into(),
            csrf_header_name: "X-XSRF-TOKEN".into(),
            permitted: vec!["/login".into(), "/logout".into()],
            entry_point: EntryPoint::default(),
            expires: Expiration::Session,
            same_site: SameSite::Lax,
            secure: true,
            guards: Vec::new(),
        }
    }

    pub(crate) fn session_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.session_cookie_name.clone(), value))
            .path("/")
            .expires(self.expires)
            .http_only(true)
            .same_site(self.same_site)
            .secure(self.secure)
            .build()
    }

    /// The token cookie must stay readable from scripts, so it's never `HttpOnly`.
    pub(crate) fn csrf_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((self.csrf_cookie_name.clone(), token))
            .path("/")
            .expires(self.expires)
            .http_only(false)
            .same_site(self.same_site)
            .secure(self.secure)
            .build()
    }
}
