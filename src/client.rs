//! Client side of the protocol, the way a single-page app drives it.
//!
//! [`AuthState`] is the one place that says whether the user is logged in. It is
//! shared by handing clones (or [`AuthState::subscribe`] receivers) to whatever
//! needs to render from it, and it only changes after the server has answered.

use std::sync::Arc;

use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue},
    redirect, StatusCode,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::watch;
use url::Url;

use crate::{Credentials, Error};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub authenticated: bool,
    pub name: Option<String>,
    /// The last login attempt ended unauthenticated.
    pub error: bool,
}

/// Observable authentication state.
#[derive(Clone, Debug)]
pub struct AuthState {
    tx: Arc<watch::Sender<AuthSnapshot>>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthSnapshot::default());

        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().authenticated
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_authenticated(&self, name: impl Into<String>) {
        self.tx.send_replace(AuthSnapshot {
            authenticated: true,
            name: Some(name.into()),
            error: false,
        });
    }

    pub fn set_anonymous(&self) {
        self.tx.send_replace(AuthSnapshot::default());
    }

    pub fn set_failed(&self) {
        self.tx.send_replace(AuthSnapshot {
            error: true,
            ..AuthSnapshot::default()
        });
    }
}

#[derive(Deserialize)]
struct Identity {
    name: String,
}

/// Talks to a server running [`Latch`](crate::Latch) with [`routes`](crate::routes).
pub struct AuthController {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    state: AuthState,
    csrf_cookie_name: String,
    csrf_header_name: String,
}

impl AuthController {
    pub fn new(base: Url, state: AuthState) -> Result<Self, Error> {
        let jar = Arc::new(Jar::default());

        // Marked as XHR so a redirecting entry point answers `401` instead.
        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));

        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;

        Ok(Self {
            http,
            jar,
            base,
            state,
            csrf_cookie_name: "XSRF-TOKEN".into(),
            csrf_header_name: "X-XSRF-TOKEN".into(),
        })
    }

    pub fn csrf_names(mut self, cookie: impl Into<String>, header: impl Into<String>) -> Self {
        self.csrf_cookie_name = cookie.into();
        self.csrf_header_name = header.into();

        self
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Asks the server who we are and publishes the answer.
    pub async fn probe(&self) -> Result<bool, Error> {
        match self.whoami().await? {
            Some(name) => {
                self.state.set_authenticated(name);
                Ok(true)
            }
            None => {
                self.state.set_anonymous();
                Ok(false)
            }
        }
    }

    /// Submits `credentials`, then asks the server whether that worked.
    ///
    /// The status of the login call itself is ignored on purpose; only the
    /// follow-up probe decides.
    pub async fn login(&self, credentials: &Credentials) -> Result<bool, Error> {
        let token = self.csrf_token().await?;

        self.http
            .post(self.url("login")?)
            .header(self.csrf_header_name.as_str(), token)
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| Error::Client(e.to_string()))?;

        match self.whoami().await? {
            Some(name) => {
                self.state.set_authenticated(name);
                Ok(true)
            }
            None => {
                self.state.set_failed();
                Ok(false)
            }
        }
    }

    pub async fn logout(&self) -> Result<(), Error> {
        let token = self.csrf_token().await?;

        self.http
            .post(self.url("logout")?)
            .header(self.csrf_header_name.as_str(), token)
            .send()
            .await
            .map_err(|e| Error::Client(e.to_string()))?;

        self.state.set_anonymous();

        Ok(())
    }

    async fn whoami(&self) -> Result<Option<String>, Error> {
        let response = self
            .http
            .get(self.url("user")?)
            .send()
            .await
            .map_err(|e| Error::Client(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Ok(None);
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| Error::Client(e.to_string()))?;

        Ok(Some(identity.name))
    }

    /// The token from the cookie jar. A first visit has none yet; any request
    /// hands one out, so probe once to pick it up.
    async fn csrf_token(&self) -> Result<String, Error> {
        if let Some(token) = self.cookie(&self.csrf_cookie_name) {
            return Ok(token);
        }

        self.whoami().await?;

        self.cookie(&self.csrf_cookie_name)
            .ok_or_else(|| Error::Client("server did not issue a csrf token".into()))
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;

        header.to_str().ok()?.split("; ").find_map(|pair| {
            pair.split_once('=')
                .filter(|(key, _)| *key == name)
                .map(|(_, value)| value.to_owned())
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| Error::Client(e.to_string()))
    }
}
