use std::sync::Arc;

use parking_lot::Mutex;
use tower_cookies::Cookies;

use crate::{
    csrf::{self, CSRF_TOKEN_KEY},
    identity::{Credentials, IdentityProvider, Principal},
    latch::Shared,
    store::{Session, PRINCIPAL_KEY},
    Error,
};

/// Per-request handle on the caller's session, placed in request extensions by [`Latch`](crate::Latch).
///
/// Login and logout go through here; they are the only operations besides token
/// issuance that change a session.
#[derive(Clone)]
pub struct Auth {
    shared: Arc<Shared>,
    cookies: Cookies,
    session: Arc<Mutex<Session>>,
}

impl Auth {
    pub(crate) fn new(shared: Arc<Shared>, cookies: Cookies, session: Session) -> Self {
        Self {
            shared,
            cookies,
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn principal(&self) -> Result<Option<Principal>, Error> {
        self.session.lock().principal()
    }

    pub fn csrf_token(&self) -> Result<Option<String>, Error> {
        self.session.lock().get(CSRF_TOKEN_KEY)
    }

    /// Validates `credentials` with `provider` and logs the principal in.
    ///
    /// Wrong credentials leave the session untouched and yield [`Error::InvalidCredentials`].
    pub async fn authenticate<P>(&self, provider: &P, credentials: &Credentials) -> Result<Principal, Error>
    where
        P: IdentityProvider + ?Sized,
    {
        let Some(principal) = provider.authenticate(credentials).await? else {
            tracing::info!(username = %credentials.username, "login failed");
            return Err(Error::InvalidCredentials);
        };

        self.login(principal.clone()).await?;

        Ok(principal)
    }

    /// Stores `principal` in a new session that replaces the current one.
    ///
    /// The new session gets a fresh identifier and CSRF token, so an identifier
    /// planted before login is worthless afterwards. If the current session was
    /// already replaced by a concurrent login the token this request carried is
    /// stale, and the call fails with [`Error::CsrfMismatch`].
    pub async fn login(&self, principal: Principal) -> Result<(), Error> {
        let current = self.session();

        let mut next = current.rotated();
        next.insert(PRINCIPAL_KEY, &principal)?;
        let token = csrf::regenerate_token(&mut next)?;

        if !self.shared.store.cycle(current.id(), &next).await? {
            tracing::warn!(principal = %principal.name, "session was replaced by a concurrent login");
            return Err(Error::CsrfMismatch);
        }

        self.shared.set_session_cookie(&self.cookies, next.id())?;
        csrf::mirror_to_cookie(&self.cookies, &self.shared.config, &token);
        *self.session.lock() = next;

        tracing::info!(principal = %principal.name, "logged in");

        Ok(())
    }

    /// Destroys the session and hands the client a fresh anonymous one, with its own
    /// CSRF token, to log in again with.
    pub async fn logout(&self) -> Result<(), Error> {
        let current = self.session();
        let principal = current.principal()?;

        self.shared.store.delete(current.id()).await?;
        let fresh = self.shared.issue(&self.cookies, None).await?;
        *self.session.lock() = fresh;

        tracing::info!(principal = ?principal.map(|p| p.name), "logged out");

        Ok(())
    }
}
