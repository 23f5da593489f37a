use base64::prelude::*;
use futures_util::future::BoxFuture;
use hmac::Mac;
use http::{Request, Response};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower_cookies::{
    cookie::{Expiration, SameSite},
    CookieManager, Cookies,
};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    config::{Config, EntryPoint},
    csrf::{self, CSRF_TOKEN_KEY},
    guard::{self, AuthenticationGuard, CsrfGuard, Guard, RequestContext},
    store::{Session, SessionId, SessionStore},
    Auth, Error, HmacSha256,
};

/// Session, CSRF and authentication layer.
///
/// Every request passes through, in order: session lookup, the guard chain
/// (CSRF check, then authentication, then any guards added with [`Latch::guard`]),
/// token issuance, and finally the wrapped service.
#[derive(Clone)]
pub struct Latch {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn SessionStore>,
}

impl Latch {
    /// `secret` keys the HMAC that signs session cookies.
    pub fn new(store: impl SessionStore, secret: impl Into<String>) -> Self {
        Self {
            config: Config::new(secret.into()),
            store: Arc::new(store),
        }
    }

    pub fn session_cookie_name(mut self, session_cookie_name: impl Into<String>) -> Self {
        self.config.session_cookie_name = session_cookie_name.into();

        self
    }

    pub fn csrf_cookie_name(mut self, csrf_cookie_name: impl Into<String>) -> Self {
        self.config.csrf_cookie_name = csrf_cookie_name.into();

        self
    }

    pub fn csrf_header_name(mut self, csrf_header_name: impl Into<String>) -> Self {
        self.config.csrf_header_name = csrf_header_name.into();

        self
    }

    /// Lets anonymous requests through to `pattern`. They are still CSRF checked.
    ///
    /// `/login` and `/logout` are permitted from the start.
    pub fn permit(mut self, pattern: impl Into<String>) -> Self {
        self.config.permitted.push(pattern.into());

        self
    }

    pub fn entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.config.entry_point = entry_point;

        self
    }

    pub fn expires(mut self, expires: Expiration) -> Self {
        self.config.expires = expires;

        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.config.same_site = same_site;

        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;

        self
    }

    pub fn guard(mut self, guard: impl Guard) -> Self {
        self.config.guards.push(Arc::new(guard));

        self
    }
}

impl<S> Layer<S> for Latch {
    type Service = CookieManager<LatchService<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(LatchService {
            shared: Arc::new(Shared::new(self)),
            inner,
        })
    }
}

pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn SessionStore>,
    chain: Vec<Arc<dyn Guard>>,
}

impl Shared {
    pub(crate) fn new(latch: &Latch) -> Self {
        let config = latch.config.clone();

        let mut chain: Vec<Arc<dyn Guard>> = vec![
            Arc::new(CsrfGuard::new(config.csrf_header_name.clone())),
            Arc::new(AuthenticationGuard::new(config.permitted.clone())),
        ];
        chain.extend(config.guards.iter().cloned());

        Self {
            config,
            store: latch.store.clone(),
            chain,
        }
    }

    fn sign(&self, id: &SessionId) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())?;
        mac.update(id.as_str().as_bytes());
        let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signature, id.as_str()))
    }

    fn verify(&self, value: &str) -> Result<Option<SessionId>, Error> {
        let Some((signature, id)) = value.split_once('.') else {
            return Ok(None);
        };
        let Ok(signature) = BASE64_URL_SAFE_NO_PAD.decode(signature) else {
            return Ok(None);
        };

        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())?;
        mac.update(id.as_bytes());

        Ok(mac
            .verify_slice(&signature)
            .ok()
            .map(|_| SessionId::from(id.to_owned())))
    }

    async fn resolve(&self, cookies: &Cookies) -> Result<Option<Session>, Error> {
        let Some(cookie) = cookies.get(&self.config.session_cookie_name) else {
            return Ok(None);
        };

        match self.verify(cookie.value())? {
            Some(id) => self.store.load(&id).await,
            None => {
                tracing::debug!("session cookie failed verification");
                Ok(None)
            }
        }
    }

    pub(crate) fn set_session_cookie(&self, cookies: &Cookies, id: &SessionId) -> Result<(), Error> {
        cookies.add(self.config.session_cookie(self.sign(id)?));

        Ok(())
    }

    /// Makes sure the client leaves with a session and that session's CSRF token,
    /// creating an anonymous session if there is none.
    pub(crate) async fn issue(
        &self,
        cookies: &Cookies,
        session: Option<Session>,
    ) -> Result<Session, Error> {
        let mut session = match session {
            Some(session) => session,
            None => {
                let session = self.store.create().await?;
                self.set_session_cookie(cookies, session.id())?;
                session
            }
        };

        let previous = session.get::<String>(CSRF_TOKEN_KEY)?;
        let token = csrf::ensure_token(&mut session)?;
        if previous.as_deref() != Some(token.as_str()) {
            self.store.save(&session).await?;
        }

        csrf::mirror_to_cookie(cookies, &self.config, &token);

        Ok(session)
    }
}

fn is_xhr<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get("x-requested-with")
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"XMLHttpRequest"))
}

#[derive(Clone)]
pub struct LatchService<S> {
    shared: Arc<Shared>,
    inner: S,
}

impl<S, Q, R> Service<Request<Q>> for LatchService<S>
where
    S: Service<Request<Q>, Response = Response<R>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Q: Send + 'static,
    R: Default + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Q>) -> Self::Future {
        let cookies = match request
            .extensions()
            .get::<Cookies>()
            .cloned()
            .ok_or(Error::ExtensionNotFound("Cookies".into()))
        {
            Ok(cookies) => cookies,
            Err(err) => return Box::pin(async move { Error::make_layer_error(err) }),
        };

        let shared = self.shared.clone();

        // The ready service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let session = match shared.resolve(&cookies).await {
                Ok(session) => session,
                Err(err) => return Error::make_layer_error(err),
            };

            let verdict = guard::run(
                &shared.chain,
                &RequestContext::new(&request, session.as_ref()),
            );

            // The client gets a current token even when the request is turned away.
            let session = match shared.issue(&cookies, session).await {
                Ok(session) => session,
                Err(err) => return Error::make_layer_error(err),
            };

            if let Err(err) = verdict {
                return err.make_layer_rejection(&shared.config.entry_point, is_xhr(&request));
            }

            request
                .extensions_mut()
                .insert(Auth::new(shared, cookies, session));

            inner.call(request).await
        })
    }
}
