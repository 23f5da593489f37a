use std::sync::Arc;

use http::{HeaderMap, Method, Request};

use crate::{csrf, store::Session, Error};

/// What a guard gets to look at.
pub struct RequestContext<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub session: Option<&'a Session>,
}

impl<'a> RequestContext<'a> {
    pub fn new<B>(request: &'a Request<B>, session: Option<&'a Session>) -> Self {
        Self {
            method: request.method(),
            path: request.uri().path(),
            headers: request.headers(),
            session,
        }
    }
}

/// One step of the per-request security chain: pass, or reject with a typed error.
///
/// Guards added with [`Latch::guard`](crate::Latch::guard) run after the built-in CSRF
/// and authentication guards. Closures of the right shape are guards too.
///
/// ```rust
/// use tower_latch::{Error, Guard, Latch, MemoryStore, RequestContext};
///
/// struct NoAdmin;
///
/// impl Guard for NoAdmin {
///     fn check(&self, request: &RequestContext<'_>) -> Result<(), Error> {
///         if request.path.starts_with("/admin") {
///             return Err(Error::Unauthenticated);
///         }
///
///         Ok(())
///     }
/// }
///
/// let latch = Latch::new(MemoryStore::new(), "secret-key").guard(NoAdmin);
/// ```
pub trait Guard: Send + Sync + 'static {
    fn check(&self, request: &RequestContext<'_>) -> Result<(), Error>;
}

impl<F> Guard for F
where
    F: Fn(&RequestContext<'_>) -> Result<(), Error> + Send + Sync + 'static,
{
    fn check(&self, request: &RequestContext<'_>) -> Result<(), Error> {
        self(request)
    }
}

/// Runs `chain` in order, stopping at the first rejection.
pub(crate) fn run(chain: &[Arc<dyn Guard>], request: &RequestContext<'_>) -> Result<(), Error> {
    chain.iter().try_for_each(|guard| guard.check(request))
}

/// Rejects mutating requests that don't echo the session's CSRF token.
pub struct CsrfGuard {
    header_name: String,
}

impl CsrfGuard {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl Guard for CsrfGuard {
    fn check(&self, request: &RequestContext<'_>) -> Result<(), Error> {
        csrf::validate(
            request.method,
            request.headers,
            &self.header_name,
            request.session,
        )
    }
}

/// Requires a principal everywhere except the permitted paths.
///
/// A pattern is either an exact path or a prefix ending in `/**`, which covers the
/// prefix itself and everything below it.
pub struct AuthenticationGuard {
    permitted: Vec<String>,
}

impl AuthenticationGuard {
    pub fn new<I, P>(permitted: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            permitted: permitted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_permitted(&self, path: &str) -> bool {
        self.permitted.iter().any(|pattern| match pattern.strip_suffix("/**") {
            Some(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => path == pattern,
        })
    }
}

impl Guard for AuthenticationGuard {
    fn check(&self, request: &RequestContext<'_>) -> Result<(), Error> {
        if self.is_permitted(request.path) {
            return Ok(());
        }

        match request.session.map(Session::principal).transpose()?.flatten() {
            Some(_) => Ok(()),
            None => Err(Error::Unauthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::{identity::Principal, store::PRINCIPAL_KEY};

    fn guard_fn<F>(f: F) -> Arc<dyn Guard>
    where
        F: Fn(&RequestContext<'_>) -> Result<(), Error> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn request(method: Method, path: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
    }

    #[test]
    fn exact_and_wildcard_patterns() {
        let guard = AuthenticationGuard::new(["/", "/login.html", "/assets/**"]);

        assert!(guard.is_permitted("/"));
        assert!(guard.is_permitted("/login.html"));
        assert!(guard.is_permitted("/assets"));
        assert!(guard.is_permitted("/assets/app.js"));
        assert!(!guard.is_permitted("/assetsx"));
        assert!(!guard.is_permitted("/user"));
    }

    #[test]
    fn protected_paths_need_a_principal() {
        let guard = AuthenticationGuard::new(["/login.html"]);
        let mut session = Session::new(Duration::minutes(5));
        let req = request(Method::GET, "/user?x=1");

        assert_eq!(
            guard.check(&RequestContext::new(&req, None)),
            Err(Error::Unauthenticated)
        );
        assert_eq!(
            guard.check(&RequestContext::new(&req, Some(&session))),
            Err(Error::Unauthenticated)
        );

        session.insert(PRINCIPAL_KEY, &Principal::new("user")).unwrap();
        assert_eq!(guard.check(&RequestContext::new(&req, Some(&session))), Ok(()));

        let page = request(Method::GET, "/login.html");
        assert_eq!(guard.check(&RequestContext::new(&page, None)), Ok(()));
    }

    #[test]
    fn chain_stops_at_first_rejection() {
        let chain: Vec<Arc<dyn Guard>> = vec![
            Arc::new(CsrfGuard::new("x-xsrf-token")),
            guard_fn(|_| panic!("should not run after a rejection")),
        ];
        let req = request(Method::POST, "/login");

        assert_eq!(
            run(&chain, &RequestContext::new(&req, None)),
            Err(Error::CsrfMismatch)
        );
    }

    #[test]
    fn closures_are_guards() {
        let chain: Vec<Arc<dyn Guard>> = vec![guard_fn(|request| {
            if request.path == "/closed" {
                Err(Error::Unauthenticated)
            } else {
                Ok(())
            }
        })];

        let open = request(Method::GET, "/open");
        let closed = request(Method::GET, "/closed");

        assert_eq!(run(&chain, &RequestContext::new(&open, None)), Ok(()));
        assert_eq!(
            run(&chain, &RequestContext::new(&closed, None)),
            Err(Error::Unauthenticated)
        );
    }
}
