use base64::prelude::*;
use http::{HeaderMap, Method};
use rand::prelude::*;
use subtle::ConstantTimeEq;
use tower_cookies::Cookies;

use crate::{config::Config, store::Session, Error};

pub(crate) const CSRF_TOKEN_KEY: &str = "latch.csrf";

fn generate() -> String {
    let mut random = [0u8; 32];
    thread_rng().fill(&mut random);

    BASE64_URL_SAFE_NO_PAD.encode(random)
}

/// Returns the session's token, generating and storing one if it has none.
pub fn ensure_token(session: &mut Session) -> Result<String, Error> {
    if let Some(token) = session.get::<String>(CSRF_TOKEN_KEY)? {
        return Ok(token);
    }

    regenerate_token(session)
}

/// Replaces the session's token unconditionally.
pub fn regenerate_token(session: &mut Session) -> Result<String, Error> {
    let token = generate();
    session.insert(CSRF_TOKEN_KEY, &token)?;

    Ok(token)
}

/// Hands `token` to client scripts through the token cookie, unless they already hold it.
pub(crate) fn mirror_to_cookie(cookies: &Cookies, config: &Config, token: &str) {
    let current = cookies.get(&config.csrf_cookie_name);

    if current.as_ref().map(|cookie| cookie.value()) == Some(token) {
        return;
    }

    cookies.add(config.csrf_cookie(token.to_owned()));
}

pub(crate) fn is_safe(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

/// Checks a request against the session's token.
///
/// Safe methods always pass. Anything else must echo the token in `header_name`;
/// a missing header, a missing session and a stale token all fail alike.
pub fn validate(
    method: &Method,
    headers: &HeaderMap,
    header_name: &str,
    session: Option<&Session>,
) -> Result<(), Error> {
    if is_safe(method) {
        return Ok(());
    }

    let received = headers
        .get(header_name)
        .and_then(|h| h.to_str().ok())
        .ok_or(Error::CsrfMismatch)?;

    let expected = match session {
        Some(session) => session.get::<String>(CSRF_TOKEN_KEY)?,
        None => None,
    }
    .ok_or(Error::CsrfMismatch)?;

    if bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        Ok(())
    } else {
        Err(Error::CsrfMismatch)
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use time::Duration;

    use super::*;

    const HEADER: &str = "x-xsrf-token";

    fn headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER, HeaderValue::from_str(token).unwrap());

        headers
    }

    #[test]
    fn ensure_token_is_idempotent() {
        let mut session = Session::new(Duration::minutes(5));

        let first = ensure_token(&mut session).unwrap();
        let second = ensure_token(&mut session).unwrap();

        assert_eq!(first, second);
        assert_eq!(BASE64_URL_SAFE_NO_PAD.decode(&first).unwrap().len(), 32);
    }

    #[test]
    fn regenerate_replaces_the_token() {
        let mut session = Session::new(Duration::minutes(5));

        let old = ensure_token(&mut session).unwrap();
        let new = regenerate_token(&mut session).unwrap();

        assert_ne!(old, new);
        assert_eq!(ensure_token(&mut session).unwrap(), new);
    }

    #[test]
    fn safe_methods_bypass() {
        assert_eq!(validate(&Method::GET, &HeaderMap::new(), HEADER, None), Ok(()));
        assert_eq!(validate(&Method::HEAD, &HeaderMap::new(), HEADER, None), Ok(()));
    }

    #[test]
    fn mutating_methods_need_the_current_token() {
        let mut session = Session::new(Duration::minutes(5));
        let token = ensure_token(&mut session).unwrap();

        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert_eq!(validate(&method, &headers(&token), HEADER, Some(&session)), Ok(()));
            assert_eq!(
                validate(&method, &HeaderMap::new(), HEADER, Some(&session)),
                Err(Error::CsrfMismatch)
            );
            assert_eq!(
                validate(&method, &headers("oh howdy doody"), HEADER, Some(&session)),
                Err(Error::CsrfMismatch)
            );
        }
    }

    #[test]
    fn stale_token_is_rejected_after_regeneration() {
        let mut session = Session::new(Duration::minutes(5));
        let stale = ensure_token(&mut session).unwrap();
        regenerate_token(&mut session).unwrap();

        assert_eq!(
            validate(&Method::POST, &headers(&stale), HEADER, Some(&session)),
            Err(Error::CsrfMismatch)
        );
    }

    #[test]
    fn no_session_means_no_token() {
        assert_eq!(
            validate(&Method::POST, &headers("anything"), HEADER, None),
            Err(Error::CsrfMismatch)
        );
    }
}
