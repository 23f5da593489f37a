//! ## Overview
//!
//! Session-backed login and CSRF protection for single-page apps, as a [`tower`][crate-tower] layer.
//!
//! ### How it works
//!
//! - **Sessions**: Server-side records held by a pluggable [`SessionStore`]. The client only
//!   keeps the session identifier, in an `HttpOnly` cookie signed with your **secret key**.
//! - **Token issuance**:
//!   - Every session carries one random CSRF token (256 bits, from the [`rand`][crate-rand] crate).
//!   - The token is mirrored into a cookie that is **not** `HttpOnly`, so your scripts can read it.
//!   - The cookie is only re-sent when its value changes.
//! - **Token validation**:
//!   - Any request that isn't `GET`, `HEAD`, `OPTIONS` or `TRACE` must send the token back in a
//!     header (`X-XSRF-TOKEN` by default).
//!   - Browsers attach cookies to cross-site requests on their own, but never custom headers. A
//!     forged request can't produce the header, so it's rejected with `403`.
//! - **Authentication**:
//!   - Paths you [`permit`](Latch::permit) are open to anonymous users; everything else needs a
//!     logged-in [`Principal`], or gets the configured [`EntryPoint`].
//!   - Logging in swaps the session for a new one with a new identifier and a new token (see
//!     [OWASP on session fixation][owasp-fixation]). Logging out destroys it.
//!
//! ### Cookies
//!
//! The session cookie is `HttpOnly`; the token cookie is not. Both are `SameSite: Lax`, `Secure`
//! and scoped to `/` by default.
//!
//! ## Usage
//!
//! ### With [`axum`][crate-axum]
//!
//! ```rust, no_run
//! use std::net::SocketAddr;
//!
//! use axum::{routing::get, Router};
//! use tower_latch::{routes, InMemoryUsers, Latch, MemoryStore, Principal};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let users = InMemoryUsers::new()?.with_user("user", "password", ["USER"])?;
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { "hello" }))
//!         .route("/resource", get(resource))
//!         .merge(routes(users))
//!         .layer(Latch::new(MemoryStore::new(), "secret-key").permit("/").secure(false));
//!
//!     let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
//!     let listener = tokio::net::TcpListener::bind(&addr).await?;
//!
//!     axum::serve(listener, app.into_make_service()).await?;
//!
//!     Ok(())
//! }
//!
//! async fn resource(principal: Principal) -> String {
//!     format!("Hello, {}", principal.name)
//! }
//! ```
//!
//! [crate-axum]: https://github.com/tokio-rs/axum
//! [crate-rand]: https://github.com/rust-random/rand
//! [crate-tower]: https://github.com/tower-rs/tower
//! [owasp-fixation]: https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html#renew-the-session-id-after-any-privilege-level-change

use hmac::Hmac;
use sha2::Sha256;

pub(crate) type HmacSha256 = Hmac<Sha256>;

pub use auth::Auth;
pub use config::EntryPoint;
pub use csrf::{ensure_token, regenerate_token, validate};
pub use error::Error;
pub use guard::{AuthenticationGuard, CsrfGuard, Guard, RequestContext};
pub use identity::{Credentials, IdentityProvider, InMemoryUsers, Principal};
pub use latch::{Latch, LatchService};
pub use store::{MemoryStore, Session, SessionId, SessionStore};

#[cfg(feature = "axum")]
pub use routes::routes;

#[cfg(feature = "client")]
pub use client::{AuthController, AuthSnapshot, AuthState};

mod auth;
mod config;
mod csrf;
mod error;
mod guard;
mod identity;
mod latch;
mod store;

#[cfg(feature = "axum")]
mod extract;
#[cfg(feature = "axum")]
mod routes;

#[cfg(feature = "client")]
pub mod client;

/// Re-exported so [`Latch::expires`] and [`Latch::same_site`] can be called without a direct
/// dependency on the cookie crate.
pub use tower_cookies::cookie;
