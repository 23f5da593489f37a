use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;

use crate::{Auth, Credentials, Error, IdentityProvider, Principal};

/// `GET /user`, `POST /login` and `POST /logout`, backed by `provider`.
///
/// Mount this under a [`Latch`](crate::Latch) layer; the handlers rely on the
/// session it resolves and on its CSRF checks.
pub fn routes<P: IdentityProvider>(provider: P) -> Router {
    Router::new()
        .route("/user", get(user))
        .route("/login", post(login::<P>))
        .route("/logout", post(logout))
        .with_state(Arc::new(provider))
}

#[derive(Serialize)]
struct Identity {
    name: String,
}

async fn user(principal: Principal) -> Json<Identity> {
    Json(Identity {
        name: principal.name,
    })
}

async fn login<P: IdentityProvider>(
    State(provider): State<Arc<P>>,
    auth: Auth,
    Form(credentials): Form<Credentials>,
) -> Result<StatusCode, Error> {
    auth.authenticate(provider.as_ref(), &credentials).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn logout(auth: Auth) -> Result<StatusCode, Error> {
    auth.logout().await?;

    Ok(StatusCode::NO_CONTENT)
}
