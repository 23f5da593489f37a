#![cfg(feature = "client")]

use std::net::SocketAddr;

use anyhow::Result;
use argon2::Params;
use axum::{routing::get, Router};
use tower_latch::{
    routes, AuthController, AuthSnapshot, AuthState, Credentials, EntryPoint, InMemoryUsers,
    Latch, MemoryStore,
};
use url::Url;

async fn spawn_server() -> Result<SocketAddr> {
    spawn_server_with(EntryPoint::default()).await
}

async fn spawn_server_with(entry_point: EntryPoint) -> Result<SocketAddr> {
    let params = Params::new(8, 1, 1, None).expect("valid argon2 params");
    let users = InMemoryUsers::with_params(params)?.with_user("user", "password", ["USER"])?;

    let app = Router::new()
        .route("/", get(|| async { "home" }))
        .route("/login.html", get(|| async { "<form></form>" }))
        .merge(routes(users))
        .layer(
            Latch::new(MemoryStore::new(), "secret-key")
                .permit("/")
                .permit("/login.html")
                .entry_point(entry_point)
                .secure(false),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("server failed");
    });

    Ok(addr)
}

async fn controller() -> Result<AuthController> {
    let addr = spawn_server().await?;
    let base = Url::parse(&format!("http://{addr}/"))?;

    Ok(AuthController::new(base, AuthState::new())?)
}

#[tokio::test]
async fn probe_starts_anonymous() -> Result<()> {
    let controller = controller().await?;

    assert!(!controller.probe().await?);
    assert_eq!(controller.state().get(), AuthSnapshot::default());

    Ok(())
}

#[tokio::test]
async fn login_is_decided_by_the_follow_up_probe() -> Result<()> {
    let controller = controller().await?;
    let mut changes = controller.state().subscribe();

    assert!(!controller.login(&Credentials::new("user", "wrong")).await?);
    assert!(!controller.state().is_authenticated());
    assert!(controller.state().get().error);

    assert!(controller.login(&Credentials::new("user", "password")).await?);
    assert!(changes.has_changed()?);
    assert_eq!(
        *changes.borrow_and_update(),
        AuthSnapshot {
            authenticated: true,
            name: Some("user".into()),
            error: false,
        }
    );

    assert!(controller.probe().await?);

    Ok(())
}

#[tokio::test]
async fn logout_marks_the_state_anonymous() -> Result<()> {
    let controller = controller().await?;

    assert!(controller.login(&Credentials::new("user", "password")).await?);

    controller.logout().await?;
    assert!(!controller.state().is_authenticated());

    // The server agrees.
    assert!(!controller.probe().await?);

    // And logging back in works with the token handed out on logout.
    assert!(controller.login(&Credentials::new("user", "password")).await?);

    Ok(())
}

#[tokio::test]
async fn shared_state_is_seen_by_every_holder() -> Result<()> {
    let addr = spawn_server().await?;
    let state = AuthState::new();
    let view = state.clone();

    let controller = AuthController::new(Url::parse(&format!("http://{addr}/"))?, state)?;
    controller.login(&Credentials::new("user", "password")).await?;

    assert!(view.is_authenticated());
    assert_eq!(view.get().name.as_deref(), Some("user"));

    Ok(())
}

#[tokio::test]
async fn redirecting_entry_point_reads_as_anonymous() -> Result<()> {
    let addr = spawn_server_with(EntryPoint::Redirect("/login.html".into())).await?;
    let controller = AuthController::new(Url::parse(&format!("http://{addr}/"))?, AuthState::new())?;

    assert!(!controller.probe().await?);

    assert!(!controller.login(&Credentials::new("user", "wrong")).await?);
    assert!(controller.state().get().error);

    assert!(controller.login(&Credentials::new("user", "password")).await?);

    controller.logout().await?;
    assert!(!controller.probe().await?);

    Ok(())
}
