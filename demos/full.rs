use std::net::SocketAddr;

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use tower_latch::{routes, Auth, EntryPoint, InMemoryUsers, Latch, MemoryStore};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(about = "Session login with CSRF protection, served to a tiny single-page app")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "LATCH_PORT")]
    port: u16,

    /// Key used to sign session cookies
    #[arg(long, env = "LATCH_SECRET", default_value = "secret-key")]
    secret: String,
}

// Reads the token cookie, echoes it in the header, and never trusts the login
// response: whether it worked is whatever `/user` says afterwards.
const SCRIPT: &str = r#"
function csrf() {
  const match = document.cookie.match(/(?:^|; )XSRF-TOKEN=([^;]*)/);
  return match ? decodeURIComponent(match[1]) : "";
}

async function probe() {
  const response = await fetch("/user", { headers: { "X-Requested-With": "XMLHttpRequest" } });
  const user = response.ok ? await response.json() : null;
  document.getElementById("state").textContent = user ? `Logged in as ${user.name}` : "Logged out";
  return user !== null;
}

async function login(event) {
  event.preventDefault();
  const form = new URLSearchParams(new FormData(event.target));
  await fetch("/login", { method: "POST", body: form, headers: { "X-XSRF-TOKEN": csrf() } });
  const ok = await probe();
  document.getElementById("error").hidden = ok;
}

async function logout() {
  await fetch("/logout", { method: "POST", headers: { "X-XSRF-TOKEN": csrf() } });
  document.getElementById("state").textContent = "Logged out";
}

probe();
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let users = InMemoryUsers::new()?.with_user("user", "password", ["USER"])?;

    let app = Router::new()
        .route("/", get(root))
        .route("/login.html", get(login_page))
        .merge(routes(users))
        .layer(
            Latch::new(MemoryStore::new(), args.secret)
                .permit("/login.html")
                .entry_point(EntryPoint::Redirect("/login.html".into()))
                .secure(false),
        );

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn page(body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/@picocss/pico@2/css/pico.min.css";

        main class="container" {
            nav {
                ul {
                    li { a href="/" { "Home" } }
                    li { a href="/login.html" { "Login" } }
                    li { a href="#" onclick="logout()" { "Logout" } }
                }
            }

            p { mark id="state" { "..." } }

            (body)
        }

        script { (PreEscaped(SCRIPT)) }
    }
}

async fn root(auth: Auth) -> Markup {
    let name = auth.principal().ok().flatten().map(|p| p.name);

    page(html! {
        h1 { "Hello " (name.unwrap_or_default()) }
        p { small { "Open the Network tab in your dev console." } }
    })
}

async fn login_page() -> Markup {
    page(html! {
        p id="error" hidden { "There was a problem logging in. Please try again." }

        form onsubmit="login(event)" {
            label for="username" { "Username" }
            input type="text" id="username" name="username";

            label for="password" { "Password" }
            input type="password" id="password" name="password";

            button type="submit" { "Login" }
        }
    })
}
