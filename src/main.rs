use axum::{Router, debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}, routing::get};
use murmur::{AppResult, AppState, auth, blobs, include_res, notify, profiles, res::escape_html, rooms, session::{self, USER_ID}, store::Db};
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer, cookie::SameSite};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "murmur=debug,info".into()),
        )
        .init();

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(60)));

    let db_url = dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:murmur.db?mode=rwc".to_owned());
    let db = Db::connect(&db_url).await.unwrap();
    let blobs = blobs::Blobs::new(db.pool().clone());
    let app_state = AppState { db, blobs };

    let app = Router::new()
        .route("/", get(root))
        .route("/lobby", get(lobby))
        .route("/blobs/{*path}", get(blobs::serve))
        .route("/notify/ws", get(notify::notify_ws))

        .merge(auth::router())
        .nest("/r", rooms::router())
        .nest("/p", profiles::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

#[debug_handler]
async fn root(session: Session) -> AppResult<Redirect> {
    Ok(if session.get::<String>(USER_ID).await?.is_some() {
        Redirect::to("/lobby")
    } else {
        Redirect::to("/login")
    })
}

#[debug_handler(state = AppState)]
async fn lobby(State(db): State<Db>, session: Session) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Ok(Redirect::to("/login").into_response());
    };

    Ok(Html(
        include_res!(str, "/pages/lobby.html")
            .replace("{username}", &escape_html(&user.username))
            .replace("{uid}", &escape_html(&user.uid)),
    )
    .into_response())
}
