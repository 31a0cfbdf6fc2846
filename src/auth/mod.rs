mod login;
mod logout;
mod signup;

use axum::{Router, routing::get, routing::post};
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppError, AppState, blobs::Blobs, include_res, store::Db};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page).post(login::login))
        .route("/signup", post(signup::signup))
        .route("/logout", get(logout::logout))
}

/// The auth failures a user sees, worded as the inline alerts next to the
/// login form fields.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid")]
    InvalidEmail,
    #[error("already in use")]
    EmailInUse,
    #[error("less than 6 characters")]
    WeakPassword,
    #[error("not found")]
    UnknownEmail,
    #[error("wrong")]
    WrongPassword,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// The form field the alert belongs to; `None` for internal failures.
    pub fn field(&self) -> Option<&'static str> {
        use AuthError::*;
        match self {
            InvalidEmail | EmailInUse | UnknownEmail => Some("email"),
            WeakPassword | WrongPassword => Some("password"),
            Db(_) | Internal(_) => None,
        }
    }
}

fn internal(err: AppError) -> AuthError {
    AuthError::Internal(err.0)
}

pub async fn sign_up(
    db: &Db,
    blobs: &Blobs,
    username: &str,
    email: &str,
    password: &str,
    avatar: Option<(String, Vec<u8>)>,
) -> Result<String, AuthError> {
    if !email.contains('@') {
        return Err(AuthError::InvalidEmail);
    }
    if password.chars().count() < 6 {
        return Err(AuthError::WeakPassword);
    }

    let taken: Option<(String,)> = sqlx::query_as("SELECT uid FROM accounts WHERE email=?")
        .bind(email)
        .fetch_optional(db.pool())
        .await?;
    if taken.is_some() {
        return Err(AuthError::EmailInUse);
    }

    let uid = Uuid::now_v7().simple().to_string();
    let salt = hex::encode(rand::rng().random::<[u8; 16]>());
    sqlx::query("INSERT INTO accounts (email,uid,salt,pass_hash) VALUES (?,?,?,?)")
        .bind(email)
        .bind(&uid)
        .bind(&salt)
        .bind(hash_password(&salt, password))
        .execute(db.pool())
        .await?;

    let avatar_url = match avatar {
        Some((content_type, bytes)) => Some(
            blobs
                .put(&format!("users/{uid}"), &content_type, &bytes)
                .await
                .map_err(internal)?,
        ),
        None => None,
    };
    db.set(
        &format!("users/{uid}"),
        &json!({"username": username, "avatar": avatar_url}),
    )
    .await
    .map_err(internal)?;

    tracing::info!("new account u/{uid}");
    Ok(uid)
}

pub async fn sign_in(db: &Db, email: &str, password: &str) -> Result<String, AuthError> {
    let Some((uid, salt, pass_hash)): Option<(String, String, String)> =
        sqlx::query_as("SELECT uid,salt,pass_hash FROM accounts WHERE email=?")
            .bind(email)
            .fetch_optional(db.pool())
            .await?
    else {
        return Err(AuthError::UnknownEmail);
    };

    if hash_password(&salt, password) != pass_hash {
        return Err(AuthError::WrongPassword);
    }
    Ok(uid)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn render_login(alerts: &[(&str, String)]) -> String {
    let mut page = include_res!(str, "/pages/login.html").to_owned();
    for field in ["username", "email", "password"] {
        let alert = alerts
            .iter()
            .find(|(at, _)| *at == field)
            .map(|(_, message)| message.as_str())
            .unwrap_or("");
        page = page.replace(&format!("{{{field}_alert}}"), alert);
    }
    page
}
