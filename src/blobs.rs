use axum::{debug_handler, extract::{Path, State}, http::{StatusCode, header}, response::{IntoResponse, Response}};
use sqlx::SqlitePool;

use crate::AppResult;

/// Object storage for avatars, room icons and media messages, addressed by
/// the same paths the tree store uses (`users/{uid}`,
/// `chatrooms/{id}/icon`, `chatrooms/{id}/messages/{idx}`). Uploads return
/// the URL the blob is served from.
#[derive(Clone)]
pub struct Blobs {
    pool: SqlitePool,
}

impl Blobs {
    pub fn new(pool: SqlitePool) -> Blobs {
        Blobs { pool }
    }

    pub async fn put(&self, path: &str, content_type: &str, data: &[u8]) -> AppResult<String> {
        sqlx::query("INSERT OR REPLACE INTO blobs (path,content_type,data) VALUES (?,?,?)")
            .bind(path)
            .bind(content_type)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(format!("/blobs/{path}"))
    }

    pub async fn get(&self, path: &str) -> AppResult<Option<(String, Vec<u8>)>> {
        Ok(
            sqlx::query_as("SELECT content_type,data FROM blobs WHERE path=?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn remove_prefix(&self, prefix: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM blobs WHERE path=? OR path LIKE ? ESCAPE '\\'")
            .bind(prefix)
            .bind(crate::store::subtree_pattern(prefix))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[debug_handler(state = crate::AppState)]
pub async fn serve(
    Path(path): Path<String>,
    State(blobs): State<Blobs>,
) -> AppResult<Response> {
    let Some((content_type, data)) = blobs.get(&path).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Db;

    #[tokio::test]
    async fn put_get_remove_prefix() {
        let db = Db::in_memory().await.unwrap();
        let blobs = Blobs::new(db.pool().clone());

        let url = blobs.put("chatrooms/r/icon", "image/png", b"png").await.unwrap();
        assert_eq!(url, "/blobs/chatrooms/r/icon");
        blobs.put("chatrooms/r/messages/0", "video/mp4", b"vid").await.unwrap();
        blobs.put("users/u", "image/png", b"me").await.unwrap();

        let (ct, data) = blobs.get("chatrooms/r/icon").await.unwrap().unwrap();
        assert_eq!((ct.as_str(), data.as_slice()), ("image/png", b"png".as_slice()));

        blobs.remove_prefix("chatrooms/r").await.unwrap();
        assert!(blobs.get("chatrooms/r/icon").await.unwrap().is_none());
        assert!(blobs.get("chatrooms/r/messages/0").await.unwrap().is_none());
        assert!(blobs.get("users/u").await.unwrap().is_some());
    }
}
