//! Movies list persistence.
//!
//! All functions take a `&SqlitePool` and operate on the `movies` table.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Movie {
    pub id: i64,
    pub tmdb_id: i64,
    pub title: String,
    pub comment: String,
    pub user_name: String,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
}

/// Body of `POST /movies`. The owner comes from the session, never from the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMovie {
    pub tmdb_id: i64,
    pub title: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

/// Open a pool for `url`, creating the database file if needed, and make sure the table exists.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // every connection to an in-memory database is a separate database
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?
    } else {
        SqlitePoolOptions::new().max_connections(5).connect_with(opts).await?
    };
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS movies (
            id INTEGER PRIMARY KEY,
            tmdb_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            comment TEXT NOT NULL,
            user_name TEXT NOT NULL,
            poster_path TEXT,
            release_date TEXT
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest first.
pub async fn list(pool: &SqlitePool) -> Result<Vec<Movie>, sqlx::Error> {
    sqlx::query_as::<_, Movie>(
        "SELECT id, tmdb_id, title, comment, user_name, poster_path, release_date FROM movies ORDER BY id DESC",
    )
    .fetch_all(pool)
    .await
}

pub async fn insert(pool: &SqlitePool, movie: &NewMovie, user_name: &str) -> Result<Movie, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO movies (tmdb_id, title, comment, user_name, poster_path, release_date)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(movie.tmdb_id)
    .bind(&movie.title)
    .bind(&movie.comment)
    .bind(user_name)
    .bind(&movie.poster_path)
    .bind(&movie.release_date)
    .execute(pool)
    .await?;

    Ok(Movie {
        id: result.last_insert_rowid(),
        tmdb_id: movie.tmdb_id,
        title: movie.title.clone(),
        comment: movie.comment.clone(),
        user_name: user_name.to_string(),
        poster_path: movie.poster_path.clone(),
        release_date: movie.release_date.clone(),
    })
}

/// Delete every row for `tmdb_id`, restricted to `owner`'s rows when given. Returns rows removed.
pub async fn delete_by_tmdb_id(pool: &SqlitePool, tmdb_id: i64, owner: Option<&str>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM movies WHERE tmdb_id = ? AND (? IS NULL OR user_name = ?)")
        .bind(tmdb_id)
        .bind(owner)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
