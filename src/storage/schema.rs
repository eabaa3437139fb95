//! Database schema definitions
//!
//! This module contains the SQL schema for the embedded SQLite backend.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested posts, keyed by shortcode
CREATE TABLE IF NOT EXISTS posts (
    code TEXT PRIMARY KEY,
    username TEXT,
    caption TEXT NOT NULL DEFAULT '',
    hashtags TEXT NOT NULL DEFAULT '[]',
    image_url TEXT,
    storage_url TEXT,
    media_type INTEGER NOT NULL DEFAULT 1,
    likes INTEGER,
    comments_count INTEGER,
    views INTEGER,
    location_name TEXT,
    location_lat REAL,
    location_lng REAL,
    posted_at TEXT,
    scraped_at TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_posts_username ON posts(username);
CREATE INDEX IF NOT EXISTS idx_posts_likes ON posts(likes DESC);

-- Users, minimal or enriched
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    full_name TEXT,
    bio TEXT,
    followers INTEGER,
    following INTEGER,
    post_count INTEGER,
    is_verified INTEGER NOT NULL DEFAULT 0,
    is_private INTEGER,
    profile_pic_url TEXT,
    scraped_at TEXT NOT NULL
);

-- Comments, owned by posts
CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    post_code TEXT NOT NULL REFERENCES posts(code),
    username TEXT,
    text TEXT NOT NULL DEFAULT '',
    likes INTEGER NOT NULL DEFAULT 0,
    posted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_code);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
