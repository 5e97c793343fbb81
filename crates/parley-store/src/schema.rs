//! Table definitions.

use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id         TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        email      TEXT NOT NULL,
        avatar     TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS users_email ON users (lower(email))",
    r#"CREATE TABLE IF NOT EXISTS push_endpoints (
        user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        endpoint   TEXT NOT NULL,
        keys       TEXT,
        PRIMARY KEY (user_id, endpoint)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rooms (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        kind            TEXT NOT NULL,
        direct_key      TEXT UNIQUE,
        last_message_at INTEGER NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS room_members (
        room_id    TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        user_id    TEXT NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS room_members_user ON room_members (user_id)",
    r#"CREATE TABLE IF NOT EXISTS messages (
        id         TEXT PRIMARY KEY,
        room_id    TEXT NOT NULL REFERENCES rooms(id),
        sender_id  TEXT NOT NULL,
        body       TEXT NOT NULL DEFAULT '',
        file_url   TEXT,
        file_type  TEXT,
        edited     INTEGER NOT NULL DEFAULT 0,
        deleted    INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS messages_room_order ON messages (room_id, created_at, id)",
];

/// Create every table and index that does not exist yet.
pub(crate) async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
