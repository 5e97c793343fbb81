//! SQLite-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::model::{
    direct_key, Message, MessageId, PushEndpoint, Room, RoomId, User, UserId,
};
use parley_core::store::{MessageStore, RoomStore, StoreResult, UserStore};
use parley_core::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::rows::{
    kind_str, millis, parse_id, EndpointRow, MemberRow, MessageRow, RoomRow, UserRow,
};
use crate::schema;

const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_id, body, file_url, file_type, edited, deleted, created_at, updated_at";
const ROOM_COLUMNS: &str = "id, name, kind, last_message_at, created_at, updated_at";

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool and create the schema.
    ///
    /// File databases are created when missing. `sqlite::memory:` databases
    /// exist per connection, so use a single connection for those.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the database cannot be opened
    /// or the schema cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self::from_pool(pool).await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    /// Wrap an existing pool and create the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        schema::init(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }

    async fn members_of(&self, room_ids: &[String]) -> StoreResult<HashMap<String, Vec<UserId>>> {
        let mut grouped: HashMap<String, Vec<UserId>> = HashMap::new();
        if room_ids.is_empty() {
            return Ok(grouped);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT room_id, user_id FROM room_members WHERE room_id IN (");
        let mut ids = query.separated(", ");
        for id in room_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");

        let rows: Vec<MemberRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        for row in rows {
            grouped
                .entry(row.room_id)
                .or_default()
                .push(parse_id(&row.user_id)?);
        }
        Ok(grouped)
    }

    async fn hydrate_rooms(&self, rows: Vec<RoomRow>) -> StoreResult<Vec<Room>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut members = self.members_of(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let room_members = members.remove(&row.id).unwrap_or_default();
                row.into_room(room_members)
            })
            .collect()
    }

    async fn endpoints_of(&self, user_ids: &[String]) -> StoreResult<HashMap<String, Vec<PushEndpoint>>> {
        let mut grouped: HashMap<String, Vec<PushEndpoint>> = HashMap::new();
        if user_ids.is_empty() {
            return Ok(grouped);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT user_id, endpoint, keys FROM push_endpoints WHERE user_id IN (");
        let mut ids = query.separated(", ");
        for id in user_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");

        let rows: Vec<EndpointRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        for row in rows {
            grouped
                .entry(row.user_id.clone())
                .or_default()
                .push(row.into_endpoint());
        }
        Ok(grouped)
    }

    async fn hydrate_users(&self, rows: Vec<UserRow>) -> StoreResult<Vec<User>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut endpoints = self.endpoints_of(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let user_endpoints = endpoints.remove(&row.id).unwrap_or_default();
                row.into_user(user_endpoints)
            })
            .collect()
    }
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn insert_room(&self, room: &Room) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let inserted = sqlx::query(
            r#"INSERT INTO rooms (id, name, kind, direct_key, last_message_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(kind_str(room.kind))
        .bind(room.direct_key())
        .bind(millis(room.last_message_at))
        .bind(millis(room.created_at))
        .bind(millis(room.updated_at))
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StoreError::Conflict("direct room already exists".into()));
            }
            return Err(backend(e));
        }

        for member in &room.members {
            sqlx::query("INSERT INTO room_members (room_id, user_id) VALUES (?, ?)")
                .bind(room.id.to_string())
                .bind(member.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(room = %room.id, "Room stored");
        Ok(())
    }

    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        let row: Option<RoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match row {
            Some(row) => Ok(self.hydrate_rooms(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_direct(&self, a: UserId, b: UserId) -> StoreResult<Option<Room>> {
        let row: Option<RoomRow> =
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE direct_key = ?"))
                .bind(direct_key(a, b))
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match row {
            Some(row) => Ok(self.hydrate_rooms(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn rooms_for_member(&self, user_id: UserId) -> StoreResult<Vec<Room>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            r#"SELECT r.id, r.name, r.kind, r.last_message_at, r.created_at, r.updated_at
               FROM rooms r
               JOIN room_members m ON m.room_id = r.id
               WHERE m.user_id = ?
               ORDER BY r.last_message_at DESC, r.updated_at DESC"#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        self.hydrate_rooms(rows).await
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM room_members WHERE room_id = ? AND user_id = ?")
                .bind(room_id.to_string())
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        Ok(found.is_some())
    }

    async fn touch_room(&self, room_id: RoomId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE rooms SET last_message_at = ?, updated_at = ?
               WHERE id = ? AND last_message_at < ?"#,
        )
        .bind(millis(at))
        .bind(millis(at))
        .bind(room_id.to_string())
        .bind(millis(at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM rooms WHERE id = ?")
                .bind(room_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            if exists.is_none() {
                return Err(StoreError::NotFound("room"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        let (file_url, file_type) = match &message.attachment {
            Some(a) => (Some(a.url.as_str()), a.mime_type.as_deref()),
            None => (None, None),
        };
        sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(message.id.to_string())
        .bind(message.room_id.to_string())
        .bind(message.sender_id.to_string())
        .bind(&message.body)
        .bind(file_url)
        .bind(file_type)
        .bind(message.edited)
        .bind(message.is_deleted())
        .bind(millis(message.created_at))
        .bind(millis(message.updated_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(Message::try_from).transpose()
    }

    async fn messages_in_room(&self, room_id: RoomId) -> StoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn update_body(
        &self,
        id: MessageId,
        body: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        let result = sqlx::query(
            "UPDATE messages SET body = ?, edited = 1, updated_at = ? WHERE id = ? AND deleted = 0",
        )
        .bind(body)
        .bind(millis(at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.message(id).await
    }

    async fn tombstone(&self, id: MessageId, at: DateTime<Utc>) -> StoreResult<Option<Message>> {
        let result = sqlx::query(
            r#"UPDATE messages
               SET deleted = 1, body = '', file_url = NULL, file_type = NULL, updated_at = ?
               WHERE id = ? AND deleted = 0"#,
        )
        .bind(millis(at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.message(id).await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"INSERT INTO users (id, name, email, avatar) VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 avatar = excluded.avatar"#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.avatar)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM push_endpoints WHERE user_id = ?")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        for endpoint in &user.endpoints {
            sqlx::query("INSERT OR IGNORE INTO push_endpoints (user_id, endpoint, keys) VALUES (?, ?, ?)")
                .bind(user.id.to_string())
                .bind(&endpoint.endpoint)
                .bind(endpoint.keys.as_ref().map(|k| k.to_string()))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users(&[id]).await?.pop())
    }

    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name, email, avatar FROM users WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows: Vec<UserRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        self.hydrate_users(rows).await
    }

    async fn find_by_emails(&self, emails: &[String]) -> StoreResult<Vec<UserId>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM users WHERE lower(email) IN (");
        let mut separated = query.separated(", ");
        for email in emails {
            separated.push_bind(email.trim().to_lowercase());
        }
        separated.push_unseparated(")");

        let ids: Vec<String> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    async fn add_endpoint(&self, user_id: UserId, endpoint: &PushEndpoint) -> StoreResult<bool> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound("user"));
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO push_endpoints (user_id, endpoint, keys) VALUES (?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(&endpoint.endpoint)
        .bind(endpoint.keys.as_ref().map(|k| k.to_string()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }
}
