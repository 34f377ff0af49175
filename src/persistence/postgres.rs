//! PostgreSQL implementation of the Room Store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{Room, RoomFilter, RoomMembership, UserProfile};
use super::{ProfileStore, RoomStore};
use crate::config::HubConfig;
use crate::domain::{RoomId, UserId};
use crate::error::HubError;

type RoomRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    Option<String>,
    i32,
    i32,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

type MembershipRow = (Uuid, Uuid, Uuid, bool, DateTime<Utc>);

const ROOM_COLUMNS: &str = "id, user_id, title, theme, type, description, max_members, \
                            current_members, is_active, created_at, updated_at";

const MEMBER_COLUMNS: &str = "id, room_id, user_id, is_host, joined_at";

fn room_from_row(row: RoomRow) -> Room {
    let (
        id,
        owner_id,
        title,
        theme,
        room_type,
        description,
        max_members,
        current_members,
        is_active,
        created_at,
        updated_at,
    ) = row;
    Room {
        id: RoomId::from_uuid(id),
        owner_id: UserId::from_uuid(owner_id),
        title,
        theme,
        room_type,
        description,
        max_members,
        current_members,
        is_active,
        created_at,
        updated_at,
    }
}

fn membership_from_row((id, room_id, user_id, is_host, joined_at): MembershipRow) -> RoomMembership {
    RoomMembership {
        id,
        room_id: RoomId::from_uuid(room_id),
        user_id: UserId::from_uuid(user_id),
        is_host,
        joined_at,
    }
}

/// Room Store backed by `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool from configuration and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`HubError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &HubConfig) -> Result<Self, HubError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| HubError::PersistenceError(e.to_string()))?;

        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RoomStore for PostgresStore {
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, HubError> {
        let row = sqlx::query_as::<_, RoomRow>(&format!(
            "SELECT {ROOM_COLUMNS} FROM practice_rooms WHERE id = $1"
        ))
        .bind(room_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(room_from_row))
    }

    async fn list_active_rooms(
        &self,
        filter: &RoomFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Room>, i64), HubError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM practice_rooms WHERE is_active \
             AND ($1::text IS NULL OR theme = $1) AND ($2::text IS NULL OR type = $2)",
        )
        .bind(filter.theme.as_deref())
        .bind(filter.room_type.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, RoomRow>(&format!(
            "SELECT {ROOM_COLUMNS} FROM practice_rooms WHERE is_active \
             AND ($1::text IS NULL OR theme = $1) AND ($2::text IS NULL OR type = $2) \
             ORDER BY created_at DESC OFFSET $3 LIMIT $4"
        ))
        .bind(filter.theme.as_deref())
        .bind(filter.room_type.as_deref())
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(room_from_row).collect(), total))
    }

    async fn create_room(&self, room: &Room, host: &RoomMembership) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO practice_rooms (id, user_id, title, theme, type, description, \
             max_members, current_members, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(room.id.as_uuid())
        .bind(room.owner_id.as_uuid())
        .bind(&room.title)
        .bind(&room.theme)
        .bind(&room.room_type)
        .bind(room.description.as_deref())
        .bind(room.max_members)
        .bind(room.current_members)
        .bind(room.is_active)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO practice_room_members (id, room_id, user_id, is_host, joined_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(host.id)
        .bind(host.room_id.as_uuid())
        .bind(host.user_id.as_uuid())
        .bind(host.is_host)
        .bind(host.joined_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_member_count(&self, room_id: RoomId, count: i32) -> Result<bool, HubError> {
        let result = sqlx::query(
            "UPDATE practice_rooms SET current_members = $2, updated_at = NOW() \
             WHERE id = $1 AND is_active",
        )
        .bind(room_id.as_uuid())
        .bind(count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_room(&self, room_id: RoomId) -> Result<bool, HubError> {
        let result = sqlx::query(
            "UPDATE practice_rooms SET is_active = FALSE, current_members = 0, updated_at = NOW() \
             WHERE id = $1 AND is_active",
        )
        .bind(room_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMembership>, HubError> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM practice_room_members WHERE room_id = $1 AND user_id = $2"
        ))
        .bind(room_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(membership_from_row))
    }

    async fn create_membership(&self, membership: &RoomMembership) -> Result<bool, HubError> {
        let result = sqlx::query(
            "INSERT INTO practice_room_members (id, room_id, user_id, is_host, joined_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (room_id, user_id) DO NOTHING",
        )
        .bind(membership.id)
        .bind(membership.room_id.as_uuid())
        .bind(membership.user_id.as_uuid())
        .bind(membership.is_host)
        .bind(membership.joined_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_membership(&self, room_id: RoomId, user_id: UserId) -> Result<bool, HubError> {
        let result =
            sqlx::query("DELETE FROM practice_room_members WHERE room_id = $1 AND user_id = $2")
                .bind(room_id.as_uuid())
                .bind(user_id.as_uuid())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_memberships(&self, room_id: RoomId) -> Result<i64, HubError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM practice_room_members WHERE room_id = $1",
        )
        .bind(room_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<RoomMembership>, HubError> {
        let rows = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM practice_room_members WHERE room_id = $1 \
             ORDER BY joined_at ASC"
        ))
        .bind(room_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(membership_from_row).collect())
    }

    async fn transfer_host(&self, room_id: RoomId, new_host: UserId) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE practice_room_members SET is_host = (user_id = $2) WHERE room_id = $1")
            .bind(room_id.as_uuid())
            .bind(new_host.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE practice_rooms SET user_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(room_id.as_uuid())
            .bind(new_host.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PostgresStore {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, HubError> {
        let row = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT username, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(username, avatar_url)| UserProfile {
            user_id,
            username,
            avatar_url,
        }))
    }
}
