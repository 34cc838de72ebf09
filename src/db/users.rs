use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::models::user::{NewUser, User, UserChanges, UserQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,

    #[error("unique constraint violated")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for user rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Live (not soft-deleted) user with this email.
    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn find_by_uuid(&self, user_uuid: Uuid) -> Result<User, StoreError>;

    async fn update(&self, user_uuid: Uuid, changes: UserChanges) -> Result<User, StoreError>;

    async fn update_password(&self, user_uuid: Uuid, password_hash: &str)
        -> Result<User, StoreError>;

    async fn list(&self, query: &UserQuery) -> Result<Vec<User>, StoreError>;

    async fn count(&self, search: Option<&str>, deleted: bool) -> Result<i64, StoreError>;

    async fn soft_delete(&self, user_uuid: Uuid) -> Result<User, StoreError>;

    async fn restore(&self, user_uuid: Uuid) -> Result<User, StoreError>;

    async fn delete(&self, user_uuid: Uuid) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Database(err),
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>, deleted: bool) {
    builder.push(" WHERE ");
    builder.push(if deleted {
        "deleted_at IS NOT NULL"
    } else {
        "deleted_at IS NULL"
    });

    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        builder
            .push(" AND (email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR full_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    #[instrument(skip(self, user), fields(email = %user.email))]
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users
                (user_uuid, email, password_hash, full_name, age, status, level, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.age)
        .bind(user.status)
        .bind(user.level)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    #[instrument(skip(self))]
    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self))]
    async fn find_by_uuid(&self, user_uuid: Uuid) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_uuid = ?")
            .bind(user_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, user_uuid: Uuid, changes: UserChanges) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                full_name = COALESCE(?, full_name),
                age = COALESCE(?, age),
                password_hash = COALESCE(?, password_hash),
                status = COALESCE(?, status),
                level = COALESCE(?, level),
                updated_at = ?
            WHERE user_uuid = ? AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(changes.full_name)
        .bind(changes.age)
        .bind(changes.password_hash)
        .bind(changes.status)
        .bind(changes.level)
        .bind(Utc::now())
        .bind(user_uuid.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    #[instrument(skip(self, password_hash))]
    async fn update_password(
        &self,
        user_uuid: Uuid,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET password_hash = ?, updated_at = ? WHERE user_uuid = ? RETURNING *",
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(user_uuid.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    #[instrument(skip(self))]
    async fn list(&self, query: &UserQuery) -> Result<Vec<User>, StoreError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM users");
        push_filters(&mut builder, query.search.as_deref(), query.deleted);
        // Column and direction come from closed enums, never from input text.
        builder.push(format!(
            " ORDER BY {} {}",
            query.order_by.column(),
            query.sort.keyword()
        ));
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        Ok(builder
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn count(&self, search: Option<&str>, deleted: bool) -> Result<i64, StoreError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut builder, search, deleted);
        let (total,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(total)
    }

    #[instrument(skip(self))]
    async fn soft_delete(&self, user_uuid: Uuid) -> Result<User, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET deleted_at = ?, updated_at = ?
            WHERE user_uuid = ? AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(user_uuid.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    #[instrument(skip(self))]
    async fn restore(&self, user_uuid: Uuid) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET deleted_at = NULL, updated_at = ?
            WHERE user_uuid = ? AND deleted_at IS NOT NULL
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(user_uuid.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    #[instrument(skip(self))]
    async fn delete(&self, user_uuid: Uuid) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>("DELETE FROM users WHERE user_uuid = ? RETURNING *")
            .bind(user_uuid.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)
    }
}
