use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use uuid::Uuid;

pub const STATUS_ACTIVE: i32 = 1;
pub const STATUS_INACTIVE: i32 = 2;
pub const STATUS_BANNED: i32 = 3;

pub const LEVEL_ADMINISTRATOR: i32 = 1;
pub const LEVEL_MODERATOR: i32 = 2;
pub const LEVEL_MEMBER: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub user_uuid: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub age: Option<i32>,
    pub status: i32,
    /// Also used as the role carried in access tokens.
    pub level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_uuid: String = row.try_get("user_uuid")?;
        let user_uuid = Uuid::parse_str(&raw_uuid).map_err(|e| sqlx::Error::ColumnDecode {
            index: "user_uuid".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            user_uuid,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            full_name: row.try_get("full_name")?,
            age: row.try_get("age")?,
            status: row.try_get("status")?,
            level: row.try_get("level")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// Insert parameters. `password_hash` is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub age: Option<i32>,
    pub status: i32,
    pub level: i32,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub age: Option<i32>,
    pub password_hash: Option<String>,
    pub status: Option<i32>,
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[serde(alias = "user_id")]
    Id,
    #[serde(alias = "user_created_at")]
    CreatedAt,
}

impl OrderBy {
    pub fn column(self) -> &'static str {
        match self {
            OrderBy::Id => "id",
            OrderBy::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserQuery {
    pub search: Option<String>,
    pub order_by: OrderBy,
    pub sort: SortOrder,
    pub limit: u32,
    pub offset: u32,
    pub deleted: bool,
}

pub fn status_name(status: i32) -> &'static str {
    match status {
        STATUS_ACTIVE => "Active",
        STATUS_INACTIVE => "Inactive",
        STATUS_BANNED => "Banned",
        _ => "None",
    }
}

pub fn level_name(level: i32) -> &'static str {
    match level {
        LEVEL_ADMINISTRATOR => "Administrator",
        LEVEL_MODERATOR => "Moderator",
        LEVEL_MEMBER => "Member",
        _ => "None",
    }
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserDto {
    pub uuid: String,
    pub full_name: String,
    pub email_address: String,
    pub age: Option<i32>,
    pub status: &'static str,
    pub level: &'static str,
    pub created_at: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.user_uuid.to_string(),
            full_name: user.full_name.clone(),
            email_address: user.email.clone(),
            age: user.age,
            status: status_name(user.status),
            level: level_name(user.level),
            created_at: user.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
