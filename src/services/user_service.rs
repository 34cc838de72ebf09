use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::{CacheStore, StoreError, UserStore};
use crate::error::AppError;
use crate::models::user::{NewUser, OrderBy, SortOrder, User, UserChanges, UserQuery};
use crate::utils::password::hash_password;
use crate::utils::strings::normalize_email;

const LIST_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const LIST_CACHE_PATTERN: &str = "users:*";
const MAX_PAGE_LIMIT: u32 = 500;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 100, message = "must not be empty"))]
    pub full_name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(range(min = 1, max = 150))]
    pub age: Option<i32>,
    #[validate(length(min = 8, max = 72, message = "must be 8 to 72 characters"))]
    pub password: String,
    #[validate(range(min = 1, max = 3))]
    pub status: i32,
    #[validate(range(min = 1, max = 3))]
    pub level: i32,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 1, max = 100, message = "must not be empty"))]
    pub full_name: Option<String>,
    #[validate(range(min = 1, max = 150))]
    pub age: Option<i32>,
    #[validate(length(min = 8, max = 72, message = "must be 8 to 72 characters"))]
    pub password: Option<String>,
    #[validate(range(min = 1, max = 3))]
    pub status: Option<i32>,
    #[validate(range(min = 1, max = 3))]
    pub level: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ListUsers {
    pub search: Option<String>,
    pub order_by: OrderBy,
    pub sort: SortOrder,
    pub page: u32,
    /// `0` selects the configured default.
    pub limit: u32,
    pub deleted: bool,
}

impl Default for ListUsers {
    fn default() -> Self {
        Self {
            search: None,
            order_by: OrderBy::CreatedAt,
            sort: SortOrder::Desc,
            page: 1,
            limit: 0,
            deleted: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn CacheStore>,
    bcrypt_cost: u32,
    page_limit_default: u32,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: Arc<dyn CacheStore>,
        bcrypt_cost: u32,
        page_limit_default: u32,
    ) -> Self {
        Self {
            users,
            cache,
            bcrypt_cost,
            page_limit_default,
        }
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, params: ListUsers) -> Result<UserPage, AppError> {
        let page = params.page.max(1);
        let limit = match params.limit {
            0 => self.page_limit_default,
            n => n.min(MAX_PAGE_LIMIT),
        };
        let search = params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let cache_key = format!(
            "users:{}:{}:{}:{}:{}:{}",
            search.as_deref().unwrap_or("none"),
            params.order_by.column(),
            params.sort.keyword().to_ascii_lowercase(),
            page,
            limit,
            params.deleted
        );

        match self.cache.get(&cache_key).await {
            Ok(raw) => match serde_json::from_str::<UserPage>(&raw) {
                Ok(cached) => return Ok(cached),
                Err(e) => warn!(error = %e, "Discarding undecodable cached user page"),
            },
            Err(e) if e.is_miss() => {}
            Err(e) => warn!(error = %e, "User list cache unavailable"),
        }

        let query = UserQuery {
            search: search.clone(),
            order_by: params.order_by,
            sort: params.sort,
            limit,
            offset: (page - 1).saturating_mul(limit),
            deleted: params.deleted,
        };

        let users = self
            .users
            .list(&query)
            .await
            .map_err(|e| AppError::internal("Failed to get all users", e))?;
        let total = self
            .users
            .count(search.as_deref(), params.deleted)
            .await
            .map_err(|e| AppError::internal("Failed to count users", e))?;

        let result = UserPage {
            users,
            total,
            page,
            limit,
        };

        match serde_json::to_string(&result) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&cache_key, &raw, LIST_CACHE_TTL).await {
                    warn!(error = %e, "Failed to cache user page");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode user page"),
        }

        Ok(result)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_user(&self, input: CreateUser) -> Result<User, AppError> {
        let password_hash = hash_password(&input.password, self.bcrypt_cost)
            .map_err(|e| AppError::internal("Failed to hash password", e))?;

        let user = self
            .users
            .create(NewUser {
                email: normalize_email(&input.email),
                password_hash,
                full_name: input.full_name.trim().to_string(),
                age: input.age,
                status: input.status,
                level: input.level,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict => AppError::conflict("Email already exists"),
                other => AppError::internal("Failed to create a new user", other),
            })?;

        self.invalidate_lists().await;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, user_uuid: Uuid) -> Result<User, AppError> {
        self.users.find_by_uuid(user_uuid).await.map_err(not_found)
    }

    #[instrument(skip(self, input))]
    pub async fn update_user(&self, user_uuid: Uuid, input: UpdateUser) -> Result<User, AppError> {
        let password_hash = match input.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => Some(
                hash_password(password, self.bcrypt_cost)
                    .map_err(|e| AppError::internal("Failed to hash password", e))?,
            ),
            None => None,
        };

        let changes = UserChanges {
            full_name: input.full_name.map(|n| n.trim().to_string()),
            age: input.age,
            password_hash,
            status: input.status,
            level: input.level,
        };

        let user = self
            .users
            .update(user_uuid, changes)
            .await
            .map_err(not_found)?;

        self.invalidate_lists().await;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn soft_delete_user(&self, user_uuid: Uuid) -> Result<User, AppError> {
        let user = self.users.soft_delete(user_uuid).await.map_err(not_found)?;
        self.invalidate_lists().await;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn restore_user(&self, user_uuid: Uuid) -> Result<User, AppError> {
        let user = self.users.restore(user_uuid).await.map_err(not_found)?;
        self.invalidate_lists().await;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_uuid: Uuid) -> Result<(), AppError> {
        self.users.delete(user_uuid).await.map_err(not_found)?;
        self.invalidate_lists().await;
        Ok(())
    }

    async fn invalidate_lists(&self) {
        if let Err(e) = self.cache.delete(LIST_CACHE_PATTERN).await {
            warn!(error = %e, "Failed to clear user list cache");
        }
    }
}

fn not_found(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound => AppError::not_found("User not found"),
        StoreError::Conflict => AppError::conflict("Email already exists"),
        other => AppError::internal("User store failure", other),
    }
}
