use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    api::{
        extract::{parse_uuid, ValidatedJson, ValidatedQuery},
        response::{paginated, success, success_message, ApiResponse, Pagination},
    },
    error::AppError,
    middleware::CurrentUser,
    models::user::{OrderBy, SortOrder, UserDto},
    services::user_service::{CreateUser, ListUsers, UpdateUser},
    AppState,
};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListUsersQuery {
    #[validate(length(min = 3, max = 50, message = "must be 3 to 50 characters"))]
    pub search: Option<String>,
    pub order_by: Option<OrderBy>,
    pub sort: Option<SortOrder>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<u32>,
}

impl ListUsersQuery {
    fn into_params(self, deleted: bool) -> ListUsers {
        let defaults = ListUsers::default();
        ListUsers {
            search: self.search,
            order_by: self.order_by.unwrap_or(defaults.order_by),
            sort: self.sort.unwrap_or(defaults.sort),
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
            deleted,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/me", get(me))
        .route("/soft-deleted", get(list_soft_deleted_users))
        .route(
            "/:uuid",
            get(get_user).put(update_user).delete(soft_delete_user),
        )
        .route("/:uuid/restore", patch(restore_user))
        .route("/:uuid/trash", delete(delete_user))
}

pub async fn me(current_user: CurrentUser) -> Json<ApiResponse<CurrentUser>> {
    success("Current user", current_user)
}

async fn list(
    state: &AppState,
    query: ListUsersQuery,
    deleted: bool,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, AppError> {
    let page = state.users.list_users(query.into_params(deleted)).await?;
    let users = page.users.iter().map(UserDto::from).collect();
    Ok(paginated(
        "Get users successfully",
        users,
        Pagination::new(page.page, page.limit, page.total),
    ))
}

pub async fn list_users(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ListUsersQuery>,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, AppError> {
    list(&state, query, false).await
}

pub async fn list_soft_deleted_users(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ListUsersQuery>,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, AppError> {
    list(&state, query, true).await
}

pub async fn create_user(
    State(state): State<AppState>,
    ValidatedJson(input): ValidatedJson<CreateUser>,
) -> Result<(StatusCode, Json<ApiResponse<UserDto>>), AppError> {
    let user = state.users.create_user(input).await?;
    Ok((
        StatusCode::CREATED,
        success("Create user successfully", UserDto::from(&user)),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.users.get_user(parse_uuid(&uuid)?).await?;
    Ok(success("Get user successfully", UserDto::from(&user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    ValidatedJson(input): ValidatedJson<UpdateUser>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.users.update_user(parse_uuid(&uuid)?, input).await?;
    Ok(success("Update user successfully", UserDto::from(&user)))
}

pub async fn soft_delete_user(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.users.soft_delete_user(parse_uuid(&uuid)?).await?;
    Ok(success("Delete user successfully", UserDto::from(&user)))
}

pub async fn restore_user(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.users.restore_user(parse_uuid(&uuid)?).await?;
    Ok(success("Restore user successfully", UserDto::from(&user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.users.delete_user(parse_uuid(&uuid)?).await?;
    Ok(success_message("Delete user permanently successfully"))
}
