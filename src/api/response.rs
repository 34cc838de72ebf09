use axum::Json;
use serde::Serialize;

use crate::utils::strings::capitalize_first;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total_items: i64) -> Self {
        let limit_items = i64::from(limit.max(1));
        let total_pages = (total_items + limit_items - 1) / limit_items;
        Self {
            page,
            limit,
            total_items,
            total_pages,
            has_next: i64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }
}

pub fn success<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        status: "success",
        message: capitalize_first(message),
        data: Some(data),
        pagination: None,
    })
}

pub fn success_message(message: &str) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        status: "success",
        message: capitalize_first(message),
        data: None,
        pagination: None,
    })
}

pub fn paginated<T: Serialize>(
    message: &str,
    data: T,
    pagination: Pagination,
) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        status: "success",
        message: capitalize_first(message),
        data: Some(data),
        pagination: Some(pagination),
    })
}
