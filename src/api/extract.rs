use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, ErrorCode, ValidationRejection};

/// `Json<T>` that also runs `T::validate`.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::new(ErrorCode::BadRequest, e.body_text()).into_response())?;
        value
            .validate()
            .map_err(|e| ValidationRejection(e).into_response())?;
        Ok(Self(value))
    }
}

/// `Query<T>` that also runs `T::validate`.
pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::new(ErrorCode::BadRequest, e.body_text()).into_response())?;
        value
            .validate()
            .map_err(|e| ValidationRejection(e).into_response())?;
        Ok(Self(value))
    }
}

pub fn parse_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::new(ErrorCode::BadRequest, "Invalid user uuid"))
}
