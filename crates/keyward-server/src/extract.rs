use axum::{
    extract::{rejection::JsonRejection, FromRequest, OptionalFromRequest, Request},
    Json,
};

use crate::error::Error;

/// `Json` body extractor whose rejections surface as `Error::InvalidArgument`,
/// so malformed bodies get the same 400 `{"error": ...}` shape as every
/// other bad input.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(rejected)?;
        Ok(Self(value))
    }
}

/// A missing body (no `Content-Type`) yields `None`; a present but broken one
/// is still rejected.
impl<T, S> OptionalFromRequest<S> for JsonBody<T>
where
    Json<T>: OptionalFromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let body = <Json<T> as OptionalFromRequest<S>>::from_request(req, state)
            .await
            .map_err(rejected)?;
        Ok(body.map(|Json(value)| Self(value)))
    }
}

fn rejected(rejection: JsonRejection) -> Error {
    Error::InvalidArgument(rejection.body_text())
}
