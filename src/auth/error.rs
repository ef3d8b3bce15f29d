//! Error taxonomy surfaced by every authentication operation.

use crate::{
    store::StoreError,
    token::{IssueError, codec},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("token expired")]
    Expired,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON body returned for every error.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `unauthenticated` or `expired`.
    pub code: String,
    pub message: String,
}

impl AuthError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::Expired => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Expired => "expired",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal(_) => "internal",
        }
    }

    pub(crate) fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                error!("Internal error: {detail}");
                "internal error".to_string()
            }
            Self::PermissionDenied(detail)
            | Self::NotFound(detail)
            | Self::InvalidArgument(detail) => detail.clone(),
            Self::Unauthenticated | Self::Expired => self.to_string(),
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::NotFound("record not found".to_string())
        } else {
            Self::internal(err)
        }
    }
}

impl From<codec::Error> for AuthError {
    fn from(err: codec::Error) -> Self {
        match err {
            codec::Error::Expired => Self::Expired,
            codec::Error::MissingSecret | codec::Error::Encode(_) => Self::internal(err),
            codec::Error::UnsupportedAlgorithm(_)
            | codec::Error::NotYetValid
            | codec::Error::InvalidSignature
            | codec::Error::Malformed(_) => Self::Unauthenticated,
        }
    }
}

impl From<IssueError> for AuthError {
    fn from(err: IssueError) -> Self {
        Self::internal(err)
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
