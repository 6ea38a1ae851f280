use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    order_status::TransitionError,
    response::{ApiResponse, Meta},
    vnpay::VnPayError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Missing or malformed transaction reference")]
    MissingReference,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl From<VnPayError> for AppError {
    fn from(err: VnPayError) -> Self {
        match err {
            VnPayError::InvalidAmount => AppError::InvalidAmount(err.to_string()),
            VnPayError::InvalidSecret | VnPayError::InvalidBaseUrl => {
                AppError::Internal(anyhow::anyhow!(err))
            }
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::OrderNotFound | AppError::PaymentNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(_)
            | AppError::InvalidAmount(_)
            | AppError::MissingReference
            | AppError::Transition(TransitionError::InvalidStatus(_)) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::Transition(TransitionError::ActorNotAllowed { .. }) => {
                StatusCode::FORBIDDEN
            }
            AppError::Conflict(_)
            | AppError::Transition(TransitionError::IllegalTransition { .. }) => StatusCode::CONFLICT,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        // Display strings never carry the wrapped source, so they are safe to return.
        let message = self.to_string();
        let body = ApiResponse {
            message: message.clone(),
            data: Some(ErrorData { error: message }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
