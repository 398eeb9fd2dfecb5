//! HTTP error mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use drivehub_core::errors::DriveError;
use thiserror::Error;
use tracing::warn;

/// Errors returned by request handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    /// The caller is anonymous and the operation needs credentials, or the
    /// credentials did not match a configured user.
    #[error("Authentication required")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Drive(e) => match e {
                DriveError::NotFound(_) => StatusCode::NOT_FOUND,
                DriveError::NotAllowed(_) => StatusCode::FORBIDDEN,
                DriveError::Unsupported => StatusCode::NOT_IMPLEMENTED,
                DriveError::RemoteApi { .. } => StatusCode::BAD_GATEWAY,
                DriveError::Cancelled => StatusCode::CONFLICT,
                DriveError::Io(_) | DriveError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();
        if matches!(self, ApiError::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="drivehub""#),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_errors_map_to_status_codes() {
        let cases = [
            (DriveError::not_found("x"), StatusCode::NOT_FOUND),
            (DriveError::not_allowed("x"), StatusCode::FORBIDDEN),
            (DriveError::Unsupported, StatusCode::NOT_IMPLEMENTED),
            (
                DriveError::RemoteApi {
                    status: 500,
                    message: "x".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (DriveError::Cancelled, StatusCode::CONFLICT),
            (
                DriveError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn unauthorized_asks_for_basic_credentials() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="drivehub""#
        );
    }

    #[test]
    fn message_is_the_drive_error_text() {
        let error = ApiError::from(DriveError::not_found("home/a.txt"));
        assert_eq!(error.to_string(), "Not found: home/a.txt");
    }
}
