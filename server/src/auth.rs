//! HTTP Basic authentication against the configured users.

use axum::http::{header, HeaderMap};
use base64::Engine;
use drivehub_core::config::UserDefinition;
use drivehub_core::drive::utils::clean_path;
use drivehub_core::permission::{Permission, PermissionTable, Subject};
use tracing::debug;

use crate::error::ApiError;

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User {
        username: String,
        subjects: Vec<Subject>,
    },
}

impl Caller {
    /// Identify the caller from the `Authorization` header.
    ///
    /// No header means anonymous; a header that does not match a
    /// configured user is rejected.
    pub fn from_headers(headers: &HeaderMap, users: &[UserDefinition]) -> Result<Self, ApiError> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Caller::Anonymous);
        };
        let value = value.to_str().map_err(|_| ApiError::Unauthorized)?;
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or(ApiError::Unauthorized)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| ApiError::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;
        let (username, password) = decoded.split_once(':').ok_or(ApiError::Unauthorized)?;

        match users
            .iter()
            .find(|u| u.username == username && u.password == password)
        {
            Some(user) => Ok(Caller::User {
                username: user.username.clone(),
                subjects: user.subjects(),
            }),
            None => {
                debug!("Rejected credentials for '{}'", username);
                Err(ApiError::Unauthorized)
            }
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            Caller::Anonymous => &[],
            Caller::User { subjects, .. } => subjects,
        }
    }

    /// Task owner key: the username, `None` for anonymous callers.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::User { username, .. } => Some(username),
        }
    }

    /// The refusal for this caller: a credential challenge when anonymous.
    pub fn denied(&self, what: impl Into<String>) -> ApiError {
        match self {
            Caller::Anonymous => ApiError::Unauthorized,
            Caller::User { .. } => ApiError::Forbidden(what.into()),
        }
    }

    /// Effective permission mask of this caller on a logical path.
    pub fn permission(&self, table: &PermissionTable, path: &str) -> Permission {
        table.resolve_for(&clean_path(path), self.subjects())
    }

    /// Fail unless the caller holds every bit of `required` on `path`.
    pub fn require(
        &self,
        table: &PermissionTable,
        path: &str,
        required: Permission,
    ) -> Result<(), ApiError> {
        if self.permission(table, path).contains(required) {
            return Ok(());
        }
        Err(self.denied(clean_path(path)))
    }
}
