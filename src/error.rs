use thiserror::Error;
use tonic::Status;

use crate::models::item::ItemStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("The parameter \"{0}\" is required")]
    MissingParameter(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status \"{0}\". Use: {}", ItemStatus::accepted_values())]
    InvalidStatus(String),

    /// An item code that already exists was rejected by the store.
    #[error("Item code {0} is already taken")]
    UniquenessViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                Status::internal(format!("Database error: {}", e))
            }
            e @ (AppError::MissingParameter(_)
            | AppError::InvalidStatus(_)
            | AppError::InvalidInput(_)) => Status::invalid_argument(e.to_string()),
            AppError::NotFound(msg) => Status::not_found(msg),
            // Creation retries these; reaching a caller means a bug upstream
            e @ AppError::UniquenessViolation(_) => Status::internal(e.to_string()),
            AppError::Unauthenticated(msg) => Status::unauthenticated(msg),
            AppError::PermissionDenied(msg) => Status::permission_denied(msg),
            AppError::Internal(msg) => Status::internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// PostgreSQL SQLSTATE for unique_violation.
pub const PG_UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL SQLSTATE for foreign_key_violation.
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Returns the SQLSTATE of a database error, if any.
pub fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_invalid_status_lists_accepted_values() {
        let msg = AppError::InvalidStatus("FOO".to_string()).to_string();
        assert!(msg.contains("FOO"));
        assert!(msg.contains("DISPONIVEL"));
        assert!(msg.contains("RESGATADO"));
    }

    #[test]
    fn test_status_mapping() {
        let status: Status = AppError::MissingParameter("code").into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("\"code\""));

        let status: Status = AppError::NotFound("Item not found".to_string()).into();
        assert_eq!(status.code(), Code::NotFound);

        let status: Status = AppError::InvalidStatus("FOO".to_string()).into();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status: Status = AppError::PermissionDenied("staff only".to_string()).into();
        assert_eq!(status.code(), Code::PermissionDenied);

        let status: Status = AppError::Unauthenticated("no".to_string()).into();
        assert_eq!(status.code(), Code::Unauthenticated);
    }
}
