use crate::auth::AuthError;
use crate::store::StoreError;
use huddle_models::gateway::{ErrorCode, MessageError};
use huddle_util::validation::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("forbidden")]
    Forbidden,
    #[error("message content is empty")]
    EmptyMessage,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Auth(_) => ErrorCode::AuthFailed,
            CoreError::Forbidden => ErrorCode::Forbidden,
            CoreError::EmptyMessage => ErrorCode::EmptyMessage,
            CoreError::Validation(_) | CoreError::Conflict(_) => ErrorCode::ValidationError,
            CoreError::NotFound => ErrorCode::NotFound,
            CoreError::StoreUnavailable(_) | CoreError::Internal(_) => ErrorCode::StoreUnavailable,
        }
    }

    /// The error as it is reported to a single client. Store details stay in the logs.
    pub fn to_client(&self, room_id: Option<i64>, nonce: Option<String>) -> MessageError {
        let message = match self {
            CoreError::StoreUnavailable(_) | CoreError::Internal(_) => {
                "the message store is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        MessageError {
            code: self.code(),
            message,
            room_id,
            nonce,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidReply => {
                CoreError::Validation("reply target does not exist in this room".into())
            }
            StoreError::Unavailable(msg) => CoreError::StoreUnavailable(msg),
        }
    }
}

impl From<huddle_db::DbError> for CoreError {
    fn from(err: huddle_db::DbError) -> Self {
        match err {
            huddle_db::DbError::NotFound => CoreError::NotFound,
            huddle_db::DbError::Sqlx(sqlx_err) => match sqlx_err.as_database_error() {
                Some(db) if db.is_unique_violation() => {
                    CoreError::Conflict("resource already exists".into())
                }
                _ => CoreError::StoreUnavailable(sqlx_err.to_string()),
            },
        }
    }
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_details_are_not_leaked_to_clients() {
        let err = CoreError::StoreUnavailable("disk I/O error at /var/lib/huddle.db".into());
        let reported = err.to_client(Some(3), Some("n-1".into()));
        assert_eq!(reported.code, ErrorCode::StoreUnavailable);
        assert!(!reported.message.contains("/var/lib"));
        assert_eq!(reported.room_id, Some(3));
        assert_eq!(reported.nonce.as_deref(), Some("n-1"));
    }

    #[test]
    fn invalid_reply_maps_to_validation() {
        let err: CoreError = StoreError::InvalidReply.into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(CoreError::Forbidden.code(), ErrorCode::Forbidden);
        assert_eq!(CoreError::EmptyMessage.code(), ErrorCode::EmptyMessage);
    }
}
