use uuid::Uuid;

use crate::error::ApiError;
use crate::model::TokenSource;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("{0} token not found")]
    MissingToken(TokenSource),

    #[error("refresh cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::UserNotFound(_) => Self::NotFound("user".into()),
            SyncError::MissingToken(_) => Self::Conflict(err.to_string()),
            SyncError::Cancelled => Self::ServiceUnavailable(err.to_string()),
            SyncError::Store(e) => Self::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_maps_to_conflict() {
        let api: ApiError = SyncError::MissingToken(TokenSource::GithubCom).into();
        assert!(matches!(api, ApiError::Conflict(msg) if msg == "github.com token not found"));
    }

    #[test]
    fn unknown_user_maps_to_404() {
        let api: ApiError = SyncError::UserNotFound(Uuid::nil()).into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }

    #[test]
    fn cancelled_maps_to_503() {
        let api: ApiError = SyncError::Cancelled.into();
        assert!(matches!(api, ApiError::ServiceUnavailable(_)));
    }

    #[test]
    fn store_errors_pass_through() {
        let api: ApiError = SyncError::Store(StoreError::NotFound("container")).into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }
}
