use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    NoWindow,
    Infeasible,
    SolverTimeout,
    SolverAborted,
    Transient,
    Internal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn no_window(task_id: i64) -> Self {
        Self {
            code: ErrorCode::NoWindow,
            message: format!("no feasible placement window for task {}", task_id),
            details: Some(serde_json::json!({ "task_id": task_id })),
        }
    }

    pub fn infeasible(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Infeasible, message)
    }

    pub fn solver_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SolverTimeout, message)
    }

    pub fn solver_aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SolverAborted, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Process exit code for the reschedule operation (0 = success).
    pub fn exit_code(&self) -> i32 {
        match self.code {
            ErrorCode::Validation | ErrorCode::NoWindow => 2,
            ErrorCode::Infeasible => 3,
            ErrorCode::SolverTimeout | ErrorCode::SolverAborted => 4,
            _ => 5,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::not_found("Resource not found"),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    ApiError::conflict(db_err.message().to_string())
                } else {
                    ApiError::internal(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ApiError::transient("Database temporarily unavailable")
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ApiError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_sets_code_message() {
        let err = ApiError::validation("Invalid input");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "Invalid input");
        assert!(err.details.is_none());
    }

    #[test]
    fn error_serializes_with_snake_case_code() {
        let err = ApiError::no_window(7);
        let json = serde_json::to_string(&err).expect("serialize ApiError");
        assert!(json.contains("\"code\":\"no_window\""));
        assert!(json.contains("\"task_id\":7"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn exit_codes_follow_reschedule_contract() {
        assert_eq!(ApiError::validation("x").exit_code(), 2);
        assert_eq!(ApiError::no_window(1).exit_code(), 2);
        assert_eq!(ApiError::infeasible("x").exit_code(), 3);
        assert_eq!(ApiError::solver_timeout("x").exit_code(), 4);
        assert_eq!(ApiError::internal("x").exit_code(), 5);
    }
}
