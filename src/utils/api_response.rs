use serde::{Deserialize, Serialize};

pub const CODE_OK: u16 = 200;
pub const CODE_NOT_FOUND: u16 = 404;
pub const CODE_CONFLICT: u16 = 409;
pub const CODE_INTERNAL: u16 = 500;

/// Placeholder payload for responses without data
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EmptyData;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            message: None,
            data: Some(data),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::error_with_code(CODE_INTERNAL, message)
    }

    pub fn error_with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Failure that still carries a payload, e.g. a failed rollback report
    pub fn error_with_data(code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Result type returned by command functions
pub type ApiResult<T> = Result<ApiResponse<T>, String>;

/// Success response
///
/// - `api_success!(data)`
/// - `api_success!()` for an empty payload
#[macro_export]
macro_rules! api_success {
    () => {
        $crate::utils::ApiResponse::ok($crate::utils::EmptyData::default())
    };

    ($data:expr) => {
        $crate::utils::ApiResponse::ok($data)
    };
}

/// Error response
///
/// - `api_error!(message)` answers 500
/// - `api_error!(code, message)`
#[macro_export]
macro_rules! api_error {
    ($code:expr, $message:expr) => {
        $crate::utils::ApiResponse::error_with_code($code, $message)
    };

    ($message:expr) => {
        $crate::utils::ApiResponse::error($message)
    };
}
