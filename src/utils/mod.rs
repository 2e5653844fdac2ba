pub mod api_response;
pub mod logging;

pub use api_response::{
    ApiResponse, ApiResult, EmptyData, CODE_CONFLICT, CODE_INTERNAL, CODE_NOT_FOUND, CODE_OK,
};
pub use logging::init_logging;
