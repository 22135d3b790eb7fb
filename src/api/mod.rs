mod error;
mod handlers;
mod routes;

pub use error::{ApiError, ErrorResponse};
pub use handlers::{AppState, AVAILABLE_ENDPOINTS};
pub use routes::create_api_router;
