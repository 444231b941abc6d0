//! Entry points: request/response contracts and the HTTP router.

pub mod handlers;
pub mod routes;
pub mod ticker;

pub use handlers::{
    CompileResponse, ErrorBody, ExecuteRequest, ExecuteResponse, ExecutionsQuery, ValidateResponse,
};
pub use routes::router;
pub use ticker::{spawn_scheduler, spawn_session_sweeper};
